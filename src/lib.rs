//! Tollgate - license issuance, activation and entitlement enforcement for
//! multi-tenant backends.
//!
//! # Features
//!
//! - `server` - HTTP surface and enforcement gate on axum. Enabled by default.
//! - `sqlite` - SQLite license store. Enabled by default.
//! - `postgres` - PostgreSQL license store.
//!
//! The local file store is always available.
//!
//! # Example
//!
//! ```toml
//! # Use defaults (server + sqlite)
//! tollgate = "0.1"
//!
//! # Core only: lifecycle engine, file store and operator CLI
//! tollgate = { version = "0.1", default-features = false }
//!
//! # Server with PostgreSQL
//! tollgate = { version = "0.1", features = ["server", "postgres"] }
//! ```

// Core modules (always available)
pub mod clock;
pub mod config;
pub mod errors;
pub mod license;
pub mod license_key;
pub mod tiers;

pub mod cli;
pub mod directory;
pub mod entitlements;
pub mod lifecycle;
pub mod store;

// Server-related modules (requires "server" feature)
#[cfg(feature = "server")]
#[path = "server/mod.rs"]
pub mod server;

pub use errors::{LicenseError, LicenseResult};
pub use license::{License, LicenseStatus};
pub use lifecycle::LicenseEngine;
pub use tiers::{LicenseType, ResourceKind, UNLIMITED};
