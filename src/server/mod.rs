//! HTTP surface for Tollgate.
//!
//! This module contains:
//! - `api_error` → structured JSON denials
//! - `auth`      → bearer token authentication (`Caller` extractor)
//! - `gate`      → enforcement gate middleware for protected routes
//! - `handlers`  → axum handlers and shared `AppState`
//! - `logging`   → request logging middleware and license audit events
//! - `routes`    → router builder

pub mod api_error;
pub mod auth;
pub mod gate;
pub mod handlers;
pub mod logging;
pub mod routes;

pub use api_error::{ApiError, ErrorCode};
pub use auth::{AuthError, Caller, Claims, JwtValidator, ADMIN_ROLE};
pub use gate::{enforce_license, gated, RequiredFeature};
pub use handlers::AppState;
pub use logging::{log_license_event, request_logging_middleware, LicenseEvent};
pub use routes::build_router;
