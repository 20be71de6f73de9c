//! License persistence.
//!
//! [`LicenseStore`] is the single seam between the lifecycle engine and a
//! persistence engine. Two implementations exist:
//!
//! - [`FileStore`] → one JSON document per license in a local directory
//! - [`SqlStore`]  → SQLite or PostgreSQL via `sqlx` (requires `sqlite`/`postgres`)
//!
//! The backend is chosen once by [`open_store`] from configuration.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::{StoreBackend, StoreConfig};
use crate::errors::{LicenseError, LicenseResult};
use crate::license::{License, LicenseStatus};

pub mod file;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod sql;

pub use file::FileStore;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub use sql::SqlStore;

/// Result of a conditional hardware binding.
#[derive(Debug, Clone, PartialEq)]
pub enum BindOutcome {
    /// The binding was written (or already held the same hardware id).
    Bound(License),
    /// The license is bound to a different hardware id; nothing was written.
    Mismatch,
    /// The license is no longer `active`; nothing was written.
    Inactive(LicenseStatus),
    /// No license with that id exists.
    Missing,
}

/// Result of a write that only applies while a license is `active`.
#[derive(Debug, Clone, PartialEq)]
pub enum ActiveUpdate {
    /// The write landed; carries the stored license after it.
    Updated(License),
    /// The stored license was not `active`; nothing was written.
    Inactive(LicenseStatus),
    Missing,
}

/// Backend-agnostic license persistence.
///
/// Lookups return `Ok(None)` when nothing matches; the caller decides
/// whether that is a hard failure or "not entitled". Backend failures surface
/// as [`LicenseError::StoreUnavailable`].
#[async_trait]
pub trait LicenseStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    /// Upsert by id, overwriting every field. Only used for new licenses;
    /// later changes go through the conditional writes below.
    async fn put(&self, license: &License) -> LicenseResult<()>;

    async fn get_by_id(&self, id: &str) -> LicenseResult<Option<License>>;

    /// Lookup by key. The file backend scans every document.
    async fn get_by_key(&self, key: &str) -> LicenseResult<Option<License>>;

    /// The most recently created `active` license of an organization.
    async fn get_active_for_organization(&self, org_id: &str)
        -> LicenseResult<Option<License>>;

    /// Every stored license, newest first.
    async fn list(&self) -> LicenseResult<Vec<License>>;

    /// Refresh `last_validated`, only if the stored license is `active`.
    async fn touch_validated(&self, id: &str, now: DateTime<Utc>) -> LicenseResult<ActiveUpdate>;

    /// Move an `active` license to `status` (expired or revoked).
    ///
    /// A license that already left `active` is left untouched, so terminal
    /// states are never overwritten.
    async fn deactivate(&self, id: &str, status: LicenseStatus) -> LicenseResult<ActiveUpdate>;

    /// Atomically bind `hardware_id` to a license.
    ///
    /// Writes only if the stored license is `active` and its hardware id is
    /// empty or already equal to `hardware_id`. On write, sets `hardware_id`, `organization_id` and
    /// `last_validated`, and `activated_at` if it was unset.
    async fn bind_hardware(
        &self,
        id: &str,
        hardware_id: &str,
        org_id: &str,
        now: DateTime<Utc>,
    ) -> LicenseResult<BindOutcome>;
}

/// Open the store selected by `config`.
pub async fn open_store(config: &StoreConfig) -> LicenseResult<Arc<dyn LicenseStore>> {
    info!("Opening {} license store", config.backend.as_str());

    match config.backend {
        StoreBackend::File => {
            let store = FileStore::open(&config.file_dir).await?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "sqlite")]
        StoreBackend::Sqlite => {
            let store = SqlStore::connect_sqlite(&config.sqlite_url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StoreBackend::Sqlite => Err(LicenseError::ConfigError(
            "SQLite support not compiled in. Enable the 'sqlite' feature.".to_string(),
        )),
        #[cfg(feature = "postgres")]
        StoreBackend::Postgres => {
            let store = SqlStore::connect_postgres(&config.postgres_url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StoreBackend::Postgres => Err(LicenseError::ConfigError(
            "PostgreSQL support not compiled in. Enable the 'postgres' feature.".to_string(),
        )),
    }
}
