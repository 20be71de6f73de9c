//! Networked license store backed by SQLite or PostgreSQL.
//!
//! The table is created on connect if missing. Features are stored as a JSON
//! array in a text column. Every change after creation is a single
//! conditional `UPDATE` guarded by `status = 'active'`: two concurrent
//! activations of one key can never both bind, and a revoked or expired row
//! is never written back to active.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, FromRow};
use tracing::{error, info};

#[cfg(feature = "sqlite")]
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

#[cfg(feature = "postgres")]
use sqlx::PgPool;

use crate::errors::{LicenseError, LicenseResult};
use crate::license::{License, LicenseStatus};
use crate::store::{ActiveUpdate, BindOutcome, LicenseStore};
use crate::tiers::LicenseType;

#[cfg(feature = "sqlite")]
const SQLITE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS licenses (
        id              TEXT PRIMARY KEY,
        license_key     TEXT NOT NULL UNIQUE,
        organization_id TEXT NOT NULL DEFAULT '',
        license_type    TEXT NOT NULL,
        status          TEXT NOT NULL,
        created_at      TEXT NOT NULL,
        expires_at      TEXT NOT NULL,
        activated_at    TEXT,
        max_users       INTEGER NOT NULL,
        max_workflows   INTEGER NOT NULL,
        max_executions  INTEGER NOT NULL,
        features        TEXT NOT NULL DEFAULT '[]',
        hardware_id     TEXT NOT NULL DEFAULT '',
        last_validated  TEXT NOT NULL
    )
"#;

#[cfg(feature = "postgres")]
const POSTGRES_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS licenses (
        id              TEXT PRIMARY KEY,
        license_key     TEXT NOT NULL UNIQUE,
        organization_id TEXT NOT NULL DEFAULT '',
        license_type    TEXT NOT NULL,
        status          TEXT NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL,
        expires_at      TIMESTAMPTZ NOT NULL,
        activated_at    TIMESTAMPTZ,
        max_users       BIGINT NOT NULL,
        max_workflows   BIGINT NOT NULL,
        max_executions  BIGINT NOT NULL,
        features        TEXT NOT NULL DEFAULT '[]',
        hardware_id     TEXT NOT NULL DEFAULT '',
        last_validated  TIMESTAMPTZ NOT NULL
    )
"#;

const SELECT_COLUMNS: &str = "SELECT id, license_key, organization_id, license_type, status, \
     created_at, expires_at, activated_at, max_users, max_workflows, max_executions, \
     features, hardware_id, last_validated FROM licenses";

/// Row shape of the `licenses` table.
#[derive(Debug, Clone, FromRow)]
struct LicenseRow {
    id: String,
    license_key: String,
    organization_id: String,
    license_type: String,
    status: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    activated_at: Option<DateTime<Utc>>,
    max_users: i64,
    max_workflows: i64,
    max_executions: i64,
    features: String,
    hardware_id: String,
    last_validated: DateTime<Utc>,
}

impl TryFrom<LicenseRow> for License {
    type Error = LicenseError;

    fn try_from(row: LicenseRow) -> Result<Self, Self::Error> {
        let license_type = LicenseType::from_str(&row.license_type).map_err(|_| {
            error!("Stored license {} has unknown type '{}'", row.id, row.license_type);
            LicenseError::StoreUnavailable(format!(
                "stored license {} has unknown type '{}'",
                row.id, row.license_type
            ))
        })?;

        let status = LicenseStatus::from_str(&row.status).map_err(|e| {
            error!("Stored license {} has an unreadable status: {e}", row.id);
            e
        })?;
        let features = serde_json::from_str(&row.features).map_err(|e| {
            error!("Stored license {} has unreadable features: {e}", row.id);
            LicenseError::from(e)
        })?;

        Ok(License {
            license_type,
            status,
            features,
            id: row.id,
            key: row.license_key,
            organization_id: row.organization_id,
            created_at: row.created_at,
            expires_at: row.expires_at,
            activated_at: row.activated_at,
            max_users: row.max_users,
            max_workflows: row.max_workflows,
            max_executions: row.max_executions,
            hardware_id: row.hardware_id,
            last_validated: row.last_validated,
        })
    }
}

fn rows_to_licenses(rows: Vec<LicenseRow>) -> LicenseResult<Vec<License>> {
    rows.into_iter().map(License::try_from).collect()
}

fn db_error(backend: &str, op: &str, e: sqlx::Error) -> LicenseError {
    error!("{backend} {op} failed: {e}");
    LicenseError::StoreUnavailable(format!("database error: {e}"))
}

/// Bind every column of a license, in table order.
macro_rules! bind_license {
    ($query:expr, $license:expr, $features:expr) => {
        $query
            .bind(&$license.id)
            .bind(&$license.key)
            .bind(&$license.organization_id)
            .bind($license.license_type.as_str())
            .bind($license.status.as_str())
            .bind($license.created_at)
            .bind($license.expires_at)
            .bind($license.activated_at)
            .bind($license.max_users)
            .bind($license.max_workflows)
            .bind($license.max_executions)
            .bind($features)
            .bind(&$license.hardware_id)
            .bind($license.last_validated)
    };
}

/// License store over a `sqlx` connection pool.
///
/// Available variants depend on enabled features:
/// - `sqlite` feature enables `SqlStore::SQLite`
/// - `postgres` feature enables `SqlStore::Postgres`
#[derive(Debug, Clone)]
pub enum SqlStore {
    #[cfg(feature = "sqlite")]
    SQLite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl SqlStore {
    /// Connect to SQLite, creating the database file if needed.
    ///
    /// In-memory URLs get a single long-lived connection so the database
    /// survives for the lifetime of the pool.
    #[cfg(feature = "sqlite")]
    pub async fn connect_sqlite(url: &str) -> LicenseResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| LicenseError::ConfigError(format!("invalid SQLite URL: {e}")))?
            .create_if_missing(true);

        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
        };

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            error!("Failed to connect to SQLite: {e}");
            LicenseError::StoreUnavailable(format!("failed to connect to SQLite: {e}"))
        })?;

        let store = SqlStore::SQLite(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    #[cfg(feature = "postgres")]
    pub async fn connect_postgres(url: &str) -> LicenseResult<Self> {
        let pool = PgPool::connect(url).await.map_err(|e| {
            error!("Failed to connect to PostgreSQL: {e}");
            LicenseError::StoreUnavailable(format!("failed to connect to PostgreSQL: {e}"))
        })?;

        let store = SqlStore::Postgres(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create the `licenses` table if it does not exist.
    pub async fn ensure_schema(&self) -> LicenseResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            SqlStore::SQLite(pool) => {
                query(SQLITE_SCHEMA)
                    .execute(pool)
                    .await
                    .map_err(|e| db_error("SQLite", "ensure_schema", e))?;
            }
            #[cfg(feature = "postgres")]
            SqlStore::Postgres(pool) => {
                query(POSTGRES_SCHEMA)
                    .execute(pool)
                    .await
                    .map_err(|e| db_error("Postgres", "ensure_schema", e))?;
            }
        }

        info!("License schema ready ({})", self.backend());
        Ok(())
    }

    async fn fetch_one_where(
        &self,
        column: &'static str,
        value: &str,
    ) -> LicenseResult<Option<License>> {
        let row = match self {
            #[cfg(feature = "sqlite")]
            SqlStore::SQLite(pool) => {
                let sql = format!("{SELECT_COLUMNS} WHERE {column} = ?1");
                query_as::<_, LicenseRow>(&sql)
                    .bind(value)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| db_error("SQLite", "fetch", e))?
            }
            #[cfg(feature = "postgres")]
            SqlStore::Postgres(pool) => {
                let sql = format!("{SELECT_COLUMNS} WHERE {column} = $1");
                query_as::<_, LicenseRow>(&sql)
                    .bind(value)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| db_error("Postgres", "fetch", e))?
            }
        };

        row.map(License::try_from).transpose()
    }

    /// Classify a status-guarded `UPDATE` by re-reading the row.
    async fn active_update_outcome(
        &self,
        id: &str,
        rows_affected: u64,
    ) -> LicenseResult<ActiveUpdate> {
        match self.get_by_id(id).await? {
            Some(license) if rows_affected > 0 => Ok(ActiveUpdate::Updated(license)),
            Some(license) => Ok(ActiveUpdate::Inactive(license.status)),
            None => Ok(ActiveUpdate::Missing),
        }
    }
}

#[async_trait]
impl LicenseStore for SqlStore {
    fn backend(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlite")]
            SqlStore::SQLite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            SqlStore::Postgres(_) => "postgres",
        }
    }

    async fn put(&self, license: &License) -> LicenseResult<()> {
        let features = serde_json::to_string(&license.features).map_err(|e| {
            error!("Failed to encode features of license {}: {e}", license.id);
            LicenseError::from(e)
        })?;

        match self {
            #[cfg(feature = "sqlite")]
            SqlStore::SQLite(pool) => {
                let q = query(
                    r#"
                    INSERT INTO licenses (
                        id, license_key, organization_id, license_type, status,
                        created_at, expires_at, activated_at,
                        max_users, max_workflows, max_executions,
                        features, hardware_id, last_validated
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                    ON CONFLICT(id) DO UPDATE SET
                        license_key     = excluded.license_key,
                        organization_id = excluded.organization_id,
                        license_type    = excluded.license_type,
                        status          = excluded.status,
                        created_at      = excluded.created_at,
                        expires_at      = excluded.expires_at,
                        activated_at    = excluded.activated_at,
                        max_users       = excluded.max_users,
                        max_workflows   = excluded.max_workflows,
                        max_executions  = excluded.max_executions,
                        features        = excluded.features,
                        hardware_id     = excluded.hardware_id,
                        last_validated  = excluded.last_validated
                    "#,
                );
                bind_license!(q, license, &features)
                    .execute(pool)
                    .await
                    .map_err(|e| db_error("SQLite", "put", e))?;
            }
            #[cfg(feature = "postgres")]
            SqlStore::Postgres(pool) => {
                let q = query(
                    r#"
                    INSERT INTO licenses (
                        id, license_key, organization_id, license_type, status,
                        created_at, expires_at, activated_at,
                        max_users, max_workflows, max_executions,
                        features, hardware_id, last_validated
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                    ON CONFLICT (id) DO UPDATE SET
                        license_key     = EXCLUDED.license_key,
                        organization_id = EXCLUDED.organization_id,
                        license_type    = EXCLUDED.license_type,
                        status          = EXCLUDED.status,
                        created_at      = EXCLUDED.created_at,
                        expires_at      = EXCLUDED.expires_at,
                        activated_at    = EXCLUDED.activated_at,
                        max_users       = EXCLUDED.max_users,
                        max_workflows   = EXCLUDED.max_workflows,
                        max_executions  = EXCLUDED.max_executions,
                        features        = EXCLUDED.features,
                        hardware_id     = EXCLUDED.hardware_id,
                        last_validated  = EXCLUDED.last_validated
                    "#,
                );
                bind_license!(q, license, &features)
                    .execute(pool)
                    .await
                    .map_err(|e| db_error("Postgres", "put", e))?;
            }
        }

        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> LicenseResult<Option<License>> {
        self.fetch_one_where("id", id).await
    }

    async fn get_by_key(&self, key: &str) -> LicenseResult<Option<License>> {
        self.fetch_one_where("license_key", key).await
    }

    async fn get_active_for_organization(
        &self,
        org_id: &str,
    ) -> LicenseResult<Option<License>> {
        let row = match self {
            #[cfg(feature = "sqlite")]
            SqlStore::SQLite(pool) => {
                let sql = format!(
                    "{SELECT_COLUMNS} WHERE organization_id = ?1 AND status = 'active' \
                     ORDER BY created_at DESC LIMIT 1"
                );
                query_as::<_, LicenseRow>(&sql)
                    .bind(org_id)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| db_error("SQLite", "get_active_for_organization", e))?
            }
            #[cfg(feature = "postgres")]
            SqlStore::Postgres(pool) => {
                let sql = format!(
                    "{SELECT_COLUMNS} WHERE organization_id = $1 AND status = 'active' \
                     ORDER BY created_at DESC LIMIT 1"
                );
                query_as::<_, LicenseRow>(&sql)
                    .bind(org_id)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| db_error("Postgres", "get_active_for_organization", e))?
            }
        };

        row.map(License::try_from).transpose()
    }

    async fn list(&self) -> LicenseResult<Vec<License>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY created_at DESC");
        let rows = match self {
            #[cfg(feature = "sqlite")]
            SqlStore::SQLite(pool) => query_as::<_, LicenseRow>(&sql)
                .fetch_all(pool)
                .await
                .map_err(|e| db_error("SQLite", "list", e))?,
            #[cfg(feature = "postgres")]
            SqlStore::Postgres(pool) => query_as::<_, LicenseRow>(&sql)
                .fetch_all(pool)
                .await
                .map_err(|e| db_error("Postgres", "list", e))?,
        };

        rows_to_licenses(rows)
    }

    async fn bind_hardware(
        &self,
        id: &str,
        hardware_id: &str,
        org_id: &str,
        now: DateTime<Utc>,
    ) -> LicenseResult<BindOutcome> {
        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            SqlStore::SQLite(pool) => query(
                "UPDATE licenses \
                     SET hardware_id = ?1, organization_id = ?2, last_validated = ?3, \
                         activated_at = COALESCE(activated_at, ?3) \
                     WHERE id = ?4 AND status = 'active' \
                       AND (hardware_id = '' OR hardware_id = ?1)",
            )
            .bind(hardware_id)
            .bind(org_id)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| db_error("SQLite", "bind_hardware", e))?
            .rows_affected(),
            #[cfg(feature = "postgres")]
            SqlStore::Postgres(pool) => query(
                "UPDATE licenses \
                     SET hardware_id = $1, organization_id = $2, last_validated = $3, \
                         activated_at = COALESCE(activated_at, $3) \
                     WHERE id = $4 AND status = 'active' \
                       AND (hardware_id = '' OR hardware_id = $1)",
            )
            .bind(hardware_id)
            .bind(org_id)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| db_error("Postgres", "bind_hardware", e))?
            .rows_affected(),
        };

        // Re-read either way: the bound row on success, or to tell apart why
        // nothing was written.
        match self.get_by_id(id).await? {
            Some(license) if rows_affected > 0 => Ok(BindOutcome::Bound(license)),
            Some(license) if !license.is_active() => Ok(BindOutcome::Inactive(license.status)),
            Some(_) => Ok(BindOutcome::Mismatch),
            None => Ok(BindOutcome::Missing),
        }
    }

    async fn touch_validated(&self, id: &str, now: DateTime<Utc>) -> LicenseResult<ActiveUpdate> {
        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            SqlStore::SQLite(pool) => query(
                "UPDATE licenses SET last_validated = ?1 WHERE id = ?2 AND status = 'active'",
            )
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| db_error("SQLite", "touch_validated", e))?
            .rows_affected(),
            #[cfg(feature = "postgres")]
            SqlStore::Postgres(pool) => query(
                "UPDATE licenses SET last_validated = $1 WHERE id = $2 AND status = 'active'",
            )
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| db_error("Postgres", "touch_validated", e))?
            .rows_affected(),
        };

        self.active_update_outcome(id, rows_affected).await
    }

    async fn deactivate(&self, id: &str, status: LicenseStatus) -> LicenseResult<ActiveUpdate> {
        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            SqlStore::SQLite(pool) => query(
                "UPDATE licenses SET status = ?1 WHERE id = ?2 AND status = 'active'",
            )
            .bind(status.as_str())
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| db_error("SQLite", "deactivate", e))?
            .rows_affected(),
            #[cfg(feature = "postgres")]
            SqlStore::Postgres(pool) => query(
                "UPDATE licenses SET status = $1 WHERE id = $2 AND status = 'active'",
            )
            .bind(status.as_str())
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| db_error("Postgres", "deactivate", e))?
            .rows_affected(),
        };

        self.active_update_outcome(id, rows_affected).await
    }
}
