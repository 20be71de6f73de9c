//! Configuration system for Tollgate.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `tollgate.toml` file (or the file named by `TOLLGATE_CONFIG`)
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `TOLLGATE_SERVER_HOST` - Server bind address
//! - `TOLLGATE_SERVER_PORT` - Server port
//! - `TOLLGATE_STORE_BACKEND` - License store backend (file, sqlite, postgres)
//! - `TOLLGATE_STORE_DIR` - Directory for the file backend
//! - `TOLLGATE_DATABASE_URL` - Database connection URL (sqlite:// or postgres://)
//! - `TOLLGATE_LOGGING_ENABLED` - Enable logging for the operator CLI
//! - `TOLLGATE_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
//! - `TOLLGATE_JWT_SECRET` - Secret for bearer token validation
//! - `TOLLGATE_JWT_ISSUER` - Expected token issuer
//! - `TOLLGATE_JWT_AUDIENCE` - Expected token audience
//!
//! The store backend is an explicit value handed to
//! [`open_store`](crate::store::open_store) once at startup; nothing else
//! branches on it.

use config::Config;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::errors::{LicenseError, LicenseResult};
use crate::tiers::LicenseType;

/// Global configuration singleton, used by the binaries.
static CONFIG: OnceLock<TollgateConfig> = OnceLock::new();

/// Environment variable naming an alternative configuration file.
pub const CONFIG_PATH_ENV: &str = "TOLLGATE_CONFIG";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TollgateConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub license: LicenseConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Which persistence engine backs the license store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One JSON document per license in a local directory.
    File,
    /// SQLite database (requires the `sqlite` feature).
    Sqlite,
    /// PostgreSQL database (requires the `postgres` feature).
    Postgres,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::File => "file",
            StoreBackend::Sqlite => "sqlite",
            StoreBackend::Postgres => "postgres",
        }
    }
}

/// License store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Directory holding `license_<id>.json` documents (file backend)
    pub file_dir: PathBuf,
    pub sqlite_url: String,
    pub postgres_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            file_dir: default_file_dir(),
            sqlite_url: "sqlite://tollgate.db".to_string(),
            postgres_url: "postgres://localhost/tollgate".to_string(),
        }
    }
}

fn default_file_dir() -> PathBuf {
    env::temp_dir().join("tollgate-licenses")
}

/// Defaults applied when a generate request leaves fields out.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LicenseConfig {
    pub default_type: LicenseType,
    pub default_duration_days: i64,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            default_type: LicenseType::Basic,
            default_duration_days: 365,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable logging in the operator CLI (the server always logs)
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "info".to_string(),
        }
    }
}

/// Bearer token configuration for HTTP callers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret (use `env:VAR_NAME` to read from environment)
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    /// Lifetime of tokens minted by `JwtValidator::create_token`
    pub token_expiration_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_issuer: "tollgate".to_string(),
            jwt_audience: "tollgate-api".to_string(),
            token_expiration_secs: 3600,
        }
    }
}

fn config_err(e: config::ConfigError) -> LicenseError {
    LicenseError::ConfigError(e.to_string())
}

impl TollgateConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. `tollgate.toml` file (optional)
    /// 3. Environment variables
    pub fn load() -> LicenseResult<Self> {
        let defaults = TollgateConfig::default();
        let config_file = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "tollgate".to_string());
        let database_url = env::var("TOLLGATE_DATABASE_URL").ok();

        let builder = Config::builder()
            .set_default("server.host", defaults.server.host)
            .map_err(config_err)?
            .set_default("server.port", i64::from(defaults.server.port))
            .map_err(config_err)?
            .set_default("store.backend", defaults.store.backend.as_str())
            .map_err(config_err)?
            .set_default(
                "store.file_dir",
                defaults.store.file_dir.to_string_lossy().into_owned(),
            )
            .map_err(config_err)?
            .set_default("store.sqlite_url", defaults.store.sqlite_url)
            .map_err(config_err)?
            .set_default("store.postgres_url", defaults.store.postgres_url)
            .map_err(config_err)?
            .set_default("license.default_type", defaults.license.default_type.as_str())
            .map_err(config_err)?
            .set_default(
                "license.default_duration_days",
                defaults.license.default_duration_days,
            )
            .map_err(config_err)?
            .set_default("logging.enabled", defaults.logging.enabled)
            .map_err(config_err)?
            .set_default("logging.level", defaults.logging.level)
            .map_err(config_err)?
            .set_default("auth.jwt_secret", "")
            .map_err(config_err)?
            .set_default("auth.jwt_issuer", defaults.auth.jwt_issuer)
            .map_err(config_err)?
            .set_default("auth.jwt_audience", defaults.auth.jwt_audience)
            .map_err(config_err)?
            .set_default(
                "auth.token_expiration_secs",
                defaults.auth.token_expiration_secs as i64,
            )
            .map_err(config_err)?
            .add_source(config::File::with_name(&config_file).required(false))
            .set_override_option("server.host", env::var("TOLLGATE_SERVER_HOST").ok())
            .map_err(config_err)?
            .set_override_option(
                "server.port",
                env::var("TOLLGATE_SERVER_PORT")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(config_err)?
            .set_override_option("store.backend", env::var("TOLLGATE_STORE_BACKEND").ok())
            .map_err(config_err)?
            .set_override_option("store.file_dir", env::var("TOLLGATE_STORE_DIR").ok())
            .map_err(config_err)?
            .set_override_option(
                "store.sqlite_url",
                database_url
                    .clone()
                    .filter(|url| url.starts_with("sqlite")),
            )
            .map_err(config_err)?
            .set_override_option(
                "store.postgres_url",
                database_url.filter(|url| url.starts_with("postgres")),
            )
            .map_err(config_err)?
            .set_override_option(
                "logging.enabled",
                env::var("TOLLGATE_LOGGING_ENABLED")
                    .ok()
                    .and_then(|v| v.parse::<bool>().ok()),
            )
            .map_err(config_err)?
            .set_override_option("logging.level", env::var("TOLLGATE_LOG_LEVEL").ok())
            .map_err(config_err)?
            .set_override_option("auth.jwt_secret", env::var("TOLLGATE_JWT_SECRET").ok())
            .map_err(config_err)?
            .set_override_option("auth.jwt_issuer", env::var("TOLLGATE_JWT_ISSUER").ok())
            .map_err(config_err)?
            .set_override_option("auth.jwt_audience", env::var("TOLLGATE_JWT_AUDIENCE").ok())
            .map_err(config_err)?;

        let settings = builder
            .build()
            .map_err(|e| LicenseError::ConfigError(format!("failed to build config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| LicenseError::ConfigError(format!("failed to deserialize config: {e}")))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.server.port == 0 {
            return Err(LicenseError::ConfigError(
                "server.port must be greater than 0".to_string(),
            ));
        }

        if self.license.default_duration_days <= 0 {
            return Err(LicenseError::ConfigError(
                "license.default_duration_days must be greater than 0".to_string(),
            ));
        }

        match self.store.backend {
            StoreBackend::File if self.store.file_dir.as_os_str().is_empty() => {
                return Err(LicenseError::ConfigError(
                    "store.file_dir cannot be empty for the file backend".to_string(),
                ));
            }
            StoreBackend::Sqlite if !self.store.sqlite_url.starts_with("sqlite") => {
                return Err(LicenseError::ConfigError(format!(
                    "store.sqlite_url must be a sqlite:// URL, got '{}'",
                    self.store.sqlite_url
                )));
            }
            StoreBackend::Postgres if !self.store.postgres_url.starts_with("postgres") => {
                return Err(LicenseError::ConfigError(format!(
                    "store.postgres_url must be a postgres:// URL, got '{}'",
                    self.store.postgres_url
                )));
            }
            _ => {}
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        Ok(())
    }
}

/// Get the global configuration.
///
/// Loads and validates on first access and caches the result.
pub fn get_config() -> LicenseResult<&'static TollgateConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = TollgateConfig::load()?;
    config.validate()?;

    // Another thread may have won the race; either value is equivalent.
    let _ = CONFIG.set(config);

    CONFIG
        .get()
        .ok_or_else(|| LicenseError::ConfigError("configuration was not initialised".to_string()))
}

/// Install the `tracing` subscriber at the configured level.
pub fn init_tracing(logging: &LoggingConfig) {
    let level = logging
        .level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    // A subscriber installed earlier (e.g. by a test harness) wins.
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TollgateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.license.default_type, LicenseType::Basic);
        assert_eq!(config.license.default_duration_days, 365);
    }

    #[test]
    fn rejects_bad_log_level() {
        let mut config = TollgateConfig::default();
        config.logging.level = "chatty".to_string();
        assert!(matches!(
            config.validate(),
            Err(LicenseError::ConfigError(_))
        ));
    }

    #[test]
    fn rejects_mismatched_database_url() {
        let mut config = TollgateConfig::default();
        config.store.backend = StoreBackend::Sqlite;
        config.store.sqlite_url = "postgres://localhost/x".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_port() {
        let mut config = TollgateConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }
}
