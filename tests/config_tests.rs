use std::env;

use serial_test::serial;

use tollgate::config::{StoreBackend, TollgateConfig, CONFIG_PATH_ENV};
use tollgate::{LicenseError, LicenseType};

const VARS: &[&str] = &[
    CONFIG_PATH_ENV,
    "TOLLGATE_SERVER_PORT",
    "TOLLGATE_STORE_BACKEND",
    "TOLLGATE_STORE_DIR",
    "TOLLGATE_DATABASE_URL",
    "TOLLGATE_LOG_LEVEL",
    "TOLLGATE_JWT_SECRET",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

fn write_config(dir: &tempfile::TempDir, contents: &str) -> String {
    let path = dir.path().join("tollgate.toml");
    std::fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
#[serial]
fn defaults_without_file_or_env() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    env::set_var(CONFIG_PATH_ENV, dir.path().join("absent").to_string_lossy().as_ref());

    let config = TollgateConfig::load().unwrap();
    config.validate().unwrap();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.store.backend, StoreBackend::File);
    assert_eq!(config.license.default_type, LicenseType::Basic);
    assert_eq!(config.auth.jwt_issuer, "tollgate");

    clear_env();
}

#[test]
#[serial]
fn file_values_are_read() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[server]
port = 9090

[store]
backend = "sqlite"
sqlite_url = "sqlite://licenses.db"

[license]
default_type = "professional"
default_duration_days = 30
"#,
    );
    env::set_var(CONFIG_PATH_ENV, &path);

    let config = TollgateConfig::load().unwrap();
    config.validate().unwrap();
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.store.backend, StoreBackend::Sqlite);
    assert_eq!(config.store.sqlite_url, "sqlite://licenses.db");
    assert_eq!(config.license.default_type, LicenseType::Professional);
    assert_eq!(config.license.default_duration_days, 30);

    clear_env();
}

#[test]
#[serial]
fn environment_overrides_file() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[server]
port = 9090

[store]
backend = "file"
"#,
    );
    env::set_var(CONFIG_PATH_ENV, &path);
    env::set_var("TOLLGATE_SERVER_PORT", "7070");
    env::set_var("TOLLGATE_STORE_BACKEND", "postgres");
    env::set_var("TOLLGATE_DATABASE_URL", "postgres://db.internal/licenses");
    env::set_var("TOLLGATE_JWT_SECRET", "from-env");

    let config = TollgateConfig::load().unwrap();
    config.validate().unwrap();
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.store.backend, StoreBackend::Postgres);
    assert_eq!(config.store.postgres_url, "postgres://db.internal/licenses");
    assert_eq!(config.auth.jwt_secret, "from-env");

    clear_env();
}

#[test]
#[serial]
fn unknown_backend_fails_to_load() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    env::set_var(CONFIG_PATH_ENV, dir.path().join("absent").to_string_lossy().as_ref());
    env::set_var("TOLLGATE_STORE_BACKEND", "redis");

    assert!(matches!(
        TollgateConfig::load(),
        Err(LicenseError::ConfigError(_))
    ));

    clear_env();
}

#[test]
#[serial]
fn bad_log_level_fails_validation() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    env::set_var(CONFIG_PATH_ENV, dir.path().join("absent").to_string_lossy().as_ref());
    env::set_var("TOLLGATE_LOG_LEVEL", "verbose");

    let config = TollgateConfig::load().unwrap();
    assert!(config.validate().is_err());

    clear_env();
}
