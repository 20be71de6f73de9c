//! Error taxonomy shared by the store, lifecycle engine, entitlement evaluator
//! and the HTTP surface.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::license::LicenseStatus;

/// Every failure the licensing core can surface to a caller.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// The requested license type is not one of basic, professional, enterprise.
    #[error("unknown license type: {0}")]
    UnknownLicenseType(String),

    /// No license matched the id, key or organization that was looked up.
    #[error("license not found: {0}")]
    NotFound(String),

    /// Validation was requested but no license was resolved upstream.
    #[error("license is nil")]
    NilLicense,

    /// The license exists but its status is not `active`.
    #[error("license is not active (status: {0})")]
    NotActive(LicenseStatus),

    /// The license passed its expiry; the status flip has already been persisted.
    #[error("license has expired (expired at {0})")]
    Expired(DateTime<Utc>),

    /// The license is bound to a different hardware identifier.
    #[error("license is already activated on different hardware")]
    HardwareMismatch,

    /// A quota-bearing resource is at or above its licensed maximum.
    #[error("{resource} limit reached ({used}/{max})")]
    LimitExceeded {
        resource: String,
        used: u64,
        max: i64,
    },

    /// The resource kind is not one of users, workflows, executions.
    #[error("unknown resource kind: {0}")]
    UnknownResource(String),

    /// Backend read or write failure. The only transient error.
    #[error("license store unavailable: {0}")]
    StoreUnavailable(String),

    /// Request body could not be parsed or failed validation.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The secure random source could not supply entropy.
    #[error("failed to generate license key: {0}")]
    KeyGeneration(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl LicenseError {
    /// Whether a caller may reasonably retry the same request.
    pub fn is_transient(&self) -> bool {
        matches!(self, LicenseError::StoreUnavailable(_))
    }
}

impl From<std::io::Error> for LicenseError {
    fn from(err: std::io::Error) -> Self {
        LicenseError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for LicenseError {
    fn from(err: serde_json::Error) -> Self {
        LicenseError::StoreUnavailable(format!("corrupt license document: {err}"))
    }
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
impl From<sqlx::Error> for LicenseError {
    fn from(err: sqlx::Error) -> Self {
        LicenseError::StoreUnavailable(format!("database error: {err}"))
    }
}

/// Result alias used across the crate.
pub type LicenseResult<T> = Result<T, LicenseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_errors_are_transient() {
        assert!(LicenseError::StoreUnavailable("down".into()).is_transient());
        assert!(!LicenseError::HardwareMismatch.is_transient());
        assert!(!LicenseError::NotFound("x".into()).is_transient());
        assert!(!LicenseError::Expired(Utc::now()).is_transient());
    }

    #[test]
    fn limit_message_includes_usage() {
        let err = LicenseError::LimitExceeded {
            resource: "users".into(),
            used: 3,
            max: 3,
        };
        assert_eq!(err.to_string(), "users limit reached (3/3)");
    }

    #[test]
    fn io_errors_map_to_store_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: LicenseError = io.into();
        assert!(matches!(err, LicenseError::StoreUnavailable(_)));
    }
}
