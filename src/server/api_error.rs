//! Structured JSON denials for every HTTP endpoint and the enforcement gate.
//!
//! # Response Format
//!
//! ```json
//! {
//!   "success": false,
//!   "reason": "Feature 'sso' not available in your license plan",
//!   "code": "FEATURE_NOT_INCLUDED"
//! }
//! ```
//!
//! Denials caused by the absence of any usable license additionally carry
//! `"license_required": true` so a frontend can route the user to activation.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::LicenseError;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // === License State (4xx) ===
    LicenseRequired,
    LicenseNotFound,
    LicenseExpired,
    LicenseInactive,
    HardwareMismatch,

    // === Entitlements (403) ===
    FeatureNotIncluded,
    QuotaExceeded,

    // === Request Validation (400) ===
    InvalidRequest,
    InvalidLicenseType,

    // === Caller (401/403) ===
    AuthenticationFailed,
    AdminRequired,

    // === Server (5xx) ===
    OrganizationUnavailable,
    StoreUnavailable,
    ConfigError,
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidRequest | ErrorCode::InvalidLicenseType => StatusCode::BAD_REQUEST,

            ErrorCode::AuthenticationFailed => StatusCode::UNAUTHORIZED,

            ErrorCode::LicenseRequired
            | ErrorCode::LicenseExpired
            | ErrorCode::LicenseInactive
            | ErrorCode::HardwareMismatch
            | ErrorCode::FeatureNotIncluded
            | ErrorCode::QuotaExceeded
            | ErrorCode::AdminRequired => StatusCode::FORBIDDEN,

            ErrorCode::LicenseNotFound => StatusCode::NOT_FOUND,

            ErrorCode::OrganizationUnavailable
            | ErrorCode::StoreUnavailable
            | ErrorCode::ConfigError
            | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::LicenseRequired => {
                "License required. Please activate a valid license to access this feature."
            }
            ErrorCode::LicenseNotFound => "No active license found",
            ErrorCode::LicenseExpired => "License has expired",
            ErrorCode::LicenseInactive => "License is not active",
            ErrorCode::HardwareMismatch => "License is already activated on different hardware",
            ErrorCode::FeatureNotIncluded => "Feature not available in your license plan",
            ErrorCode::QuotaExceeded => "License limit reached",
            ErrorCode::InvalidRequest => "Request payload is invalid",
            ErrorCode::InvalidLicenseType => {
                "Invalid license type. Valid types: basic, professional, enterprise"
            }
            ErrorCode::AuthenticationFailed => "Failed authentication",
            ErrorCode::AdminRequired => "Admin access required",
            ErrorCode::OrganizationUnavailable => "Failed to get organization",
            ErrorCode::StoreUnavailable => "License store unavailable",
            ErrorCode::ConfigError => "Server configuration error",
            ErrorCode::InternalError => "An unexpected error occurred",
        }
    }
}

/// A denial. The HTTP status defaults to the code's status and can be
/// overridden per endpoint with [`ApiError::status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub success: bool,
    pub reason: String,
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_required: Option<bool>,
    #[serde(skip)]
    status: Option<u16>,
}

impl ApiError {
    pub fn new(code: ErrorCode) -> Self {
        Self::with_reason(code, code.default_message())
    }

    pub fn with_reason(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
            code,
            license_required: None,
            status: None,
        }
    }

    /// No usable license at all; tells the client to activate one.
    pub fn license_required() -> Self {
        Self {
            license_required: Some(true),
            ..Self::new(ErrorCode::LicenseRequired)
        }
    }

    pub fn feature_not_included(feature: &str) -> Self {
        Self::with_reason(
            ErrorCode::FeatureNotIncluded,
            format!("Feature '{feature}' not available in your license plan"),
        )
    }

    /// Override the HTTP status for this response.
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status.as_u16());
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or_else(|| self.code.status_code())
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status_code(), self.reason)
    }
}

impl std::error::Error for ApiError {}

impl From<LicenseError> for ApiError {
    fn from(err: LicenseError) -> Self {
        match err {
            LicenseError::UnknownLicenseType(_) => ApiError::new(ErrorCode::InvalidLicenseType),
            LicenseError::NotFound(_) => ApiError::new(ErrorCode::LicenseNotFound),
            LicenseError::NilLicense => ApiError::license_required(),
            LicenseError::NotActive(_) => {
                ApiError::with_reason(ErrorCode::LicenseInactive, err.to_string())
            }
            LicenseError::Expired(_) => {
                ApiError::with_reason(ErrorCode::LicenseExpired, err.to_string())
            }
            LicenseError::HardwareMismatch => ApiError::new(ErrorCode::HardwareMismatch),
            LicenseError::LimitExceeded { .. } => {
                ApiError::with_reason(ErrorCode::QuotaExceeded, err.to_string())
            }
            LicenseError::UnknownResource(_) | LicenseError::MalformedRequest(_) => {
                ApiError::with_reason(ErrorCode::InvalidRequest, err.to_string())
            }
            // Internal details stay in the log.
            LicenseError::StoreUnavailable(_) => {
                error!("{err}");
                ApiError::new(ErrorCode::StoreUnavailable)
            }
            LicenseError::KeyGeneration(_) => {
                error!("{err}");
                ApiError::new(ErrorCode::InternalError)
            }
            LicenseError::ConfigError(_) => {
                error!("{err}");
                ApiError::new(ErrorCode::ConfigError)
            }
        }
    }
}
