//! Request logging and license audit events.
//!
//! Every request gets a UUID that scopes its log lines and is echoed back in
//! the `X-Request-Id` response header.

use std::time::Instant;

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Response},
    middleware::Next,
};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// License lifecycle events worth an audit line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseEvent {
    Created,
    Activated,
    Validated,
    ValidationFailed,
    Expired,
    Revoked,
    /// Activation from hardware other than the bound one.
    HardwareMismatch,
    /// A request was refused: by the enforcement gate, or an activation of
    /// a missing or inactive license.
    Denied,
}

impl std::fmt::Display for LicenseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LicenseEvent::Created => "created",
            LicenseEvent::Activated => "activated",
            LicenseEvent::Validated => "validated",
            LicenseEvent::ValidationFailed => "validation_failed",
            LicenseEvent::Expired => "expired",
            LicenseEvent::Revoked => "revoked",
            LicenseEvent::HardwareMismatch => "hardware_mismatch",
            LicenseEvent::Denied => "denied",
        };
        f.write_str(s)
    }
}

impl LicenseEvent {
    fn is_failure(&self) -> bool {
        matches!(
            self,
            LicenseEvent::ValidationFailed
                | LicenseEvent::Expired
                | LicenseEvent::HardwareMismatch
                | LicenseEvent::Denied
        )
    }
}

/// Emit one audit line for `event` on `license_id`.
///
/// `license_id` is the license id, or the organization id when no license
/// could be resolved. Never pass a full license key.
pub fn log_license_event(event: LicenseEvent, license_id: &str, details: Option<&str>) {
    let span = info_span!(
        "license_event",
        event = %event,
        license_id = %license_id,
    );
    let _enter = span.enter();

    match (event.is_failure(), details) {
        (true, Some(d)) => warn!(reason = %d, "License event occurred"),
        (true, None) => warn!("License event occurred"),
        (false, Some(d)) => info!(details = %d, "License event occurred"),
        (false, None) => info!("License event occurred"),
    }
}

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Axum middleware: request span, timing, and the `X-Request-Id` header.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response<Body> {
    let request_id = generate_request_id();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let start = Instant::now();

    let response = async move {
        info!("Started processing request");
        next.run(request).await
    }
    .instrument(span.clone())
    .await;

    let duration = start.elapsed();
    let status = response.status();

    let _enter = span.enter();
    info!(
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        "Request completed"
    );

    let (mut parts, body) = response.into_parts();
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        parts.headers.insert(REQUEST_ID_HEADER, header_value);
    }

    Response::from_parts(parts, body)
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub store: String,
}

impl HealthResponse {
    pub fn healthy(store_backend: &str) -> Self {
        Self {
            status: "healthy".to_string(),
            service: "tollgate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: store_backend.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_valid_uuid() {
        let id = generate_request_id();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn event_names() {
        assert_eq!(LicenseEvent::ValidationFailed.to_string(), "validation_failed");
        assert_eq!(LicenseEvent::Denied.to_string(), "denied");
        assert_eq!(LicenseEvent::HardwareMismatch.to_string(), "hardware_mismatch");
        assert!(LicenseEvent::HardwareMismatch.is_failure());
        assert!(LicenseEvent::Expired.is_failure());
        assert!(!LicenseEvent::Activated.is_failure());
    }

    #[test]
    fn health_response_names_store() {
        let health = HealthResponse::healthy("file");
        assert_eq!(health.status, "healthy");
        assert_eq!(health.service, "tollgate");
        assert_eq!(health.store, "file");
    }
}
