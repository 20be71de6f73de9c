use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LicenseConfig;
use crate::directory::OrganizationDirectory;
use crate::entitlements::{EntitlementEvaluator, ResourceCounter};
use crate::errors::LicenseError;
use crate::license::{duration_from_days, License};
use crate::license_key::{generate_hardware_id, mask_key};
use crate::lifecycle::LicenseEngine;
use crate::server::api_error::{ApiError, ErrorCode};
use crate::server::auth::{Caller, JwtValidator};
use crate::server::logging::{log_license_event, HealthResponse, LicenseEvent};
use crate::tiers::{LicenseType, ResourceKind};

/// Shared state for all handlers and the enforcement gate.
#[derive(Clone)]
pub struct AppState {
    pub engine: LicenseEngine,
    pub entitlements: EntitlementEvaluator,
    pub directory: Arc<dyn OrganizationDirectory>,
    pub auth: Arc<JwtValidator>,
    pub license_defaults: LicenseConfig,
}

impl AppState {
    pub fn new(
        engine: LicenseEngine,
        counter: Arc<dyn ResourceCounter>,
        directory: Arc<dyn OrganizationDirectory>,
        auth: JwtValidator,
        license_defaults: LicenseConfig,
    ) -> Self {
        Self {
            entitlements: EntitlementEvaluator::new(engine.clone(), counter),
            engine,
            directory,
            auth: Arc::new(auth),
            license_defaults,
        }
    }
}

impl FromRef<AppState> for Arc<JwtValidator> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::with_reason(ErrorCode::InvalidRequest, e.body_text()))
}

/// Map a core error for endpoints that answer client mistakes with 400.
fn bad_request(err: LicenseError) -> ApiError {
    let api = ApiError::from(err);
    if api.is_server_error() {
        api
    } else {
        api.status(StatusCode::BAD_REQUEST)
    }
}

// === Generate (admin) ===

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(rename = "type", default)]
    pub license_type: Option<String>,
    #[serde(default, alias = "organizationId")]
    pub organization_id: Option<String>,
    #[serde(default, alias = "durationDays")]
    pub duration_days: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LicenseResponse {
    pub success: bool,
    pub message: String,
    pub license: License,
}

/// `POST /api/v1/license/generate`
///
/// The response carries the plaintext key; it is not retrievable later.
pub async fn generate_license_handler(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<LicenseResponse>, ApiError> {
    if let Err(denied) = caller.require_admin() {
        log_license_event(LicenseEvent::Denied, &caller.subject, Some("generate requires admin"));
        return Err(denied);
    }
    let req = json_body(payload)?;

    let license_type = req
        .license_type
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| state.license_defaults.default_type.as_str().to_string());
    let duration_days = req
        .duration_days
        .filter(|d| *d > 0)
        .unwrap_or(state.license_defaults.default_duration_days);
    let organization_id = req.organization_id.unwrap_or_default();
    let duration = duration_from_days(duration_days).map_err(ApiError::from)?;

    let license = state
        .engine
        .create(&license_type, &organization_id, duration)
        .await
        .map_err(ApiError::from)?;

    log_license_event(
        LicenseEvent::Created,
        &license.id,
        Some(&format!("type={} by={}", license.license_type, caller.subject)),
    );

    Ok(Json(LicenseResponse {
        success: true,
        message: "License generated successfully".to_string(),
        license,
    }))
}

// === Activate ===

#[derive(Debug, Default, Deserialize)]
pub struct ActivateRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default, alias = "hardwareId")]
    pub hardware_id: Option<String>,
}

/// `POST /api/v1/license/activate`
///
/// Binds the key to the caller's organization. A missing hardware id is
/// synthesized.
pub async fn activate_license_handler(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<ActivateRequest>, JsonRejection>,
) -> Result<Json<LicenseResponse>, ApiError> {
    let req = json_body(payload)?;

    let key = req.key.trim();
    if key.is_empty() {
        return Err(ApiError::with_reason(
            ErrorCode::InvalidRequest,
            "License key is required",
        ));
    }
    if caller.organization_id.is_empty() {
        return Err(ApiError::with_reason(
            ErrorCode::InvalidRequest,
            "Caller is not acting for an organization",
        ));
    }

    let hardware_id = match req.hardware_id.filter(|h| !h.is_empty()) {
        Some(hw) => hw,
        None => generate_hardware_id().map_err(ApiError::from)?,
    };

    match state
        .engine
        .activate(key, &hardware_id, &caller.organization_id)
        .await
    {
        Ok(license) => {
            log_license_event(
                LicenseEvent::Activated,
                &license.id,
                Some(&format!("org={}", license.organization_id)),
            );
            Ok(Json(LicenseResponse {
                success: true,
                message: "License activated successfully".to_string(),
                license,
            }))
        }
        Err(e) => {
            log_license_event(
                activation_failure_event(&e),
                &mask_key(key),
                Some(&e.to_string()),
            );
            Err(bad_request(e))
        }
    }
}

fn activation_failure_event(err: &LicenseError) -> LicenseEvent {
    match err {
        LicenseError::Expired(_) => LicenseEvent::Expired,
        LicenseError::HardwareMismatch => LicenseEvent::HardwareMismatch,
        LicenseError::NotFound(_) | LicenseError::NotActive(_) => LicenseEvent::Denied,
        _ => LicenseEvent::ValidationFailed,
    }
}

// === Info ===

#[derive(Debug, Serialize, Deserialize)]
pub struct LicenseInfoResponse {
    pub success: bool,
    pub license: License,
    pub days_remaining: i64,
    pub expiring_soon: bool,
}

/// `GET /api/v1/license/info`
pub async fn license_info_handler(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<LicenseInfoResponse>, ApiError> {
    let mut license = state
        .engine
        .get_organization_license(&caller.organization_id)
        .await
        .map_err(ApiError::from)?;

    if let Err(e) = state.engine.validate(Some(&mut license)).await {
        let event = match e {
            LicenseError::Expired(_) => LicenseEvent::Expired,
            _ => LicenseEvent::ValidationFailed,
        };
        log_license_event(event, &license.id, Some(&e.to_string()));
        return Err(ApiError::from(e));
    }
    log_license_event(LicenseEvent::Validated, &license.id, None);

    let now = state.engine.now();
    Ok(Json(LicenseInfoResponse {
        success: true,
        days_remaining: license.days_remaining(now),
        expiring_soon: license.expiring_soon(now),
        license,
    }))
}

// === Revoke (admin) ===

#[derive(Debug, Default, Deserialize)]
pub struct RevokeRequest {
    #[serde(default)]
    pub key: String,
}

/// `POST /api/v1/license/revoke`
pub async fn revoke_license_handler(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<RevokeRequest>, JsonRejection>,
) -> Result<Json<LicenseResponse>, ApiError> {
    caller.require_admin()?;
    let req = json_body(payload)?;
    if req.key.trim().is_empty() {
        return Err(ApiError::with_reason(
            ErrorCode::InvalidRequest,
            "License key is required",
        ));
    }

    let license = state.engine.revoke(req.key.trim()).await.map_err(ApiError::from)?;
    log_license_event(
        LicenseEvent::Revoked,
        &license.id,
        Some(&format!("by={}", caller.subject)),
    );

    Ok(Json(LicenseResponse {
        success: true,
        message: "License revoked".to_string(),
        license,
    }))
}

// === Entitlements (behind the enforcement gate) ===

#[derive(Debug, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub resource: ResourceKind,
    pub max: i64,
    /// `None` when the resource has no live counter.
    pub used: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntitlementsResponse {
    pub success: bool,
    pub organization_id: String,
    #[serde(rename = "type")]
    pub license_type: LicenseType,
    pub features: Vec<String>,
    pub limits: Vec<ResourceUsage>,
    pub expires_at: DateTime<Utc>,
}

/// `GET /api/v1/license/entitlements`
///
/// Reads the caller and license the gate resolved.
pub async fn entitlements_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Extension(license): Extension<License>,
) -> Json<EntitlementsResponse> {
    let mut limits = Vec::with_capacity(3);
    for kind in [
        ResourceKind::Users,
        ResourceKind::Workflows,
        ResourceKind::Executions,
    ] {
        let used = if ResourceKind::COUNTED.contains(&kind) {
            state
                .entitlements
                .usage(&caller.organization_id, kind)
                .await
                .ok()
        } else {
            None
        };
        limits.push(ResourceUsage {
            resource: kind,
            max: license.limit(kind),
            used,
        });
    }

    Json(EntitlementsResponse {
        success: true,
        organization_id: caller.organization_id,
        license_type: license.license_type,
        features: license.features,
        limits,
        expires_at: license.expires_at,
    })
}

// === Health ===

/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let backend = state.engine.store().backend();
    debug!("Health check ({backend})");
    Json(HealthResponse::healthy(backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::LicenseStatus;

    #[test]
    fn activation_failures_have_distinct_audit_events() {
        assert_eq!(
            activation_failure_event(&LicenseError::HardwareMismatch),
            LicenseEvent::HardwareMismatch
        );
        assert_eq!(
            activation_failure_event(&LicenseError::NotFound("KEY".into())),
            LicenseEvent::Denied
        );
        assert_eq!(
            activation_failure_event(&LicenseError::NotActive(LicenseStatus::Revoked)),
            LicenseEvent::Denied
        );
        assert_eq!(
            activation_failure_event(&LicenseError::Expired(Utc::now())),
            LicenseEvent::Expired
        );
        assert_eq!(
            activation_failure_event(&LicenseError::StoreUnavailable("down".into())),
            LicenseEvent::ValidationFailed
        );
    }
}
