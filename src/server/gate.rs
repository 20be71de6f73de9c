//! Enforcement gate for license-protected routes.
//!
//! Stages, each all-or-nothing before the wrapped handler runs:
//!
//! 1. authenticate the bearer token (401)
//! 2. resolve the caller's organization (500)
//! 3. require an active, unexpired license (403, `license_required`)
//! 4. require the route's [`RequiredFeature`], if any (403)
//! 5. require quota headroom (403)
//!
//! On success the [`Caller`] and the resolved [`License`] are placed in the
//! request extensions.
//!
//! ```rust,ignore
//! let sso = Router::new().route("/sso/config", get(sso_config));
//! let router = gated(sso, state.clone(), Some("sso"));
//! ```

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Extension, Router,
};
use tracing::warn;

use crate::errors::LicenseError;
use crate::license::License;
use crate::server::api_error::{ApiError, ErrorCode};
use crate::server::auth::Caller;
use crate::server::handlers::AppState;
use crate::server::logging::{log_license_event, LicenseEvent};

/// Feature token a route requires, matched by prefix against the license.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredFeature(pub String);

impl RequiredFeature {
    pub fn new(feature: impl Into<String>) -> Self {
        Self(feature.into())
    }
}

/// Put every route of `router` behind the gate, optionally requiring `feature`.
pub fn gated(router: Router<AppState>, state: AppState, feature: Option<&str>) -> Router<AppState> {
    let router = router.route_layer(middleware::from_fn_with_state(state, enforce_license));
    match feature {
        // Added last so it runs first and the gate can see it.
        Some(feature) => router.route_layer(Extension(RequiredFeature::new(feature))),
        None => router,
    }
}

/// Axum middleware implementing the gate.
pub async fn enforce_license(
    State(state): State<AppState>,
    caller: Caller,
    mut request: Request,
    next: Next,
) -> Response {
    let feature = request.extensions().get::<RequiredFeature>().cloned();

    match authorize(&state, &caller, feature.as_ref()).await {
        Ok(license) => {
            request.extensions_mut().insert(caller);
            request.extensions_mut().insert(license);
            next.run(request).await
        }
        Err(denial) => denial.into_response(),
    }
}

fn deny(subject: &str, reason: &str) {
    log_license_event(LicenseEvent::Denied, subject, Some(reason));
}

async fn authorize(
    state: &AppState,
    caller: &Caller,
    feature: Option<&RequiredFeature>,
) -> Result<License, ApiError> {
    let org = caller.organization_id.as_str();

    if let Err(e) = state.directory.get_organization(org).await {
        warn!("Organization lookup failed for '{org}': {e}");
        deny(org, "organization unavailable");
        return Err(ApiError::new(ErrorCode::OrganizationUnavailable));
    }

    let mut license = match state.engine.get_organization_license(org).await {
        Ok(license) => license,
        Err(e) if e.is_transient() => return Err(ApiError::from(e)),
        Err(_) => {
            deny(org, "no active license");
            return Err(ApiError::license_required());
        }
    };

    if let Err(e) = state.engine.validate(Some(&mut license)).await {
        if e.is_transient() {
            return Err(ApiError::from(e));
        }
        let event = match e {
            LicenseError::Expired(_) => LicenseEvent::Expired,
            _ => LicenseEvent::ValidationFailed,
        };
        log_license_event(event, &license.id, Some(&e.to_string()));
        return Err(ApiError::license_required());
    }

    if let Some(RequiredFeature(token)) = feature {
        if !state.entitlements.has_feature(org, token).await {
            deny(&license.id, &format!("feature '{token}' not included"));
            return Err(ApiError::feature_not_included(token));
        }
    }

    if let Err(e) = state.entitlements.check_limits(org).await {
        deny(&license.id, &e.to_string());
        return Err(match e {
            LicenseError::LimitExceeded { .. } | LicenseError::StoreUnavailable(_) => {
                ApiError::from(e)
            }
            // A limit that cannot be evaluated still denies.
            _ => ApiError::with_reason(ErrorCode::QuotaExceeded, "Unable to verify license limits"),
        });
    }

    Ok(license)
}
