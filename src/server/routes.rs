use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::gate::gated;
use crate::server::handlers::{
    activate_license_handler, entitlements_handler, generate_license_handler, health_handler,
    license_info_handler, revoke_license_handler, AppState,
};
use crate::server::logging::request_logging_middleware;

/// Build the HTTP router.
///
/// | Route | Access |
/// |-------|--------|
/// | `GET /health` | public |
/// | `POST /api/v1/license/generate` | admin token |
/// | `POST /api/v1/license/revoke` | admin token |
/// | `POST /api/v1/license/activate` | any token |
/// | `GET /api/v1/license/info` | any token |
/// | `GET /api/v1/license/entitlements` | enforcement gate |
pub fn build_router(state: AppState) -> Router {
    let protected = gated(
        Router::new().route("/api/v1/license/entitlements", get(entitlements_handler)),
        state.clone(),
        None,
    );

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/license/generate", post(generate_license_handler))
        .route("/api/v1/license/revoke", post(revoke_license_handler))
        .route("/api/v1/license/activate", post(activate_license_handler))
        .route("/api/v1/license/info", get(license_info_handler))
        .merge(protected)
        .layer(middleware::from_fn(request_logging_middleware))
        .with_state(state)
}
