use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use tollgate::config::{get_config, init_tracing};
use tollgate::directory::InMemoryDirectory;
use tollgate::errors::{LicenseError, LicenseResult};
use tollgate::lifecycle::LicenseEngine;
use tollgate::server::{build_router, AppState, JwtValidator};
use tollgate::store::open_store;

#[tokio::main]
async fn main() {
    if let Err(e) = serve().await {
        error!("Server failed: {e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn serve() -> LicenseResult<()> {
    let config = get_config()?;
    init_tracing(&config.logging);

    let store = open_store(&config.store).await?;
    let engine = LicenseEngine::with_system_clock(store);

    // Organizations live in the host application; standalone, any
    // organization named by a valid token is accepted with zero usage.
    let directory = Arc::new(InMemoryDirectory::accepting_any());

    let state = AppState::new(
        engine,
        directory.clone(),
        directory,
        JwtValidator::from_config(&config.auth)?,
        config.license.clone(),
    );
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| LicenseError::ConfigError(format!("invalid server address: {e}")))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| LicenseError::ConfigError(format!("failed to bind {addr}: {e}")))?;
    info!("Tollgate listening on http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|e| LicenseError::ConfigError(format!("server error: {e}")))
}
