//! API Gateway Library
//!
//! HTTP transport for the auth service: request validation, bearer
//! authentication, the JSON response envelope and error-to-status mapping.

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod response;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use auth_service_lib::build_authenticator;
use auth_service_lib::config::AuthServiceConfig;
use auth_service_lib::infra::Database;

use crate::config::GatewayConfig;
use crate::routes::create_router;
use crate::state::AppState;

/// Connect the store, apply migrations and serve HTTP until Ctrl-C.
pub async fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let auth_config = AuthServiceConfig::from_env()?;
    let db = Database::connect(&auth_config.database).await?;
    let auth = build_authenticator(db.into_connection(), &auth_config)?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let prefix = config.api_prefix.clone();
    let app = create_router(AppState::new(Arc::new(auth), config));

    info!(%addr, prefix = %prefix, "Gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
