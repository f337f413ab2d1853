//! Operator HTTP surface: health, pause/resume and runtime log level.
//!
//! Served only when `[health] enabled = true`.

mod error;
mod health;
mod logging;

use std::sync::Arc;

use axum::{Router, middleware};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use error::ErrorResponse;
pub use health::{HealthResponse, LogLevelRequest, LogLevelResponse, QueueStateResponse};

use crate::config::HealthConfig;
use crate::jobs::Orchestrator;
use crate::logger::LogLevelHandle;

/// Shared state of the operator endpoints
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub log_level: Option<LogLevelHandle>,
}

pub fn create_router(state: ApiState) -> Router {
    health::health_routes()
        .layer(middleware::from_fn(logging::logging_middleware))
        .with_state(state)
}

/// Binds the configured address and serves until `shutdown` is cancelled.
pub async fn serve(
    config: &HealthConfig,
    state: ApiState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let address = config.address();
    let listener = TcpListener::bind(&address).await.map_err(|e| {
        tracing::error!(error = %e, address = %address, "Failed to bind health endpoint");
        anyhow::anyhow!("Failed to bind to {}: {}", address, e)
    })?;
    tracing::info!(address = %address, "Health endpoint listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Health endpoint stopped");
    Ok(())
}
