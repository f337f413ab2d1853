//! Health and operator endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::api::ApiState;
use crate::error::{AppError, AppResult};
use crate::jobs::HealthStatus;

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub version: &'static str,
    #[serde(flatten)]
    pub status: HealthStatus,
}

/// Result of a pause or resume request
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStateResponse {
    pub queue: String,
    pub paused: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogLevelRequest {
    pub level: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLevelResponse {
    pub level: String,
}

/// - `GET /health`
/// - `GET /health/live`
/// - `POST /queues/{queue}/pause`
/// - `POST /queues/{queue}/resume`
/// - `PUT /log-level`
pub fn health_routes() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness_check))
        .route("/queues/{queue}/pause", post(pause_queue))
        .route("/queues/{queue}/resume", post(resume_queue))
        .route("/log-level", put(set_log_level))
}

/// 200 while the orchestrator runs, 503 otherwise; the body is the same.
pub async fn health_check(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let status = state.orchestrator.health_status();
    let code = if status.is_running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            version: crate::pkg_version(),
            status,
        }),
    )
}

pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

pub async fn pause_queue(
    State(state): State<ApiState>,
    Path(queue): Path<String>,
) -> AppResult<Json<QueueStateResponse>> {
    state.orchestrator.pause(&queue)?;
    tracing::info!(queue = %queue, "Queue paused by operator");
    Ok(Json(QueueStateResponse {
        queue,
        paused: true,
    }))
}

pub async fn resume_queue(
    State(state): State<ApiState>,
    Path(queue): Path<String>,
) -> AppResult<Json<QueueStateResponse>> {
    state.orchestrator.resume(&queue)?;
    tracing::info!(queue = %queue, "Queue resumed by operator");
    Ok(Json(QueueStateResponse {
        queue,
        paused: false,
    }))
}

pub async fn set_log_level(
    State(state): State<ApiState>,
    Json(request): Json<LogLevelRequest>,
) -> AppResult<Json<LogLevelResponse>> {
    let Some(handle) = state.log_level.as_ref() else {
        return Err(AppError::Validation {
            field: "level".to_string(),
            reason: "runtime log level changes are not available".to_string(),
        });
    };

    handle.set_level(&request.level).map_err(|e| AppError::Validation {
        field: "level".to_string(),
        reason: e.to_string(),
    })?;
    tracing::info!(level = %request.level, "Log level changed");

    Ok(Json(LogLevelResponse {
        level: handle.current_level().unwrap_or(request.level),
    }))
}
