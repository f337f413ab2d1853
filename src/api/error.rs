//! HTTP mapping of [`AppError`].

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::AppError;

/// Standard error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    /// - `PoolNotFound`, `UnknownQueue` -> 404
    /// - `Validation`, `UnknownWorkerRole` -> 400
    /// - `Infrastructure`, `ConnectionPool` -> 503
    /// - everything else -> 500 with the message hidden
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::PoolNotFound { .. } => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new("POOL_NOT_FOUND", self.to_string()),
            ),
            AppError::UnknownQueue { .. } => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new("UNKNOWN_QUEUE", self.to_string()),
            ),
            AppError::UnknownWorkerRole { .. } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("UNKNOWN_WORKER_ROLE", self.to_string()),
            ),
            AppError::Validation { field, reason } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("VALIDATION_ERROR", format!("Invalid {field}"))
                    .with_details(reason.clone()),
            ),
            AppError::Infrastructure { queue, .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::new("QUEUE_UNAVAILABLE", format!("Queue backend unavailable for {queue}")),
            ),
            AppError::ConnectionPool { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::new("SERVICE_UNAVAILABLE", "Service temporarily unavailable"),
            ),
            AppError::Ledger { .. }
            | AppError::Database { .. }
            | AppError::Configuration { .. }
            | AppError::Internal { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("INTERNAL_ERROR", "An internal error occurred"),
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                AppError::PoolNotFound {
                    queue: "ai-processing".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::Validation {
                    field: "level".into(),
                    reason: "bad".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::infrastructure("email-delivery", QueueError::Closed),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AppError::Internal {
                    source: anyhow::anyhow!("boom"),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
