use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};

use crate::jobs::error::HandlerError;
use crate::jobs::handlers::{body_to_json, status_error};
use crate::jobs::role::QueueKind;
use crate::jobs::types::{Job, JobHandler};

/// Forwards jobs to the service that owns the queue's business logic.
///
/// The service receives `{job_id, queue, attempt, payload}` and its JSON
/// response body becomes the job result.
#[derive(Debug, Clone)]
pub struct ServiceHandler {
    client: reqwest::Client,
    queue: QueueKind,
    endpoint: String,
}

impl ServiceHandler {
    pub fn new(client: reqwest::Client, queue: QueueKind, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            queue,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl JobHandler for ServiceHandler {
    fn name(&self) -> &'static str {
        "service"
    }

    async fn handle(&self, job: &Job) -> Result<JsonValue, HandlerError> {
        let request = json!({
            "job_id": job.id,
            "queue": self.queue,
            "attempt": job.attempt(),
            "payload": job.payload,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| HandlerError::from_source(&format!("calling {}", self.endpoint), &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| HandlerError::from_source("reading service response", &e))?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        tracing::debug!(
            queue = %self.queue,
            job_id = %job.id,
            status = status.as_u16(),
            "Service accepted job"
        );
        Ok(body_to_json(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::handlers::http_client;
    use crate::jobs::handlers::test_server::serve;
    use crate::jobs::types::test_support::job;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::time::Duration;

    async fn handler_for(router: Router, path: &str) -> ServiceHandler {
        let base = serve(router).await;
        ServiceHandler::new(
            http_client(Duration::from_secs(5)).unwrap(),
            QueueKind::DocumentProcessing,
            format!("{base}{path}"),
        )
    }

    #[tokio::test]
    async fn test_success_returns_response_body() {
        let router = Router::new().route(
            "/process",
            post(|Json(body): Json<JsonValue>| async move {
                Json(json!({
                    "echo_queue": body["queue"],
                    "echo_attempt": body["attempt"],
                    "pages": body["payload"]["pages"],
                }))
            }),
        );
        let handler = handler_for(router, "/process").await;

        let result = handler
            .handle(&job("document-processing", "7", json!({"pages": 12})))
            .await
            .unwrap();
        assert_eq!(
            result,
            json!({"echo_queue": "document-processing", "echo_attempt": 1, "pages": 12})
        );
    }

    #[tokio::test]
    async fn test_client_error_is_fatal() {
        let router = Router::new().route(
            "/process",
            post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "unsupported format") }),
        );
        let handler = handler_for(router, "/process").await;

        let err = handler
            .handle(&job("document-processing", "8", json!({})))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.message().contains("unsupported format"));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let router = Router::new().route(
            "/process",
            post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let handler = handler_for(router, "/process").await;

        let err = handler
            .handle(&job("document-processing", "9", json!({})))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_retryable() {
        let handler = ServiceHandler::new(
            http_client(Duration::from_secs(5)).unwrap(),
            QueueKind::AiProcessing,
            "http://127.0.0.1:9/never",
        );

        let err = handler
            .handle(&job("ai-processing", "10", json!({})))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.message().starts_with("calling http://127.0.0.1:9/never"));
        assert!(err.trace().is_some());
    }
}
