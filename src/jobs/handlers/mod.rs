//! Handlers shipped with the binary.
//!
//! Business logic lives in the services behind `[services]`; these handlers
//! forward jobs to them and translate the response into a result or a
//! [`HandlerError`](crate::jobs::HandlerError).

mod maintenance;
mod service;
mod trigger;
mod webhook;

use std::sync::Arc;
use std::time::Duration;

pub use maintenance::{MaintenanceHandler, MaintenancePayload};
pub use service::ServiceHandler;
pub use trigger::TriggerHandler;
pub use webhook::{WebhookPayload, WebhookRelayHandler};

use reqwest::StatusCode;

use crate::config::Settings;
use crate::error::{AppError, AppResult};
use crate::jobs::error::HandlerError;
use crate::jobs::registry::JobRegistry;
use crate::jobs::role::QueueKind;
use crate::ledger::ExecutionLedger;
use crate::queue::QueueBackend;

/// Shared client for every outbound handler request
pub fn http_client(request_timeout: Duration) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(request_timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .gzip(true)
        .user_agent(concat!("taskhive/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e).context("failed to build HTTP client"),
        })
}

/// Registry with a handler for every queue that has one configured.
///
/// Service-backed queues without an endpoint are left out, so a role that
/// needs them fails to start with `UnknownQueue`.
pub fn build_registry(
    settings: &Settings,
    queue: Arc<dyn QueueBackend>,
    ledger: Arc<dyn ExecutionLedger>,
) -> AppResult<JobRegistry> {
    let client = http_client(settings.services.request_timeout())?;
    let mut registry = JobRegistry::new();

    for kind in QueueKind::ALL {
        match kind {
            QueueKind::WebhookRelay => {
                registry.register(kind, Arc::new(WebhookRelayHandler::new(client.clone())));
            }
            QueueKind::ScheduledTriggers => {
                registry.register(kind, Arc::new(TriggerHandler::new(queue.clone())));
            }
            QueueKind::Maintenance => {
                registry.register(
                    kind,
                    Arc::new(MaintenanceHandler::new(
                        ledger.clone(),
                        settings.ledger.retention_days,
                    )),
                );
            }
            _ => match settings.services.endpoint_for(kind) {
                Some(endpoint) => {
                    registry.register(
                        kind,
                        Arc::new(ServiceHandler::new(client.clone(), kind, endpoint)),
                    );
                }
                None => {
                    tracing::debug!(queue = %kind, "No service endpoint configured, queue has no handler");
                }
            },
        }
    }

    tracing::debug!(handlers = ?registry, "Handler registry built");
    Ok(registry)
}

/// Maps a non-success HTTP status to a handler error.
///
/// Client errors are permanent except timeouts and rate limiting.
fn status_error(status: StatusCode, body: &str) -> HandlerError {
    let message = if body.is_empty() {
        format!("upstream responded {status}")
    } else {
        format!("upstream responded {status}: {}", preview(body))
    };

    let permanent = status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS;
    if permanent {
        HandlerError::fatal(message)
    } else {
        HandlerError::retryable(message)
    }
}

fn preview(body: &str) -> &str {
    const MAX: usize = 512;
    if body.len() <= MAX {
        return body;
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// Parses a response body as JSON, keeping non-JSON bodies as a string.
fn body_to_json(body: String) -> serde_json::Value {
    if body.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServicesConfig;
    use crate::ledger::MemoryLedger;
    use crate::queue::{MemoryQueue, RetryPolicies};
    use serde_json::json;

    #[test]
    fn test_status_error_classification() {
        assert!(!status_error(StatusCode::BAD_REQUEST, "").is_retryable());
        assert!(!status_error(StatusCode::UNPROCESSABLE_ENTITY, "bad").is_retryable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(status_error(StatusCode::REQUEST_TIMEOUT, "").is_retryable());
        assert!(status_error(StatusCode::BAD_GATEWAY, "").is_retryable());

        let err = status_error(StatusCode::NOT_FOUND, "no such template");
        assert_eq!(err.message(), "upstream responded 404 Not Found: no such template");
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let body = "é".repeat(400);
        let cut = preview(&body);
        assert!(cut.len() <= 512);
        assert!(body.starts_with(cut));
    }

    #[test]
    fn test_body_to_json() {
        assert_eq!(body_to_json(String::new()), serde_json::Value::Null);
        assert_eq!(body_to_json("{\"ok\":true}".to_string()), json!({"ok": true}));
        assert_eq!(body_to_json("accepted".to_string()), json!("accepted"));
    }

    #[tokio::test]
    async fn test_registry_skips_queues_without_endpoint() {
        let settings = Settings {
            services: ServicesConfig {
                email_url: Some("http://127.0.0.1:9/email".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let registry = build_registry(
            &settings,
            Arc::new(MemoryQueue::new(RetryPolicies::default())),
            Arc::new(MemoryLedger::new()),
        )
        .unwrap();

        assert!(registry.contains(QueueKind::EmailDelivery));
        assert!(registry.contains(QueueKind::WebhookRelay));
        assert!(registry.contains(QueueKind::ScheduledTriggers));
        assert!(registry.contains(QueueKind::Maintenance));
        assert!(!registry.contains(QueueKind::DocumentProcessing));
        assert!(!registry.contains(QueueKind::AiProcessing));
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.get("email-delivery").unwrap().name(), "service");
    }
}
