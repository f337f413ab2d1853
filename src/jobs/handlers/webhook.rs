use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::jobs::error::HandlerError;
use crate::jobs::handlers::{body_to_json, status_error};
use crate::jobs::types::{Job, JobHandler};

fn default_method() -> String {
    "POST".to_string()
}

/// Payload of a webhook-relay job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: JsonValue,
}

impl WebhookPayload {
    fn method(&self) -> Result<Method, HandlerError> {
        Method::from_bytes(self.method.to_uppercase().as_bytes())
            .map_err(|_| HandlerError::fatal(format!("invalid webhook method '{}'", self.method)))
    }

    fn url(&self) -> Result<Url, HandlerError> {
        let url = Url::parse(&self.url)
            .map_err(|e| HandlerError::fatal(format!("invalid webhook url '{}': {}", self.url, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(HandlerError::fatal(format!(
                "unsupported webhook scheme '{scheme}'"
            ))),
        }
    }

    fn header_map(&self) -> Result<HeaderMap, HandlerError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| HandlerError::fatal(format!("invalid header name '{name}'")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| HandlerError::fatal(format!("invalid value for header '{name}'")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Delivers a JSON body to the URL named in the job payload
#[derive(Debug, Clone)]
pub struct WebhookRelayHandler {
    client: reqwest::Client,
}

impl WebhookRelayHandler {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobHandler for WebhookRelayHandler {
    fn name(&self) -> &'static str {
        "webhook-relay"
    }

    async fn handle(&self, job: &Job) -> Result<JsonValue, HandlerError> {
        let payload: WebhookPayload = job.payload_as()?;
        let url = payload.url()?;
        let method = payload.method()?;
        let headers = payload.header_map()?;

        let mut request = self.client.request(method, url).headers(headers);
        if !payload.body.is_null() {
            request = request.json(&payload.body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HandlerError::from_source(&format!("delivering webhook to {}", payload.url), &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| HandlerError::from_source("reading webhook response", &e))?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        Ok(json!({
            "status": status.as_u16(),
            "response": body_to_json(body),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::handlers::http_client;
    use crate::jobs::handlers::test_server::serve;
    use crate::jobs::types::test_support::job;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::{post, put};
    use axum::{Json, Router};
    use std::time::Duration;

    fn relay() -> WebhookRelayHandler {
        WebhookRelayHandler::new(http_client(Duration::from_secs(5)).unwrap())
    }

    #[tokio::test]
    async fn test_relays_body_and_headers() {
        let router = Router::new().route(
            "/hook",
            post(|headers: AxumHeaders, Json(body): Json<JsonValue>| async move {
                let signature = headers
                    .get("x-signature")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(json!({"signature": signature, "event": body["event"]}))
            }),
        );
        let base = serve(router).await;

        let result = relay()
            .handle(&job(
                "webhook-relay",
                "1",
                json!({
                    "url": format!("{base}/hook"),
                    "headers": {"X-Signature": "abc123"},
                    "body": {"event": "invoice.paid"},
                }),
            ))
            .await
            .unwrap();

        assert_eq!(result["status"], 200);
        assert_eq!(
            result["response"],
            json!({"signature": "abc123", "event": "invoice.paid"})
        );
    }

    #[tokio::test]
    async fn test_custom_method() {
        let router = Router::new().route("/hook", put(|| async { StatusCode::NO_CONTENT }));
        let base = serve(router).await;

        let result = relay()
            .handle(&job(
                "webhook-relay",
                "2",
                json!({"url": format!("{base}/hook"), "method": "put"}),
            ))
            .await
            .unwrap();
        assert_eq!(result, json!({"status": 204, "response": null}));
    }

    #[tokio::test]
    async fn test_gone_endpoint_is_fatal() {
        let router = Router::new().route("/hook", post(|| async { StatusCode::GONE }));
        let base = serve(router).await;

        let err = relay()
            .handle(&job("webhook-relay", "3", json!({"url": format!("{base}/hook")})))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_payloads_are_fatal() {
        let cases = [
            json!({}),
            json!({"url": "not a url"}),
            json!({"url": "ftp://example.com/x"}),
            json!({"url": "http://example.com", "method": "BAD METHOD"}),
            json!({"url": "http://example.com", "headers": {"bad header": "x"}}),
        ];
        for payload in cases {
            let err = relay()
                .handle(&job("webhook-relay", "4", payload.clone()))
                .await
                .unwrap_err();
            assert!(!err.is_retryable(), "{payload}");
        }
    }
}
