use axum::{extract::Request, middleware::Next, response::Response};
use tokio::time::Instant;
use tracing::Instrument;

/// Logs each operator request with its status and duration.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let span = tracing::debug_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path()
    );

    async move {
        let start = Instant::now();
        let response = next.run(request).await;
        tracing::debug!(
            status = response.status().as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Request handled"
        );
        response
    }
    .instrument(span)
    .await
}
