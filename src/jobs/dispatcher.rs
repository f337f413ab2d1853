//! Wraps a handler with execution tracking.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value as JsonValue;
use tokio::time::Instant;

use crate::jobs::error::HandlerError;
use crate::jobs::tracker::ExecutionTracker;
use crate::jobs::types::{Job, JobHandler};
use crate::lifecycle::contain_panics;

/// Runs a handler between `track_start` and `track_complete`/`track_failed`.
///
/// The handler's result or error is returned unchanged. A panic inside the
/// handler becomes a retryable `HandlerError`.
#[derive(Clone)]
pub struct InstrumentedDispatcher {
    handler: Arc<dyn JobHandler>,
    tracker: Arc<ExecutionTracker>,
    slow_job_warning: Option<Duration>,
}

impl InstrumentedDispatcher {
    pub fn new(handler: Arc<dyn JobHandler>, tracker: Arc<ExecutionTracker>) -> Self {
        Self {
            handler,
            tracker,
            slow_job_warning: None,
        }
    }

    /// Log a warning when a handler runs longer than `threshold`; the
    /// handler keeps running.
    pub fn with_slow_job_warning(mut self, threshold: Option<Duration>) -> Self {
        self.slow_job_warning = threshold;
        self
    }

    pub fn handler_name(&self) -> &'static str {
        self.handler.name()
    }

    pub async fn dispatch(&self, job: &Job) -> Result<JsonValue, HandlerError> {
        let execution_id = self.tracker.track_start(job).await;

        let outcome = self.invoke(job).await;
        match &outcome {
            Ok(result) => self.tracker.track_complete(job, result, execution_id).await,
            Err(error) => self.tracker.track_failed(job, error, execution_id).await,
        }
        outcome
    }

    async fn invoke(&self, job: &Job) -> Result<JsonValue, HandlerError> {
        let started = Instant::now();
        let run = AssertUnwindSafe(contain_panics(self.handler.handle(job))).catch_unwind();

        let caught = match self.slow_job_warning {
            None => run.await,
            Some(threshold) => {
                tokio::pin!(run);
                tokio::select! {
                    caught = &mut run => caught,
                    _ = tokio::time::sleep(threshold) => {
                        tracing::warn!(
                            queue = %job.queue_name,
                            job_id = %job.id,
                            attempt = job.attempt(),
                            handler = self.handler.name(),
                            threshold_ms = threshold.as_millis() as u64,
                            "Job is running longer than the slow-job threshold"
                        );
                        run.await
                    }
                }
            }
        };

        caught.unwrap_or_else(|panic| {
            tracing::error!(
                queue = %job.queue_name,
                job_id = %job.id,
                handler = self.handler.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Handler panicked"
            );
            Err(HandlerError::retryable(format!(
                "handler {} panicked: {}",
                self.handler.name(),
                panic_message(panic.as_ref())
            )))
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}
