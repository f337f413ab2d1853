use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::QueueError;

/// Job-level failure returned by a handler.
///
/// The value travels unchanged from the handler through the dispatcher to
/// the queue backend's `fail` path, which uses `retryable` to pick between
/// a backoff retry and the dead-letter list.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace: Option<String>,
}

impl HandlerError {
    /// A transient failure; the backend may retry the job.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            trace: None,
        }
    }

    /// A permanent failure; retrying cannot succeed.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            trace: None,
        }
    }

    /// Attach a stack or cause chain, stored as the execution's `error_stack`.
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// Builds a retryable error whose trace is the full `source()` chain.
    pub fn from_source(context: &str, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = vec![error.to_string()];
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self::retryable(format!("{context}: {error}")).with_trace(chain.join("\ncaused by: "))
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }
}

/// Errors raised while registering or running cron triggers
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression for schedule '{name}': {message}")]
    InvalidCronExpression { name: String, message: String },

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Failed to enqueue trigger for schedule '{name}'")]
    Enqueue {
        name: String,
        #[source]
        source: QueueError,
    },
}

impl From<tokio_cron_scheduler::JobSchedulerError> for SchedulerError {
    fn from(error: tokio_cron_scheduler::JobSchedulerError) -> Self {
        SchedulerError::Scheduler(error.to_string())
    }
}
