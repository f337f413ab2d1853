use thiserror::Error;

use crate::config::error::ConfigError;
use crate::ledger::LedgerError;
use crate::queue::QueueError;

/// Application-wide error type for the orchestration layer.
///
/// Job-level failures are not represented here: handlers return
/// [`crate::jobs::HandlerError`], which travels unchanged to the queue
/// backend. `AppError` covers startup, operator and infrastructure faults.
#[derive(Error, Debug)]
pub enum AppError {
    /// Deployment role string did not match any known role
    #[error("Unknown worker role '{role}'. Valid roles are: primary, document, ai, scheduled, all")]
    UnknownWorkerRole { role: String },

    /// No handler is registered for the queue
    #[error("Unknown queue: {queue}")]
    UnknownQueue { queue: String },

    /// Operational request against a queue that has no active pool
    #[error("No active worker pool for queue: {queue}")]
    PoolNotFound { queue: String },

    /// Queue backend fault (connection loss, protocol error)
    #[error("Queue backend error on {queue}")]
    Infrastructure {
        queue: String,
        #[source]
        source: QueueError,
    },

    /// Execution ledger could not be reached or written
    #[error("Execution ledger error")]
    Ledger {
        #[from]
        source: LedgerError,
    },

    /// Validation error with field-specific details
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Database operation error with operation context
    #[error("Database operation failed: {operation}")]
    Database {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// Configuration error with key information
    #[error("Configuration error: {key}")]
    Configuration {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Connection pool error
    #[error("Connection pool error")]
    ConnectionPool {
        #[source]
        source: anyhow::Error,
    },

    /// Internal error for unexpected failures
    #[error("Internal error")]
    Internal {
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    /// Wraps a queue fault with the queue it happened on.
    pub fn infrastructure(queue: impl Into<String>, source: QueueError) -> Self {
        AppError::Infrastructure {
            queue: queue.into(),
            source,
        }
    }

    /// Whether this error must abort process start.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            AppError::UnknownWorkerRole { .. }
                | AppError::UnknownQueue { .. }
                | AppError::Configuration { .. }
                | AppError::Validation { .. }
        )
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal { source: error }
    }
}

impl From<ConfigError> for AppError {
    fn from(error: ConfigError) -> Self {
        let key = match &error {
            ConfigError::ValidationError { field, .. } => field.clone(),
            _ => "settings".to_string(),
        };
        AppError::Configuration {
            key,
            source: anyhow::Error::from(error),
        }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(error: diesel::result::Error) -> Self {
        AppError::Database {
            operation: "database operation".to_string(),
            source: anyhow::Error::from(error),
        }
    }
}

impl From<bb8::RunError<diesel_async::pooled_connection::PoolError>> for AppError {
    fn from(error: bb8::RunError<diesel_async::pooled_connection::PoolError>) -> Self {
        AppError::ConnectionPool {
            source: anyhow::Error::from(error),
        }
    }
}

/// Type alias for Result with AppError to simplify function signatures
pub type AppResult<T> = Result<T, AppError>;
