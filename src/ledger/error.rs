//! Execution ledger error types.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by an execution ledger store
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger operation '{operation}' failed: {source}")]
    Database {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Ledger connection pool error: {source}")]
    ConnectionPool {
        #[source]
        source: anyhow::Error,
    },

    #[error("Execution record not found: {execution_id}")]
    NotFound { execution_id: Uuid },

    #[error("Ledger operation '{operation}' timed out after {}ms", .timeout.as_millis())]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Execution ledger is closed")]
    Closed,
}

impl LedgerError {
    pub fn database(operation: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        LedgerError::Database {
            operation: operation.into(),
            source: source.into(),
        }
    }
}

impl From<bb8::RunError<diesel_async::pooled_connection::PoolError>> for LedgerError {
    fn from(error: bb8::RunError<diesel_async::pooled_connection::PoolError>) -> Self {
        LedgerError::ConnectionPool {
            source: anyhow::Error::from(error),
        }
    }
}
