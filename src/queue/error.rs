//! Queue backend error types.

use thiserror::Error;

/// Errors raised by a queue backend. Always infrastructure faults; job
/// failures travel as `HandlerError` instead.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue operation failed: {0}")]
    Operation(String),

    #[error("Queue connection failed: {0}")]
    Connection(String),

    #[error("Job data could not be encoded or decoded: {0}")]
    Serialization(String),

    /// Ack/fail/extend for a job whose lease expired or was never granted
    #[error("Job {job_id} holds no lease on queue {queue}")]
    NotLeased { queue: String, job_id: String },

    #[error("Queue backend is closed")]
    Closed,
}

impl From<serde_json::Error> for QueueError {
    fn from(error: serde_json::Error) -> Self {
        QueueError::Serialization(error.to_string())
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(error: redis::RedisError) -> Self {
        if error.is_io_error() || error.is_connection_dropped() || error.is_connection_refusal() {
            QueueError::Connection(error.to_string())
        } else {
            QueueError::Operation(error.to_string())
        }
    }
}
