//! QueueBackend trait definition.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::jobs::{HandlerError, Job, JobId};
use crate::queue::QueueError;

/// What the backend did with a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Rescheduled after `delay`
    Retrying { attempts_made: u32, delay: Duration },
    /// Moved to the dead-letter list; no further attempts
    DeadLettered { attempts_made: u32 },
}

impl FailOutcome {
    pub fn attempts_made(&self) -> u32 {
        match self {
            FailOutcome::Retrying { attempts_made, .. }
            | FailOutcome::DeadLettered { attempts_made } => *attempts_made,
        }
    }

    pub fn is_dead_lettered(&self) -> bool {
        matches!(self, FailOutcome::DeadLettered { .. })
    }
}

/// Durable at-least-once queue.
///
/// A leased job is invisible to other consumers until `lease_for` elapses.
/// Expired leases are returned to the waiting list by `reclaim_stalled`.
/// Implementations are shared across pools as `Arc<dyn QueueBackend>` and
/// must pool their own connections.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Add a job to the tail of `queue`.
    async fn enqueue(&self, queue: &str, payload: JsonValue) -> Result<JobId, QueueError>;

    /// Take the next due job, if any, holding it for `lease_for`.
    async fn lease(&self, queue: &str, lease_for: Duration) -> Result<Option<Job>, QueueError>;

    /// Push the lease deadline of a running job out to now + `lease_for`.
    async fn extend_lease(&self, job: &Job, lease_for: Duration) -> Result<(), QueueError>;

    /// Mark a leased job as done.
    async fn ack(&self, job: &Job) -> Result<(), QueueError>;

    /// Report a failed attempt; the backend applies the queue's retry policy.
    async fn fail(&self, job: &Job, error: &HandlerError) -> Result<FailOutcome, QueueError>;

    /// Return jobs whose lease expired to the waiting list.
    async fn reclaim_stalled(&self, queue: &str) -> Result<Vec<JobId>, QueueError>;

    /// Release connections. Further calls fail with `QueueError::Closed`.
    async fn close(&self) -> Result<(), QueueError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}
