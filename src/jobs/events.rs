//! Worker pool events and the monitor that consumes them.
//!
//! Pools only emit events; logging of job outcomes and the counters behind
//! the health snapshot live in the monitor.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::jobs::error::HandlerError;
use crate::jobs::types::JobId;
use crate::queue::FailOutcome;

pub type EventSender = mpsc::UnboundedSender<PoolEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PoolEvent>;

/// Something that happened in a worker pool
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A job was leased and handed to the dispatcher
    Active {
        queue: String,
        job_id: JobId,
        attempt: u32,
    },
    /// Handler succeeded and the job was acked
    Completed {
        queue: String,
        job_id: JobId,
        attempt: u32,
        duration: Duration,
    },
    /// Handler failed and the backend recorded the failure
    Failed {
        queue: String,
        job_id: JobId,
        outcome: FailOutcome,
        error: HandlerError,
    },
    /// The stalled sweep returned an expired lease to the queue
    Stalled { queue: String, job_id: JobId },
    /// Pool-level infrastructure fault
    Error { queue: String, message: String },
}

impl PoolEvent {
    pub fn queue(&self) -> &str {
        match self {
            PoolEvent::Active { queue, .. }
            | PoolEvent::Completed { queue, .. }
            | PoolEvent::Failed { queue, .. }
            | PoolEvent::Stalled { queue, .. }
            | PoolEvent::Error { queue, .. } => queue,
        }
    }
}

/// Counters of one pool, written by the monitor and read by health checks
#[derive(Debug, Default)]
pub struct PoolStats {
    processed: AtomicU64,
    failed: AtomicU64,
    stalled: AtomicU64,
    last_error: Mutex<Option<String>>,
}

/// Point-in-time copy of [`PoolStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolCounters {
    pub processed: u64,
    pub failed: u64,
    pub stalled: u64,
    pub last_error: Option<String>,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolCounters {
        PoolCounters {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            stalled: self.stalled.load(Ordering::Relaxed),
            last_error: self.last_error.lock().ok().and_then(|e| e.clone()),
        }
    }

    fn record(&self, event: &PoolEvent) {
        match event {
            PoolEvent::Active { .. } => {}
            PoolEvent::Completed { .. } => {
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            PoolEvent::Failed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            PoolEvent::Stalled { .. } => {
                self.stalled.fetch_add(1, Ordering::Relaxed);
            }
            PoolEvent::Error { message, .. } => {
                if let Ok(mut last) = self.last_error.lock() {
                    *last = Some(message.clone());
                }
            }
        }
    }
}

/// Single consumer of every pool's events
pub struct EventMonitor {
    stats: BTreeMap<String, Arc<PoolStats>>,
}

impl EventMonitor {
    pub fn new(stats: BTreeMap<String, Arc<PoolStats>>) -> Self {
        Self { stats }
    }

    /// Consume events until every sender is dropped.
    pub fn spawn(self, mut events: EventReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle(&event);
            }
            tracing::debug!("Event monitor finished");
        })
    }

    fn handle(&self, event: &PoolEvent) {
        log_event(event);
        if let Some(stats) = self.stats.get(event.queue()) {
            stats.record(event);
        }
    }
}

fn log_event(event: &PoolEvent) {
    match event {
        PoolEvent::Active {
            queue,
            job_id,
            attempt,
        } => {
            tracing::debug!(queue = %queue, job_id = %job_id, attempt, "Job started");
        }
        PoolEvent::Completed {
            queue,
            job_id,
            attempt,
            duration,
        } => {
            tracing::info!(
                queue = %queue,
                job_id = %job_id,
                attempt,
                duration_ms = duration.as_millis() as u64,
                "Job completed"
            );
        }
        PoolEvent::Failed {
            queue,
            job_id,
            outcome,
            error,
        } => match outcome {
            FailOutcome::Retrying {
                attempts_made,
                delay,
            } => {
                tracing::warn!(
                    queue = %queue,
                    job_id = %job_id,
                    attempts_made,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %error,
                    "Job failed, retry scheduled"
                );
            }
            FailOutcome::DeadLettered { attempts_made } => {
                tracing::error!(
                    queue = %queue,
                    job_id = %job_id,
                    attempts_made,
                    retryable = error.is_retryable(),
                    error = %error,
                    "Job failed permanently"
                );
            }
        },
        PoolEvent::Stalled { queue, job_id } => {
            tracing::warn!(queue = %queue, job_id = %job_id, "Job stalled, lease expired");
        }
        PoolEvent::Error { queue, message } => {
            tracing::error!(queue = %queue, error = %message, "Worker pool error");
        }
    }
}
