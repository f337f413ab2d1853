//! Records the lifecycle of every execution into the ledger.
//!
//! Ledger write failures are logged and swallowed: tracking never changes
//! whether a job runs or how its outcome is reported to the queue. Each
//! write is bounded by a timeout so an unresponsive ledger cannot hold a
//! job back.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use jiff::Timestamp;
use serde_json::{Value as JsonValue, json};
use tokio::time::Instant;
use uuid::Uuid;

use crate::jobs::error::HandlerError;
use crate::jobs::models::{ExecutionPatch, ExecutionRecord};
use crate::jobs::types::Job;
use crate::ledger::{ExecutionLedger, LedgerError};

/// Bytes reserved for the truncation marker around the preview
const TRUNCATION_OVERHEAD: usize = 128;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Writes `started`/`completed`/`failed` records for job executions
pub struct ExecutionTracker {
    ledger: Arc<dyn ExecutionLedger>,
    summary_limit: usize,
    write_timeout: Duration,
    started: DashMap<Uuid, Instant>,
}

impl ExecutionTracker {
    pub fn new(ledger: Arc<dyn ExecutionLedger>, summary_limit: usize) -> Self {
        Self {
            ledger,
            summary_limit,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            started: DashMap::new(),
        }
    }

    /// Abandon any single ledger write that takes longer than `timeout`.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Inserts a `started` record and returns its execution id.
    ///
    /// The id is returned even when the insert fails.
    pub async fn track_start(&self, job: &Job) -> Uuid {
        let execution_id = Uuid::new_v4();
        self.started.insert(execution_id, Instant::now());

        let record = ExecutionRecord::started(execution_id, job, Timestamp::now());
        if let Err(error) = self.bounded("insert execution", self.ledger.insert(&record)).await {
            log_write_error("start", job, execution_id, &error);
        }
        execution_id
    }

    pub async fn track_complete(&self, job: &Job, result: &JsonValue, execution_id: Uuid) {
        let patch = ExecutionPatch::completed(
            Timestamp::now(),
            self.elapsed_ms(execution_id),
            summarize_result(result, self.summary_limit),
        );
        if let Err(error) = self
            .bounded("finalize execution", self.ledger.update(execution_id, &patch))
            .await
        {
            log_write_error("complete", job, execution_id, &error);
        }
    }

    pub async fn track_failed(&self, job: &Job, error: &HandlerError, execution_id: Uuid) {
        let patch = ExecutionPatch::failed(Timestamp::now(), self.elapsed_ms(execution_id), error);
        if let Err(write_error) = self
            .bounded("finalize execution", self.ledger.update(execution_id, &patch))
            .await
        {
            log_write_error("fail", job, execution_id, &write_error);
        }
    }

    async fn bounded<F>(&self, operation: &'static str, write: F) -> Result<(), LedgerError>
    where
        F: Future<Output = Result<(), LedgerError>>,
    {
        tokio::time::timeout(self.write_timeout, write)
            .await
            .unwrap_or_else(|_| {
                Err(LedgerError::Timeout {
                    operation,
                    timeout: self.write_timeout,
                })
            })
    }

    fn elapsed_ms(&self, execution_id: Uuid) -> i64 {
        self.started
            .remove(&execution_id)
            .map(|(_, started)| duration_ms(started.elapsed()))
            .unwrap_or_default()
    }
}

fn duration_ms(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

fn log_write_error(stage: &str, job: &Job, execution_id: Uuid, error: &LedgerError) {
    tracing::error!(
        queue = %job.queue_name,
        job_id = %job.id,
        execution_id = %execution_id,
        attempt = job.attempt(),
        stage,
        error = %error,
        "Execution tracking write failed"
    );
}

/// Bounded copy of a handler result for the ledger.
///
/// Results whose serialized form exceeds `limit` bytes are replaced by a
/// marker carrying the original size and a prefix of the serialized text.
pub fn summarize_result(result: &JsonValue, limit: usize) -> JsonValue {
    let serialized = result.to_string();
    if serialized.len() <= limit {
        return result.clone();
    }

    // Re-escaping the preview at most doubles it
    let budget = limit.saturating_sub(TRUNCATION_OVERHEAD) / 2;
    let mut end = budget.min(serialized.len());
    while !serialized.is_char_boundary(end) {
        end -= 1;
    }

    json!({
        "truncated": true,
        "original_bytes": serialized.len(),
        "preview": &serialized[..end],
    })
}
