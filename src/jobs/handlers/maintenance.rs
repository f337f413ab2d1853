use std::sync::Arc;

use async_trait::async_trait;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::config::validation::MAX_RETENTION_DAYS;
use crate::jobs::error::HandlerError;
use crate::jobs::types::{Job, JobHandler};
use crate::ledger::ExecutionLedger;

/// Payload of a maintenance job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum MaintenancePayload {
    /// Delete finished execution records older than the retention window
    PurgeExecutions {
        #[serde(default)]
        retention_days: Option<u32>,
    },
}

/// Housekeeping over the execution ledger
#[derive(Clone)]
pub struct MaintenanceHandler {
    ledger: Arc<dyn ExecutionLedger>,
    retention_days: u32,
}

impl std::fmt::Debug for MaintenanceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceHandler")
            .field("ledger", &self.ledger.name())
            .field("retention_days", &self.retention_days)
            .finish()
    }
}

impl MaintenanceHandler {
    pub fn new(ledger: Arc<dyn ExecutionLedger>, retention_days: u32) -> Self {
        Self {
            ledger,
            retention_days,
        }
    }

    async fn purge_executions(&self, retention_days: u32) -> Result<JsonValue, HandlerError> {
        if retention_days > MAX_RETENTION_DAYS {
            return Err(HandlerError::fatal(format!(
                "retention of {retention_days} days exceeds the {MAX_RETENTION_DAYS} day limit"
            )));
        }
        let cutoff = Timestamp::now()
            .checked_sub(SignedDuration::from_hours(i64::from(retention_days) * 24))
            .map_err(|e| {
                HandlerError::fatal(format!("retention of {retention_days} days is out of range: {e}"))
            })?;
        let deleted = self
            .ledger
            .purge_finished_before(cutoff)
            .await
            .map_err(|e| HandlerError::from_source("purging execution records", &e))?;

        tracing::info!(deleted, retention_days, cutoff = %cutoff, "Execution records purged");
        Ok(json!({"deleted": deleted, "retention_days": retention_days}))
    }
}

#[async_trait]
impl JobHandler for MaintenanceHandler {
    fn name(&self) -> &'static str {
        "maintenance"
    }

    async fn handle(&self, job: &Job) -> Result<JsonValue, HandlerError> {
        let payload: MaintenancePayload = job.payload_as()?;
        match payload {
            MaintenancePayload::PurgeExecutions { retention_days } => {
                self.purge_executions(retention_days.unwrap_or(self.retention_days))
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::models::{ExecutionPatch, ExecutionRecord};
    use crate::jobs::types::test_support::job;
    use crate::ledger::MemoryLedger;
    use crate::ledger::test_support::BrokenLedger;
    use uuid::Uuid;

    async fn finished_record(ledger: &MemoryLedger, id: &str, days_ago: i64) -> Uuid {
        let finished_at = Timestamp::now() - SignedDuration::from_hours(days_ago * 24);
        let record = ExecutionRecord::started(
            Uuid::new_v4(),
            &job("email-delivery", id, json!({})),
            finished_at,
        );
        ledger.insert(&record).await.unwrap();
        ledger
            .update(
                record.execution_id,
                &ExecutionPatch::completed(finished_at, 3, json!(null)),
            )
            .await
            .unwrap();
        record.execution_id
    }

    #[tokio::test]
    async fn test_purge_uses_configured_retention() {
        let ledger = Arc::new(MemoryLedger::new());
        finished_record(&ledger, "old", 45).await;
        let recent = finished_record(&ledger, "recent", 2).await;
        let handler = MaintenanceHandler::new(ledger.clone(), 30);

        let result = handler
            .handle(&job("maintenance", "m1", json!({"task": "purge_executions"})))
            .await
            .unwrap();

        assert_eq!(result, json!({"deleted": 1, "retention_days": 30}));
        assert_eq!(ledger.len(), 1);
        assert!(ledger.get(recent).is_some());
    }

    #[tokio::test]
    async fn test_purge_payload_overrides_retention() {
        let ledger = Arc::new(MemoryLedger::new());
        finished_record(&ledger, "a", 45).await;
        finished_record(&ledger, "b", 2).await;
        let handler = MaintenanceHandler::new(ledger.clone(), 30);

        let result = handler
            .handle(&job(
                "maintenance",
                "m2",
                json!({"task": "purge_executions", "retention_days": 1}),
            ))
            .await
            .unwrap();
        assert_eq!(result["deleted"], 2);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_task_is_fatal() {
        let handler = MaintenanceHandler::new(Arc::new(MemoryLedger::new()), 30);
        let err = handler
            .handle(&job("maintenance", "m3", json!({"task": "vacuum"})))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_out_of_range_retention_is_fatal() {
        let ledger = Arc::new(MemoryLedger::new());
        let kept = finished_record(&ledger, "kept", 45).await;
        let handler = MaintenanceHandler::new(ledger.clone(), 30);

        for retention_days in [MAX_RETENTION_DAYS + 1, 4_000_000_000] {
            let err = handler
                .handle(&job(
                    "maintenance",
                    "m5",
                    json!({"task": "purge_executions", "retention_days": retention_days}),
                ))
                .await
                .unwrap_err();
            assert!(!err.is_retryable(), "{retention_days}");
            assert!(err.message().contains("retention"));
        }
        assert!(ledger.get(kept).is_some());
    }

    #[tokio::test]
    async fn test_ledger_error_is_retryable() {
        let handler = MaintenanceHandler::new(Arc::new(BrokenLedger), 30);
        let err = handler
            .handle(&job("maintenance", "m4", json!({"task": "purge_executions"})))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
