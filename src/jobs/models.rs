use diesel::prelude::*;
use jiff::Timestamp;
use jiff_diesel::ToDiesel;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::jobs::error::HandlerError;
use crate::jobs::types::{ExecutionStatus, Job};
use crate::schema::job_executions;

// ============================================================================
// Ledger records
// ============================================================================

/// One execution attempt of one job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub execution_id: Uuid,
    pub job_id: String,
    pub queue_name: String,
    pub attempt: i32,
    pub status: ExecutionStatus,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub duration_ms: Option<i64>,
    pub result: Option<JsonValue>,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
}

impl ExecutionRecord {
    /// A fresh `started` record for the current attempt of `job`.
    pub fn started(execution_id: Uuid, job: &Job, started_at: Timestamp) -> Self {
        Self {
            execution_id,
            job_id: job.id.to_string(),
            queue_name: job.queue_name.clone(),
            attempt: i32::try_from(job.attempt()).unwrap_or(i32::MAX),
            status: ExecutionStatus::Started,
            started_at,
            finished_at: None,
            duration_ms: None,
            result: None,
            error_message: None,
            error_stack: None,
        }
    }

    pub fn apply(&mut self, patch: &ExecutionPatch) {
        self.status = patch.status;
        self.finished_at = Some(patch.finished_at);
        self.duration_ms = Some(patch.duration_ms);
        if patch.result.is_some() {
            self.result = patch.result.clone();
        }
        if patch.error_message.is_some() {
            self.error_message = patch.error_message.clone();
        }
        if patch.error_stack.is_some() {
            self.error_stack = patch.error_stack.clone();
        }
    }
}

/// Finalization of a `started` record
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPatch {
    pub status: ExecutionStatus,
    pub finished_at: Timestamp,
    pub duration_ms: i64,
    pub result: Option<JsonValue>,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
}

impl ExecutionPatch {
    pub fn completed(finished_at: Timestamp, duration_ms: i64, result: JsonValue) -> Self {
        Self {
            status: ExecutionStatus::Completed,
            finished_at,
            duration_ms,
            result: Some(result),
            error_message: None,
            error_stack: None,
        }
    }

    pub fn failed(finished_at: Timestamp, duration_ms: i64, error: &HandlerError) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            finished_at,
            duration_ms,
            result: None,
            error_message: Some(error.message().to_string()),
            error_stack: error.trace().map(str::to_string),
        }
    }
}

// ============================================================================
// Diesel rows
// ============================================================================

#[derive(Debug, Insertable)]
#[diesel(table_name = job_executions)]
pub struct NewExecutionRow {
    pub execution_id: Uuid,
    pub job_id: String,
    pub queue_name: String,
    pub attempt: i32,
    pub status: ExecutionStatus,
    pub started_at: jiff_diesel::Timestamp,
}

impl From<&ExecutionRecord> for NewExecutionRow {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            execution_id: record.execution_id,
            job_id: record.job_id.clone(),
            queue_name: record.queue_name.clone(),
            attempt: record.attempt,
            status: record.status,
            started_at: record.started_at.to_diesel(),
        }
    }
}

/// `None` fields are left untouched by the update
#[derive(Debug, AsChangeset)]
#[diesel(table_name = job_executions)]
pub struct ExecutionChangeset {
    pub status: ExecutionStatus,
    pub finished_at: jiff_diesel::Timestamp,
    pub duration_ms: i64,
    pub result: Option<JsonValue>,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
}

impl From<&ExecutionPatch> for ExecutionChangeset {
    fn from(patch: &ExecutionPatch) -> Self {
        Self {
            status: patch.status,
            finished_at: patch.finished_at.to_diesel(),
            duration_ms: patch.duration_ms,
            result: patch.result.clone(),
            error_message: patch.error_message.clone(),
            error_stack: patch.error_stack.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::test_support::job;
    use serde_json::json;

    #[test]
    fn test_started_record_uses_one_based_attempt() {
        let mut j = job("report-generation", "42", json!({}));
        j.attempts_made = 2;

        let record = ExecutionRecord::started(Uuid::new_v4(), &j, Timestamp::now());
        assert_eq!(record.job_id, "42");
        assert_eq!(record.queue_name, "report-generation");
        assert_eq!(record.attempt, 3);
        assert_eq!(record.status, ExecutionStatus::Started);
        assert!(record.finished_at.is_none());
    }

    #[test]
    fn test_apply_failed_patch() {
        let j = job("webhook-relay", "7", json!({}));
        let mut record = ExecutionRecord::started(Uuid::new_v4(), &j, Timestamp::now());
        let error = HandlerError::retryable("502 from upstream").with_trace("relay -> post");

        record.apply(&ExecutionPatch::failed(Timestamp::now(), 15, &error));

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.duration_ms, Some(15));
        assert_eq!(record.error_message.as_deref(), Some("502 from upstream"));
        assert_eq!(record.error_stack.as_deref(), Some("relay -> post"));
        assert!(record.result.is_none());
    }

    #[test]
    fn test_apply_completed_patch() {
        let j = job("email-delivery", "8", json!({}));
        let mut record = ExecutionRecord::started(Uuid::new_v4(), &j, Timestamp::now());

        record.apply(&ExecutionPatch::completed(Timestamp::now(), 3, json!({"sent": true})));

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.result, Some(json!({"sent": true})));
        assert!(record.error_message.is_none());
    }
}
