use std::fmt;

use async_trait::async_trait;
use diesel_derive_enum::DbEnum;
use jiff::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::jobs::error::HandlerError;

/// Queue-assigned job identifier; opaque to the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A leased unit of work. Delivery state lives in the queue backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue_name: String,
    pub payload: JsonValue,
    /// Attempts finished before this lease
    pub attempts_made: u32,
    pub created_at: Timestamp,
    pub processed_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl Job {
    /// 1-based number of the attempt this lease represents.
    pub fn attempt(&self) -> u32 {
        self.attempts_made + 1
    }

    /// Deserializes the payload; a malformed payload can never succeed on retry.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            HandlerError::fatal(format!(
                "invalid payload for job {} on {}: {}",
                self.id, self.queue_name, e
            ))
        })
    }
}

/// Lifecycle status of one execution record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::ExecutionStatus")]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Started,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, ExecutionStatus::Started)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Started => write!(f, "started"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Business logic for one job category.
///
/// Handlers only see the job; tracking, acking and retry decisions happen
/// around them. Returning `Err` hands the error to the queue backend as is.
#[async_trait]
pub trait JobHandler: Send + Sync + fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn handle(&self, job: &Job) -> Result<JsonValue, HandlerError>;
}
