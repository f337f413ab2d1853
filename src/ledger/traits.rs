//! ExecutionLedger trait definition.

use async_trait::async_trait;
use jiff::Timestamp;
use uuid::Uuid;

use crate::jobs::models::{ExecutionPatch, ExecutionRecord};
use crate::ledger::LedgerError;

/// Durable store of execution records.
///
/// Shared by every pool as `Arc<dyn ExecutionLedger>`. Implementations pool
/// their own connections.
#[async_trait]
pub trait ExecutionLedger: Send + Sync {
    /// Persist a new `started` record.
    async fn insert(&self, record: &ExecutionRecord) -> Result<(), LedgerError>;

    /// Finalize the record identified by `execution_id`.
    async fn update(&self, execution_id: Uuid, patch: &ExecutionPatch) -> Result<(), LedgerError>;

    /// Delete finished records whose `finished_at` is before `cutoff`.
    /// Records still `started` are never removed.
    async fn purge_finished_before(&self, cutoff: Timestamp) -> Result<usize, LedgerError>;

    /// Release connections. Further calls fail with `LedgerError::Closed`.
    async fn close(&self) -> Result<(), LedgerError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}
