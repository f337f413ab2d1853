//! In-process execution ledger.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use jiff::Timestamp;
use uuid::Uuid;

use crate::jobs::models::{ExecutionPatch, ExecutionRecord};
use crate::ledger::{ExecutionLedger, LedgerError};

/// Ledger kept in a concurrent map; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: DashMap<Uuid, ExecutionRecord>,
    closed: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, execution_id: Uuid) -> Option<ExecutionRecord> {
        self.records.get(&execution_id).map(|r| r.value().clone())
    }

    /// Every record, oldest first
    pub fn records(&self) -> Vec<ExecutionRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.started_at);
        records
    }

    /// Records of one job across its attempts, oldest first
    pub fn records_for_job(&self, queue: &str, job_id: &str) -> Vec<ExecutionRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.queue_name == queue && r.job_id == job_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.attempt);
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), LedgerError> {
        if self.is_closed() {
            Err(LedgerError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ExecutionLedger for MemoryLedger {
    async fn insert(&self, record: &ExecutionRecord) -> Result<(), LedgerError> {
        self.ensure_open()?;
        match self.records.entry(record.execution_id) {
            Entry::Occupied(_) => Err(LedgerError::database(
                "insert execution",
                anyhow::anyhow!("duplicate execution id {}", record.execution_id),
            )),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, execution_id: Uuid, patch: &ExecutionPatch) -> Result<(), LedgerError> {
        self.ensure_open()?;
        let mut record = self
            .records
            .get_mut(&execution_id)
            .ok_or(LedgerError::NotFound { execution_id })?;
        record.apply(patch);
        Ok(())
    }

    async fn purge_finished_before(&self, cutoff: Timestamp) -> Result<usize, LedgerError> {
        self.ensure_open()?;
        let before = self.records.len();
        self.records.retain(|_, record| {
            !(record.status.is_finished()
                && record.finished_at.is_some_and(|finished| finished < cutoff))
        });
        Ok(before.saturating_sub(self.records.len()))
    }

    async fn close(&self) -> Result<(), LedgerError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::test_support::job;
    use crate::jobs::{ExecutionStatus, HandlerError};
    use jiff::SignedDuration;
    use serde_json::json;

    fn started(id: &str) -> ExecutionRecord {
        ExecutionRecord::started(
            Uuid::new_v4(),
            &job("maintenance", id, json!({})),
            Timestamp::now(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_update() {
        let ledger = MemoryLedger::new();
        let record = started("1");
        ledger.insert(&record).await.unwrap();

        let patch = ExecutionPatch::completed(Timestamp::now(), 12, json!({"ok": true}));
        ledger.update(record.execution_id, &patch).await.unwrap();

        let stored = ledger.get(record.execution_id).unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.duration_ms, Some(12));
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let ledger = MemoryLedger::new();
        let record = started("1");
        ledger.insert(&record).await.unwrap();
        assert!(matches!(
            ledger.insert(&record).await,
            Err(LedgerError::Database { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_unknown_record() {
        let ledger = MemoryLedger::new();
        let patch = ExecutionPatch::failed(Timestamp::now(), 1, &HandlerError::fatal("x"));
        let id = Uuid::new_v4();
        assert!(matches!(
            ledger.update(id, &patch).await,
            Err(LedgerError::NotFound { execution_id }) if execution_id == id
        ));
    }

    #[tokio::test]
    async fn test_purge_only_removes_old_finished_records() {
        let ledger = MemoryLedger::new();
        let now = Timestamp::now();
        let old = now - SignedDuration::from_hours(40 * 24);

        let finished_old = started("old");
        ledger.insert(&finished_old).await.unwrap();
        ledger
            .update(
                finished_old.execution_id,
                &ExecutionPatch::completed(old, 5, json!(null)),
            )
            .await
            .unwrap();

        let finished_recent = started("recent");
        ledger.insert(&finished_recent).await.unwrap();
        ledger
            .update(
                finished_recent.execution_id,
                &ExecutionPatch::completed(now, 5, json!(null)),
            )
            .await
            .unwrap();

        let running = started("running");
        ledger.insert(&running).await.unwrap();

        let purged = ledger.purge_finished_before(now - SignedDuration::from_hours(30 * 24)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(ledger.get(finished_old.execution_id).is_none());
        assert!(ledger.get(finished_recent.execution_id).is_some());
        assert!(ledger.get(running.execution_id).is_some());
    }

    #[tokio::test]
    async fn test_closed_ledger_rejects_writes() {
        let ledger = MemoryLedger::new();
        ledger.close().await.unwrap();
        assert!(ledger.is_closed());
        assert!(matches!(ledger.insert(&started("1")).await, Err(LedgerError::Closed)));
    }
}
