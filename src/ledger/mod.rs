//! Execution ledger: one durable record per job execution attempt.
//!
//! ```toml
//! [ledger]
//! backend = "postgres"   # or "memory"
//! result_summary_limit = 4096
//! retention_days = 30
//! ```

mod error;
mod manager;
mod memory;
mod traits;

pub use error::LedgerError;
pub use manager::connect_ledger;
pub use memory::MemoryLedger;
pub use traits::ExecutionLedger;

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use jiff::Timestamp;
    use uuid::Uuid;

    use super::{ExecutionLedger, LedgerError};
    use crate::jobs::models::{ExecutionPatch, ExecutionRecord};

    /// Ledger whose every write fails
    pub(crate) struct BrokenLedger;

    #[async_trait]
    impl ExecutionLedger for BrokenLedger {
        async fn insert(&self, _record: &ExecutionRecord) -> Result<(), LedgerError> {
            Err(LedgerError::database("insert execution", anyhow::anyhow!("disk full")))
        }

        async fn update(&self, _id: Uuid, _patch: &ExecutionPatch) -> Result<(), LedgerError> {
            Err(LedgerError::database("finalize execution", anyhow::anyhow!("disk full")))
        }

        async fn purge_finished_before(&self, _cutoff: Timestamp) -> Result<usize, LedgerError> {
            Err(LedgerError::database("purge finished executions", anyhow::anyhow!("disk full")))
        }

        async fn close(&self) -> Result<(), LedgerError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    /// Ledger that accepts connections but never answers a write
    pub(crate) struct HungLedger;

    #[async_trait]
    impl ExecutionLedger for HungLedger {
        async fn insert(&self, _record: &ExecutionRecord) -> Result<(), LedgerError> {
            std::future::pending().await
        }

        async fn update(&self, _id: Uuid, _patch: &ExecutionPatch) -> Result<(), LedgerError> {
            std::future::pending().await
        }

        async fn purge_finished_before(&self, _cutoff: Timestamp) -> Result<usize, LedgerError> {
            std::future::pending().await
        }

        async fn close(&self) -> Result<(), LedgerError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "hung"
        }
    }
}
