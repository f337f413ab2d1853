use std::sync::RwLock;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use jiff::Timestamp;
use jiff_diesel::ToDiesel;
use uuid::Uuid;

use crate::db::AsyncDbPool;
use crate::jobs::ExecutionStatus;
use crate::jobs::models::{ExecutionChangeset, ExecutionPatch, ExecutionRecord, NewExecutionRow};
use crate::ledger::{ExecutionLedger, LedgerError};
use crate::schema::job_executions;

/// PostgreSQL execution ledger over the `job_executions` table
pub struct JobExecutionRepository {
    pool: RwLock<Option<AsyncDbPool>>,
}

impl JobExecutionRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self {
            pool: RwLock::new(Some(pool)),
        }
    }

    fn pool(&self) -> Result<AsyncDbPool, LedgerError> {
        self.pool
            .read()
            .map_err(|e| LedgerError::database("read pool handle", anyhow::anyhow!("{e}")))?
            .clone()
            .ok_or(LedgerError::Closed)
    }
}

#[async_trait]
impl ExecutionLedger for JobExecutionRepository {
    async fn insert(&self, record: &ExecutionRecord) -> Result<(), LedgerError> {
        let pool = self.pool()?;
        let mut conn = pool.get().await?;

        diesel::insert_into(job_executions::table)
            .values(NewExecutionRow::from(record))
            .execute(&mut conn)
            .await
            .map_err(|e| LedgerError::database("insert execution", e))?;

        Ok(())
    }

    async fn update(&self, execution_id: Uuid, patch: &ExecutionPatch) -> Result<(), LedgerError> {
        let pool = self.pool()?;
        let mut conn = pool.get().await?;

        let updated = diesel::update(job_executions::table.find(execution_id))
            .set(ExecutionChangeset::from(patch))
            .execute(&mut conn)
            .await
            .map_err(|e| LedgerError::database("finalize execution", e))?;

        if updated == 0 {
            return Err(LedgerError::NotFound { execution_id });
        }
        Ok(())
    }

    async fn purge_finished_before(&self, cutoff: Timestamp) -> Result<usize, LedgerError> {
        let pool = self.pool()?;
        let mut conn = pool.get().await?;

        diesel::delete(
            job_executions::table.filter(
                job_executions::status
                    .ne(ExecutionStatus::Started)
                    .and(job_executions::finished_at.lt(cutoff.to_diesel())),
            ),
        )
        .execute(&mut conn)
        .await
        .map_err(|e| LedgerError::database("purge finished executions", e))
    }

    async fn close(&self) -> Result<(), LedgerError> {
        // Connections close once in-flight clones of the pool drop
        self.pool
            .write()
            .map_err(|e| LedgerError::database("release pool handle", anyhow::anyhow!("{e}")))?
            .take();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
