//! Builds the configured execution ledger.

use std::sync::Arc;

use crate::config::{DatabaseConfig, LedgerBackendKind, LedgerConfig};
use crate::db::{establish_async_connection_pool, run_pending_migrations};
use crate::error::AppResult;
use crate::ledger::{ExecutionLedger, MemoryLedger};
use crate::repositories::JobExecutionRepository;

/// Connect the ledger selected by `ledger.backend`, running pending
/// migrations first when `database.auto_migrate` is set.
pub async fn connect_ledger(
    ledger: &LedgerConfig,
    database: &DatabaseConfig,
) -> AppResult<Arc<dyn ExecutionLedger>> {
    let store: Arc<dyn ExecutionLedger> = match ledger.backend {
        LedgerBackendKind::Memory => Arc::new(MemoryLedger::new()),
        LedgerBackendKind::Postgres => {
            if database.auto_migrate {
                let applied = run_pending_migrations(database.url.clone()).await?;
                tracing::info!(count = applied.len(), migrations = ?applied, "Applied pending migrations");
            }
            let pool = establish_async_connection_pool(database).await?;
            Arc::new(JobExecutionRepository::new(pool))
        }
    };

    tracing::info!(backend = store.name(), "Execution ledger connected");
    Ok(store)
}
