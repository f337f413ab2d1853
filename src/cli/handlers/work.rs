//! `taskhive work`: run the worker pools of a deployment role.

use std::sync::Arc;

use crate::config::Settings;
use crate::error::AppResult;
use crate::jobs::{
    Orchestrator, OrchestratorConfig, PoolBinding, QueueKind, WorkerRole, build_registry,
};
use crate::ledger::MemoryLedger;
use crate::lifecycle::DrainOutcome;
use crate::logger::LogLevelHandle;
use crate::queue::MemoryQueue;
use crate::runtime::WorkerRuntime;

pub struct WorkCommandHandler {
    config: Settings,
}

impl WorkCommandHandler {
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    /// The configured role, after `--role` / `WORKER_ROLE` were merged in.
    pub fn role(&self) -> AppResult<WorkerRole> {
        self.config.worker.role.parse()
    }

    /// Run the worker until a signal or fault drains it.
    pub async fn execute(&self, log_level: Option<LogLevelHandle>) -> anyhow::Result<DrainOutcome> {
        let role = self.role()?;
        let mut runtime = WorkerRuntime::new(self.config.clone(), role);
        if let Some(handle) = log_level {
            runtime = runtime.with_log_level(handle);
        }
        runtime.run().await
    }

    /// Validate configuration and print the pools `work` would start.
    pub fn dry_run(&self) -> AppResult<()> {
        let role = self.role()?;
        let bindings = self.resolve_bindings(role)?;

        println!("✓ Configuration is valid");
        println!("✓ Role: {}", role);
        println!("✓ Queue backend: {:?}", self.config.queue.backend);
        println!("✓ Ledger backend: {:?}", self.config.ledger.backend);
        for binding in &bindings {
            let retry = self.config.worker.profile_for(binding.queue).retry;
            println!(
                "  - {:<20} handler={:<14} concurrency={:<3} lease={}s attempts={}",
                binding.queue.as_str(),
                binding.handler.name(),
                binding.concurrency,
                binding.lease_timeout.as_secs(),
                retry.max_attempts
            );
        }
        if role.includes(QueueKind::ScheduledTriggers) {
            for schedule in &self.config.schedules {
                println!(
                    "  * schedule {} [{}] -> {}",
                    schedule.name, schedule.cron, schedule.target_queue
                );
            }
        }
        if self.config.health.enabled {
            println!("✓ Health endpoint would bind to: {}", self.config.health.address());
        }
        println!("Dry run completed successfully");
        Ok(())
    }

    /// Resolve role bindings against in-memory backends; nothing is connected.
    pub fn resolve_bindings(&self, role: WorkerRole) -> AppResult<Vec<PoolBinding>> {
        let queue = Arc::new(MemoryQueue::new(self.config.worker.retry_policies()));
        let ledger = Arc::new(MemoryLedger::new());
        let registry = build_registry(&self.config, queue.clone(), ledger.clone())?;
        Orchestrator::new(
            registry,
            queue,
            ledger,
            OrchestratorConfig::from_settings(&self.config),
        )
        .bindings_for(role)
    }

    pub fn config(&self) -> &Settings {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn settings(role: &str) -> Settings {
        let mut settings = Settings::default();
        settings.worker.role = role.to_string();
        settings
    }

    #[test]
    fn test_unknown_role_rejected() {
        let handler = WorkCommandHandler::new(settings("billing"));
        assert!(matches!(
            handler.dry_run(),
            Err(AppError::UnknownWorkerRole { role }) if role == "billing"
        ));
    }

    #[tokio::test]
    async fn test_scheduled_role_resolves_without_services() {
        let handler = WorkCommandHandler::new(settings("scheduled"));
        let bindings = handler.resolve_bindings(WorkerRole::Scheduled).unwrap();
        let queues: Vec<QueueKind> = bindings.iter().map(|b| b.queue).collect();
        assert_eq!(queues, [QueueKind::ScheduledTriggers, QueueKind::Maintenance]);
        assert!(handler.dry_run().is_ok());
    }

    #[tokio::test]
    async fn test_document_role_needs_service_endpoint() {
        let handler = WorkCommandHandler::new(settings("document"));
        assert!(matches!(
            handler.dry_run(),
            Err(AppError::UnknownQueue { queue }) if queue == "document-processing"
        ));

        let mut config = handler.config().clone();
        config.services.document_url = Some("http://documents.internal/jobs".to_string());
        let handler = WorkCommandHandler::new(config);
        let bindings = handler.resolve_bindings(WorkerRole::Document).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].handler.name(), "service");
    }
}
