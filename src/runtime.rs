//! Worker process wiring: backends, handlers, orchestrator, operator
//! endpoint and the lifecycle coordinator.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::config::{Environment, Settings};
use crate::error::AppError;
use crate::jobs::{Orchestrator, OrchestratorConfig, WorkerRole, build_registry};
use crate::ledger::connect_ledger;
use crate::lifecycle::{
    DrainOutcome, LifecycleCoordinator, install_panic_hook, spawn_signal_listener,
};
use crate::logger::LogLevelHandle;
use crate::queue::connect_queue;

/// A configured worker process, ready to run
pub struct WorkerRuntime {
    settings: Settings,
    role: WorkerRole,
    log_level: Option<LogLevelHandle>,
}

impl WorkerRuntime {
    pub fn new(settings: Settings, role: WorkerRole) -> Self {
        Self {
            settings,
            role,
            log_level: None,
        }
    }

    /// Expose runtime log level changes on the operator endpoint.
    pub fn with_log_level(mut self, handle: LogLevelHandle) -> Self {
        self.log_level = Some(handle);
        self
    }

    /// Run until a signal or fault drains the worker.
    ///
    /// # Errors
    ///
    /// Startup failures: backend connection, unknown queue for the role,
    /// scheduler registration. Once started, the outcome of the drain is
    /// reported through [`DrainOutcome`] instead.
    pub async fn run(self) -> anyhow::Result<DrainOutcome> {
        let settings = &self.settings;
        tracing::info!(
            app_name = %settings.application.name,
            app_version = %settings.application.version,
            environment = %Environment::from_env(),
            role = %self.role,
            "Worker starting"
        );
        tracing::info!(
            queue_backend = ?settings.queue.backend,
            ledger_backend = ?settings.ledger.backend,
            schedules = settings.schedules.len(),
            health_enabled = settings.health.enabled,
            "Configuration loaded"
        );

        let queue = connect_queue(&settings.queue, settings.worker.retry_policies())
            .await
            .map_err(|e| AppError::infrastructure("*", e))?;
        let ledger = match connect_ledger(&settings.ledger, &settings.database).await {
            Ok(ledger) => ledger,
            Err(e) => {
                if let Err(close_error) = queue.close().await {
                    tracing::warn!(error = %close_error, "Failed to release queue backend");
                }
                return Err(e.into());
            }
        };
        let registry = build_registry(settings, queue.clone(), ledger.clone())?;

        let orchestrator = Arc::new(Orchestrator::new(
            registry,
            queue,
            ledger,
            OrchestratorConfig::from_settings(settings),
        ));

        let coordinator =
            LifecycleCoordinator::new(orchestrator.clone(), settings.worker.shutdown_grace_period());
        let reporter = coordinator.reporter();
        install_panic_hook(reporter.clone());
        let signals = spawn_signal_listener(reporter.clone());

        if let Err(e) = orchestrator.start(self.role).await {
            tracing::error!(error = ?e, role = %self.role, "Orchestrator failed to start");
            signals.abort();
            if let Err(stop_error) = orchestrator.stop().await {
                tracing::warn!(error = ?stop_error, "Releasing backends after failed start");
            }
            return Err(e.into());
        }

        let api_shutdown = CancellationToken::new();
        let api_task = settings.health.enabled.then(|| {
            let config = settings.health.clone();
            let state = ApiState {
                orchestrator: orchestrator.clone(),
                log_level: self.log_level.clone(),
            };
            let shutdown = api_shutdown.clone();
            let reporter = reporter.clone();
            tokio::spawn(async move {
                if let Err(e) = api::serve(&config, state, shutdown).await {
                    reporter.report_fault(format!("health endpoint failed: {e}"));
                }
            })
        });

        tracing::info!(role = %self.role, "Worker running, send SIGTERM or Ctrl+C to stop");
        let outcome = coordinator.run().await;

        api_shutdown.cancel();
        if let Some(task) = api_task
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "Health endpoint task ended abnormally");
        }
        signals.abort();

        tracing::info!(outcome = ?outcome, "Worker shutdown complete");
        Ok(outcome)
    }
}
