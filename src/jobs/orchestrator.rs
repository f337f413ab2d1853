//! Owns the worker pools of the process and drives their lifecycle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::config::{ScheduleConfig, Settings, WorkerConfig};
use crate::error::{AppError, AppResult};
use crate::jobs::events::{EventMonitor, PoolStats};
use crate::jobs::pool::{PoolBinding, PoolOptions, WorkerPool, WorkerStatus};
use crate::jobs::registry::JobRegistry;
use crate::jobs::role::{QueueKind, WorkerRole};
use crate::jobs::scheduler::TriggerScheduler;
use crate::jobs::tracker::{DEFAULT_WRITE_TIMEOUT, ExecutionTracker};
use crate::ledger::ExecutionLedger;
use crate::queue::QueueBackend;

/// Orchestrator tuning taken from settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub worker: WorkerConfig,
    pub schedules: Vec<ScheduleConfig>,
    pub result_summary_limit: usize,
    pub ledger_write_timeout: Duration,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            worker: settings.worker.clone(),
            schedules: settings.schedules.clone(),
            result_summary_limit: settings.ledger.result_summary_limit,
            ledger_write_timeout: settings.ledger.write_timeout(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            schedules: Vec::new(),
            result_summary_limit: 0,
            ledger_write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Snapshot returned by [`Orchestrator::health_status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub is_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<WorkerRole>,
    pub workers: Vec<WorkerStatus>,
}

#[derive(Default)]
struct ActivePools {
    role: Option<WorkerRole>,
    pools: BTreeMap<String, Arc<WorkerPool>>,
}

#[derive(Default)]
struct RunState {
    monitor: Option<JoinHandle<()>>,
    scheduler: Option<TriggerScheduler>,
    released: bool,
}

/// One per process. Start/stop are serialized; health reads never wait on
/// them.
pub struct Orchestrator {
    registry: JobRegistry,
    queue: Arc<dyn QueueBackend>,
    ledger: Arc<dyn ExecutionLedger>,
    config: OrchestratorConfig,
    running: AtomicBool,
    active: RwLock<ActivePools>,
    state: Mutex<RunState>,
}

impl Orchestrator {
    pub fn new(
        registry: JobRegistry,
        queue: Arc<dyn QueueBackend>,
        ledger: Arc<dyn ExecutionLedger>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            ledger,
            config,
            running: AtomicBool::new(false),
            active: RwLock::new(ActivePools::default()),
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Resolve a role to its pool bindings without starting anything.
    pub fn bindings_for(&self, role: WorkerRole) -> AppResult<Vec<PoolBinding>> {
        role.queues()
            .iter()
            .map(|&queue| {
                let handler = self.registry.handler_for(queue)?;
                let profile = self.config.worker.profile_for(queue);
                Ok(PoolBinding {
                    queue,
                    handler,
                    concurrency: profile.concurrency,
                    lease_timeout: profile.lease_timeout,
                })
            })
            .collect()
    }

    /// Start one pool per queue of `role`.
    ///
    /// A second call while running is a no-op.
    pub async fn start(&self, role: WorkerRole) -> AppResult<()> {
        let mut state = self.state.lock().await;

        if self.is_running() {
            tracing::warn!(role = %role, "Orchestrator already running, start ignored");
            return Ok(());
        }
        if state.released {
            return Err(AppError::Internal {
                source: anyhow::anyhow!("orchestrator was stopped and its backends released"),
            });
        }

        let bindings = self.bindings_for(role)?;

        let scheduler = if role.includes(QueueKind::ScheduledTriggers) && !self.config.schedules.is_empty() {
            let scheduler = TriggerScheduler::new(&self.config.schedules, self.queue.clone())
                .await
                .map_err(scheduler_error)?;
            scheduler.start().await.map_err(scheduler_error)?;
            Some(scheduler)
        } else {
            None
        };

        let tracker = Arc::new(
            ExecutionTracker::new(self.ledger.clone(), self.config.result_summary_limit)
                .with_write_timeout(self.config.ledger_write_timeout),
        );
        let options = PoolOptions::from_config(&self.config.worker);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut stats = BTreeMap::new();
        let mut pools = BTreeMap::new();
        for binding in bindings {
            let pool_stats = Arc::new(PoolStats::default());
            stats.insert(binding.queue.to_string(), pool_stats.clone());

            let pool = WorkerPool::start(
                binding,
                tracker.clone(),
                self.queue.clone(),
                events_tx.clone(),
                pool_stats,
                options,
            );
            pools.insert(pool.queue_name().to_string(), Arc::new(pool));
        }
        drop(events_tx);

        state.monitor = Some(EventMonitor::new(stats).spawn(events_rx));
        state.scheduler = scheduler;

        let queues: Vec<String> = pools.keys().cloned().collect();
        {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            active.role = Some(role);
            active.pools = pools;
        }
        self.running.store(true, Ordering::Release);

        tracing::info!(
            role = %role,
            queues = ?queues,
            queue_backend = self.queue.name(),
            ledger_backend = self.ledger.name(),
            "Orchestrator started"
        );
        Ok(())
    }

    /// Drain every pool, then release the ledger and the queue client.
    ///
    /// Pool close failures are logged and do not stop the other pools from
    /// closing. Calls after the first return immediately.
    pub async fn stop(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.released {
            tracing::debug!("Orchestrator already stopped");
            return Ok(());
        }

        self.running.store(false, Ordering::Release);
        tracing::info!("Stopping orchestrator");

        if let Some(scheduler) = state.scheduler.take()
            && let Err(e) = scheduler.shutdown().await
        {
            tracing::warn!(error = %e, "Trigger scheduler did not shut down cleanly");
        }

        let pools: Vec<Arc<WorkerPool>> = {
            let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
            active.pools.values().cloned().collect()
        };
        let closed = join_all(pools.iter().map(|pool| async move {
            (pool.queue_name().to_string(), pool.close().await)
        }))
        .await;
        for (queue, result) in closed {
            if let Err(e) = result {
                tracing::error!(queue = %queue, error = %e, "Worker pool did not close cleanly");
            }
        }

        {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            active.pools.clear();
        }
        // Closed pools have released their senders, ending the monitor
        drop(pools);
        if let Some(monitor) = state.monitor.take()
            && let Err(e) = monitor.await
        {
            tracing::warn!(error = %e, "Event monitor ended abnormally");
        }

        let mut release_error = None;
        if let Err(e) = self.ledger.close().await {
            tracing::error!(backend = self.ledger.name(), error = %e, "Failed to release execution ledger");
            release_error = Some(AppError::from(e));
        }
        if let Err(e) = self.queue.close().await {
            tracing::error!(backend = self.queue.name(), error = %e, "Failed to release queue backend");
            release_error.get_or_insert(AppError::infrastructure(self.queue.name(), e));
        }
        state.released = true;

        tracing::info!("Orchestrator stopped");
        release_error.map_or(Ok(()), Err)
    }

    pub fn health_status(&self) -> HealthStatus {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        HealthStatus {
            is_running: self.is_running(),
            role: active.role,
            workers: active.pools.values().map(|pool| pool.status()).collect(),
        }
    }

    pub fn pause(&self, queue: &str) -> AppResult<()> {
        self.pool(queue)?.pause();
        Ok(())
    }

    pub fn resume(&self, queue: &str) -> AppResult<()> {
        self.pool(queue)?.resume();
        Ok(())
    }

    fn pool(&self, queue: &str) -> AppResult<Arc<WorkerPool>> {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        active
            .pools
            .get(queue)
            .cloned()
            .ok_or_else(|| AppError::PoolNotFound {
                queue: queue.to_string(),
            })
    }
}

fn scheduler_error(error: crate::jobs::SchedulerError) -> AppError {
    AppError::Internal {
        source: anyhow::Error::from(error),
    }
}
