//! Worker pool: leases jobs from one queue and runs them through the
//! instrumented dispatcher with bounded concurrency.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::{AppError, AppResult};
use crate::jobs::dispatcher::InstrumentedDispatcher;
use crate::jobs::error::HandlerError;
use crate::jobs::events::{EventSender, PoolEvent, PoolStats};
use crate::jobs::role::QueueKind;
use crate::jobs::tracker::ExecutionTracker;
use crate::jobs::types::{Job, JobHandler};
use crate::queue::QueueBackend;

/// Cap on the delay between lease attempts while the backend is failing
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(30);
const MIN_RENEWAL_INTERVAL: Duration = Duration::from_millis(10);

/// A queue bound to its handler at a fixed concurrency
#[derive(Debug, Clone)]
pub struct PoolBinding {
    pub queue: QueueKind,
    pub handler: Arc<dyn JobHandler>,
    pub concurrency: usize,
    pub lease_timeout: Duration,
}

/// Polling and diagnostics knobs shared by every pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub poll_interval: Duration,
    pub stalled_check_interval: Duration,
    pub slow_job_warning: Option<Duration>,
}

impl PoolOptions {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            stalled_check_interval: config.stalled_check_interval(),
            slow_job_warning: config.slow_job_warning(),
        }
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

/// Health view of one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub queue_name: String,
    pub is_active: bool,
    pub is_paused: bool,
    pub in_flight: usize,
    pub concurrency: usize,
    pub processed: u64,
    pub failed: u64,
    pub stalled: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// State shared between the pool handle and its tasks
struct PoolContext {
    queue_name: String,
    lease_timeout: Duration,
    options: PoolOptions,
    dispatcher: InstrumentedDispatcher,
    queue: Arc<dyn QueueBackend>,
    /// Taken by `close` so the monitor sees the channel end
    events: StdMutex<Option<EventSender>>,
    in_flight: AtomicUsize,
    shutdown: CancellationToken,
}

impl PoolContext {
    fn emit(&self, event: PoolEvent) {
        let sent = match self.events.lock() {
            Ok(events) => events.as_ref().is_some_and(|tx| tx.send(event).is_ok()),
            Err(_) => false,
        };
        if !sent {
            tracing::debug!(queue = %self.queue_name, "Event monitor gone, event dropped");
        }
    }

    fn release_events(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.take();
        }
    }

    fn emit_error(&self, message: String) {
        self.emit(PoolEvent::Error {
            queue: self.queue_name.clone(),
            message,
        });
    }

    /// Sleeps for `delay` unless shutdown is requested first.
    async fn idle(&self, delay: Duration) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

struct PoolTasks {
    lease_loop: JoinHandle<()>,
    stalled_sweep: JoinHandle<()>,
}

/// Running pool for a single queue
pub struct WorkerPool {
    ctx: Arc<PoolContext>,
    concurrency: usize,
    paused: watch::Sender<bool>,
    stats: Arc<PoolStats>,
    tasks: Mutex<Option<PoolTasks>>,
}

impl WorkerPool {
    /// Spawn the lease loop and the stalled sweep for `binding`.
    pub fn start(
        binding: PoolBinding,
        tracker: Arc<ExecutionTracker>,
        queue: Arc<dyn QueueBackend>,
        events: EventSender,
        stats: Arc<PoolStats>,
        options: PoolOptions,
    ) -> Self {
        let concurrency = binding.concurrency.max(1);
        let dispatcher = InstrumentedDispatcher::new(binding.handler, tracker)
            .with_slow_job_warning(options.slow_job_warning);

        let ctx = Arc::new(PoolContext {
            queue_name: binding.queue.to_string(),
            lease_timeout: binding.lease_timeout,
            options,
            dispatcher,
            queue,
            events: StdMutex::new(Some(events)),
            in_flight: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        });

        let (paused, paused_rx) = watch::channel(false);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let tasks = PoolTasks {
            lease_loop: tokio::spawn(lease_loop(ctx.clone(), semaphore, paused_rx)),
            stalled_sweep: tokio::spawn(stalled_sweep(ctx.clone())),
        };

        tracing::info!(
            queue = %ctx.queue_name,
            handler = ctx.dispatcher.handler_name(),
            concurrency,
            lease_timeout_secs = ctx.lease_timeout.as_secs(),
            "Worker pool started"
        );

        Self {
            ctx,
            concurrency,
            paused,
            stats,
            tasks: Mutex::new(Some(tasks)),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.ctx.queue_name
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Stop leasing new jobs; in-flight jobs run to completion.
    pub fn pause(&self) {
        if !self.paused.send_replace(true) {
            tracing::info!(queue = %self.ctx.queue_name, "Worker pool paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.send_replace(false) {
            tracing::info!(queue = %self.ctx.queue_name, "Worker pool resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_active(&self) -> bool {
        !self.ctx.shutdown.is_cancelled()
    }

    pub fn in_flight(&self) -> usize {
        self.ctx.in_flight.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> WorkerStatus {
        let counters = self.stats.snapshot();
        WorkerStatus {
            queue_name: self.ctx.queue_name.clone(),
            is_active: self.is_active(),
            is_paused: self.is_paused(),
            in_flight: self.in_flight(),
            concurrency: self.concurrency,
            processed: counters.processed,
            failed: counters.failed,
            stalled: counters.stalled,
            last_error: counters.last_error,
        }
    }

    /// Stop leasing and wait for every in-flight job to finish.
    ///
    /// Drops the pool's event sender once its tasks are joined, even while
    /// other handles to the pool remain. Safe to call more than once; later
    /// calls return immediately.
    pub async fn close(&self) -> AppResult<()> {
        self.ctx.shutdown.cancel();

        let Some(tasks) = self.tasks.lock().await.take() else {
            return Ok(());
        };

        let (lease_loop, stalled_sweep) = tokio::join!(tasks.lease_loop, tasks.stalled_sweep);
        self.ctx.release_events();
        lease_loop.map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;
        stalled_sweep.map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;

        tracing::info!(queue = %self.ctx.queue_name, "Worker pool closed");
        Ok(())
    }
}

/// Exponential delay between lease attempts after backend errors
#[derive(Debug)]
struct ErrorBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl ErrorBackoff {
    fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Current delay plus up to 10% jitter; doubles the next one.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        let jitter_cap = u64::try_from(delay.as_millis() / 10).unwrap_or(u64::MAX);
        let jitter = rand::rng().random_range(0..=jitter_cap);
        delay + Duration::from_millis(jitter)
    }

    fn reset(&mut self) {
        self.current = self.base;
    }
}

async fn lease_loop(
    ctx: Arc<PoolContext>,
    semaphore: Arc<Semaphore>,
    mut paused: watch::Receiver<bool>,
) {
    let mut running = JoinSet::new();
    let mut backoff = ErrorBackoff::new(ctx.options.poll_interval, MAX_ERROR_BACKOFF);

    loop {
        while let Some(joined) = running.try_join_next() {
            check_join(&ctx, joined);
        }

        if *paused.borrow_and_update() {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                changed = paused.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }

        // The permit is taken before leasing so a leased job never waits
        let permit = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        if ctx.shutdown.is_cancelled() || *paused.borrow() {
            continue;
        }

        match ctx.queue.lease(&ctx.queue_name, ctx.lease_timeout).await {
            Ok(Some(job)) => {
                backoff.reset();
                running.spawn(execute(ctx.clone(), job, permit));
            }
            Ok(None) => {
                drop(permit);
                ctx.idle(ctx.options.poll_interval).await;
            }
            Err(error) => {
                drop(permit);
                let delay = backoff.next_delay();
                ctx.emit_error(format!(
                    "lease failed, retrying in {}ms: {}",
                    delay.as_millis(),
                    error
                ));
                ctx.idle(delay).await;
            }
        }
    }

    if !running.is_empty() {
        tracing::info!(
            queue = %ctx.queue_name,
            in_flight = running.len(),
            "Waiting for in-flight jobs"
        );
    }
    while let Some(joined) = running.join_next().await {
        check_join(&ctx, joined);
    }
}

fn check_join(ctx: &PoolContext, joined: Result<(), JoinError>) {
    if let Err(error) = joined {
        ctx.emit_error(format!("job task aborted: {error}"));
    }
}

/// Decrements the in-flight counter on drop
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn execute(ctx: Arc<PoolContext>, job: Job, _permit: OwnedSemaphorePermit) {
    let _in_flight = InFlight::enter(&ctx.in_flight);
    ctx.emit(PoolEvent::Active {
        queue: ctx.queue_name.clone(),
        job_id: job.id.clone(),
        attempt: job.attempt(),
    });

    let started = Instant::now();
    match dispatch_renewing_lease(&ctx, &job).await {
        Ok(_) => match ctx.queue.ack(&job).await {
            Ok(()) => ctx.emit(PoolEvent::Completed {
                queue: ctx.queue_name.clone(),
                job_id: job.id.clone(),
                attempt: job.attempt(),
                duration: started.elapsed(),
            }),
            Err(error) => ctx.emit_error(format!("ack of job {} failed: {}", job.id, error)),
        },
        Err(handler_error) => match ctx.queue.fail(&job, &handler_error).await {
            Ok(outcome) => ctx.emit(PoolEvent::Failed {
                queue: ctx.queue_name.clone(),
                job_id: job.id.clone(),
                outcome,
                error: handler_error,
            }),
            Err(error) => ctx.emit_error(format!(
                "reporting failure of job {} failed: {}",
                job.id, error
            )),
        },
    }
}

/// Runs the dispatcher while extending the job's lease every half lease.
async fn dispatch_renewing_lease(
    ctx: &PoolContext,
    job: &Job,
) -> Result<JsonValue, HandlerError> {
    let every = (ctx.lease_timeout / 2).max(MIN_RENEWAL_INTERVAL);
    let mut renew = tokio::time::interval_at(Instant::now() + every, every);
    renew.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let dispatch = ctx.dispatcher.dispatch(job);
    tokio::pin!(dispatch);

    loop {
        tokio::select! {
            outcome = &mut dispatch => return outcome,
            _ = renew.tick() => {
                if let Err(error) = ctx.queue.extend_lease(job, ctx.lease_timeout).await {
                    ctx.emit_error(format!("lease renewal of job {} failed: {}", job.id, error));
                }
            }
        }
    }
}

async fn stalled_sweep(ctx: Arc<PoolContext>) {
    let mut ticker = tokio::time::interval(ctx.options.stalled_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match ctx.queue.reclaim_stalled(&ctx.queue_name).await {
            Ok(job_ids) => {
                for job_id in job_ids {
                    ctx.emit(PoolEvent::Stalled {
                        queue: ctx.queue_name.clone(),
                        job_id,
                    });
                }
            }
            Err(error) => ctx.emit_error(format!("stalled sweep failed: {error}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::ExecutionStatus;
    use crate::jobs::events::EventReceiver;
    use crate::jobs::types::test_support::{ProbeHandler, wait_until};
    use crate::ledger::MemoryLedger;
    use crate::queue::{FailOutcome, MemoryQueue, RetryPolicies};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Harness {
        pool: WorkerPool,
        queue: Arc<MemoryQueue>,
        ledger: Arc<MemoryLedger>,
        handler: Arc<ProbeHandler>,
        events: EventReceiver,
    }

    fn options() -> PoolOptions {
        PoolOptions {
            poll_interval: Duration::from_millis(50),
            stalled_check_interval: Duration::from_secs(1),
            slow_job_warning: None,
        }
    }

    fn start(queue_kind: QueueKind, handler: ProbeHandler, concurrency: usize) -> Harness {
        let queue = Arc::new(MemoryQueue::new(RetryPolicies::default()));
        let ledger = Arc::new(MemoryLedger::new());
        let handler = Arc::new(handler);
        let tracker = Arc::new(ExecutionTracker::new(ledger.clone(), 4096));
        let (tx, events) = mpsc::unbounded_channel();

        let pool = WorkerPool::start(
            PoolBinding {
                queue: queue_kind,
                handler: handler.clone(),
                concurrency,
                lease_timeout: Duration::from_secs(2),
            },
            tracker,
            queue.clone(),
            tx,
            Arc::new(PoolStats::default()),
            options(),
        );

        Harness {
            pool,
            queue,
            ledger,
            handler,
            events,
        }
    }

    fn drain(events: &mut EventReceiver) -> Vec<PoolEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_limit() {
        let h = start(
            QueueKind::DocumentProcessing,
            ProbeHandler::new(Duration::from_millis(200)),
            8,
        );
        for i in 0..20 {
            h.queue
                .enqueue("document-processing", json!({"doc": i}))
                .await
                .unwrap();
        }

        wait_until(|| h.queue.stats("document-processing").completed == 20).await;

        assert_eq!(h.handler.calls(), 20);
        assert!(h.handler.max_seen() <= 8);
        assert!(h.handler.max_seen() > 1);
        let finished = h
            .ledger
            .records()
            .into_iter()
            .filter(|r| r.status == ExecutionStatus::Completed)
            .count();
        assert_eq!(finished, 20);
        h.pool.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reaches_backend_with_original_error() {
        let error = HandlerError::fatal("unsupported file type").with_trace("detect mime");
        let mut h = start(
            QueueKind::DocumentProcessing,
            ProbeHandler::failing(Duration::from_millis(5), error.clone()),
            2,
        );
        let id = h
            .queue
            .enqueue("document-processing", json!({}))
            .await
            .unwrap();

        wait_until(|| h.queue.stats("document-processing").dead == 1).await;
        h.pool.close().await.unwrap();

        assert_eq!(h.queue.dead_letters("document-processing"), vec![(id.clone(), error)]);
        let records = h.ledger.records_for_job("document-processing", id.as_str());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ExecutionStatus::Failed);

        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(
            e,
            PoolEvent::Failed { outcome: FailOutcome::DeadLettered { attempts_made: 1 }, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_leasing_until_resume() {
        let h = start(
            QueueKind::EmailDelivery,
            ProbeHandler::new(Duration::from_millis(5)),
            2,
        );
        h.pool.pause();
        assert!(h.pool.is_paused());

        for _ in 0..3 {
            h.queue.enqueue("email-delivery", json!({})).await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.queue.stats("email-delivery").waiting, 3);
        assert_eq!(h.handler.calls(), 0);

        h.pool.resume();
        wait_until(|| h.queue.stats("email-delivery").completed == 3).await;
        assert_eq!(h.handler.calls(), 3);
        h.pool.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_waits_for_in_flight_jobs() {
        let h = start(
            QueueKind::ReportGeneration,
            ProbeHandler::new(Duration::from_secs(5)),
            3,
        );
        for _ in 0..3 {
            h.queue.enqueue("report-generation", json!({})).await.unwrap();
        }
        wait_until(|| h.pool.in_flight() == 3).await;

        h.pool.close().await.unwrap();

        assert_eq!(h.pool.in_flight(), 0);
        assert!(!h.pool.is_active());
        assert_eq!(h.queue.stats("report-generation").completed, 3);
        assert!(
            h.ledger
                .records()
                .iter()
                .all(|r| r.status == ExecutionStatus::Completed)
        );
        // Second close is a no-op
        h.pool.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_job_keeps_its_lease() {
        let mut h = start(
            QueueKind::AiProcessing,
            ProbeHandler::new(Duration::from_secs(7)),
            1,
        );
        let id = h.queue.enqueue("ai-processing", json!({})).await.unwrap();

        wait_until(|| h.queue.stats("ai-processing").completed == 1).await;
        h.pool.close().await.unwrap();

        assert_eq!(h.handler.calls(), 1);
        assert_eq!(h.ledger.records_for_job("ai-processing", id.as_str()).len(), 1);
        let events = drain(&mut h.events);
        assert!(!events.iter().any(|e| matches!(e, PoolEvent::Stalled { .. })));
        assert!(!events.iter().any(|e| matches!(e, PoolEvent::Error { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_errors_become_error_events() {
        let mut h = start(
            QueueKind::WebhookRelay,
            ProbeHandler::new(Duration::from_millis(5)),
            1,
        );
        h.queue.close().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let status = h.pool.status();
        assert!(status.is_active);
        h.pool.close().await.unwrap();

        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(
            e,
            PoolEvent::Error { message, .. } if message.contains("lease failed")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_ends_event_stream() {
        let mut h = start(
            QueueKind::EmailDelivery,
            ProbeHandler::new(Duration::from_millis(5)),
            1,
        );
        let pool = Arc::new(h.pool);
        let held = pool.clone();
        h.queue.enqueue("email-delivery", json!({})).await.unwrap();
        wait_until(|| h.queue.stats("email-delivery").completed == 1).await;

        pool.close().await.unwrap();

        let mut seen = Vec::new();
        let ended = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = h.events.recv().await {
                seen.push(event);
            }
        })
        .await;
        assert!(ended.is_ok());
        assert!(seen.iter().any(|e| matches!(e, PoolEvent::Completed { .. })));
        assert!(!held.is_active());
    }

    #[test]
    fn test_error_backoff_doubles_and_caps() {
        let mut backoff = ErrorBackoff::new(Duration::from_millis(100), Duration::from_millis(350));

        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(110));
        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(220));
        let third = backoff.next_delay();
        assert!(third >= Duration::from_millis(350) && third <= Duration::from_millis(385));

        backoff.reset();
        assert!(backoff.next_delay() <= Duration::from_millis(110));
    }
}
