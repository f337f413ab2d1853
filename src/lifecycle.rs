//! Process lifecycle: `Running -> Draining -> Stopped`.
//!
//! OS signals and reported faults arrive on one channel. The first one
//! starts the drain; anything after that is logged and ignored, so
//! [`Orchestrator::stop`] runs exactly once.

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::jobs::Orchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Running,
    Draining,
    Stopped,
}

/// Why the process is shutting down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownTrigger {
    Signal(&'static str),
    Fault(String),
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownTrigger::Signal(name) => write!(f, "signal {name}"),
            ShutdownTrigger::Fault(message) => write!(f, "fault: {message}"),
        }
    }
}

/// How the drain ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Clean,
    Failed(String),
    TimedOut(Duration),
}

impl DrainOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, DrainOutcome::Clean)
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_clean() { 0 } else { 1 }
    }
}

/// Cloneable sender for shutdown triggers
#[derive(Debug, Clone)]
pub struct ShutdownReporter {
    tx: mpsc::UnboundedSender<ShutdownTrigger>,
}

impl ShutdownReporter {
    /// Report a process-level fault; starts the drain if none is running.
    pub fn report_fault(&self, message: impl Into<String>) {
        self.send(ShutdownTrigger::Fault(message.into()));
    }

    pub fn signal(&self, name: &'static str) {
        self.send(ShutdownTrigger::Signal(name));
    }

    fn send(&self, trigger: ShutdownTrigger) -> bool {
        self.tx.send(trigger).is_ok()
    }
}

pub struct LifecycleCoordinator {
    orchestrator: Arc<Orchestrator>,
    grace_period: Duration,
    phase: watch::Sender<LifecyclePhase>,
    ignored: watch::Sender<usize>,
    triggers: mpsc::UnboundedReceiver<ShutdownTrigger>,
    reporter: ShutdownReporter,
}

impl LifecycleCoordinator {
    pub fn new(orchestrator: Arc<Orchestrator>, grace_period: Duration) -> Self {
        let (tx, triggers) = mpsc::unbounded_channel();
        let (phase, _) = watch::channel(LifecyclePhase::Running);
        let (ignored, _) = watch::channel(0);
        Self {
            orchestrator,
            grace_period,
            phase,
            ignored,
            triggers,
            reporter: ShutdownReporter { tx },
        }
    }

    pub fn reporter(&self) -> ShutdownReporter {
        self.reporter.clone()
    }

    pub fn phase(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase.subscribe()
    }

    /// Number of shutdown requests that arrived after the drain started.
    pub fn ignored_requests(&self) -> watch::Receiver<usize> {
        self.ignored.subscribe()
    }

    /// Wait for the first trigger, drain within the grace period, then stop.
    pub async fn run(mut self) -> DrainOutcome {
        let Some(trigger) = self.triggers.recv().await else {
            // Unreachable while `self.reporter` is alive
            return DrainOutcome::Failed("shutdown channel closed".to_string());
        };

        tracing::info!(
            trigger = %trigger,
            grace_period_secs = self.grace_period.as_secs(),
            "Shutdown requested, draining worker pools"
        );
        self.phase.send_replace(LifecyclePhase::Draining);

        let mut triggers = self.triggers;
        let ignored = self.ignored;
        let ignore_repeats = tokio::spawn(async move {
            while let Some(trigger) = triggers.recv().await {
                tracing::warn!(trigger = %trigger, "Already draining, shutdown request ignored");
                ignored.send_modify(|count| *count += 1);
            }
        });

        let outcome = match tokio::time::timeout(self.grace_period, self.orchestrator.stop()).await {
            Ok(Ok(())) => DrainOutcome::Clean,
            Ok(Err(e)) => {
                tracing::error!(error = ?e, "Drain finished with errors");
                DrainOutcome::Failed(e.to_string())
            }
            Err(_) => {
                tracing::error!(
                    grace_period_secs = self.grace_period.as_secs(),
                    "Drain exceeded the grace period"
                );
                DrainOutcome::TimedOut(self.grace_period)
            }
        };

        ignore_repeats.abort();
        self.phase.send_replace(LifecyclePhase::Stopped);
        tracing::info!(outcome = ?outcome, "Lifecycle stopped");
        outcome
    }
}

/// Forwards SIGINT/SIGTERM to `reporter` for the life of the process.
pub fn spawn_signal_listener(reporter: ShutdownReporter) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                result = signal::ctrl_c() => match result {
                    Ok(()) => "SIGINT",
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                        terminate().await;
                        "SIGTERM"
                    }
                },
                _ = terminate() => "SIGTERM",
            };
            tracing::info!(signal = name, "Received termination signal");
            if !reporter.send(ShutdownTrigger::Signal(name)) {
                break;
            }
        }
    })
}

async fn terminate() {
    #[cfg(unix)]
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            if sigterm.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }

    #[cfg(not(unix))]
    std::future::pending::<()>().await;
}

thread_local! {
    static CONTAINED_POLLS: Cell<usize> = const { Cell::new(0) };
}

/// Whether the current thread is polling a future wrapped in [`contain_panics`].
pub fn panic_is_contained() -> bool {
    CONTAINED_POLLS.with(|polls| polls.get() > 0)
}

/// Marks `future` as one whose panics are caught by the caller, so the
/// panic hook does not treat them as process faults.
pub fn contain_panics<F: Future + Unpin>(future: F) -> Contained<F> {
    Contained { inner: future }
}

pub struct Contained<F> {
    inner: F,
}

struct PollGuard;

impl PollGuard {
    fn enter() -> Self {
        CONTAINED_POLLS.with(|polls| polls.set(polls.get() + 1));
        PollGuard
    }
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        CONTAINED_POLLS.with(|polls| polls.set(polls.get().saturating_sub(1)));
    }
}

impl<F: Future + Unpin> Future for Contained<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _guard = PollGuard::enter();
        Pin::new(&mut self.inner).poll(cx)
    }
}

/// Logs every panic and reports uncontained ones as faults.
pub fn install_panic_hook(reporter: ShutdownReporter) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if panic_is_contained() {
            // The dispatcher turns it into a failed attempt
            return;
        }
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());

        tracing::error!(location = %location, panic = %message, "Uncontained panic");
        previous(info);
        reporter.report_fault(format!("panic at {location}: {message}"));
    }));
}
