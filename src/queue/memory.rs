//! In-process queue backend.
//!
//! Same lease/retry/dead-letter semantics as the Redis adapter, without
//! durability. Used for local runs and as the test double for pools.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use serde_json::Value as JsonValue;
use tokio::time::Instant;

use crate::jobs::{HandlerError, Job, JobId};
use crate::queue::{FailOutcome, QueueBackend, QueueError, RetryPolicies};

#[derive(Debug, Clone)]
struct StoredJob {
    id: JobId,
    payload: JsonValue,
    attempts_made: u32,
    created_at: Timestamp,
    processed_at: Option<Timestamp>,
}

impl StoredJob {
    fn to_job(&self, queue: &str) -> Job {
        Job {
            id: self.id.clone(),
            queue_name: queue.to_string(),
            payload: self.payload.clone(),
            attempts_made: self.attempts_made,
            created_at: self.created_at,
            processed_at: self.processed_at,
            finished_at: None,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    waiting: VecDeque<StoredJob>,
    active: HashMap<JobId, (StoredJob, Instant)>,
    /// Ordered by due time
    delayed: Vec<(Instant, StoredJob)>,
    dead: Vec<(StoredJob, HandlerError)>,
    completed: u64,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        let due = self.delayed.partition_point(|(at, _)| *at <= now);
        self.waiting
            .extend(self.delayed.drain(..due).map(|(_, job)| job));
    }

    fn schedule(&mut self, at: Instant, job: StoredJob) {
        let index = self.delayed.partition_point(|(due, _)| *due <= at);
        self.delayed.insert(index, (at, job));
    }

    fn take_active(&mut self, queue: &str, job: &Job) -> Result<StoredJob, QueueError> {
        self.active
            .remove(&job.id)
            .map(|(stored, _)| stored)
            .ok_or_else(|| QueueError::NotLeased {
                queue: queue.to_string(),
                job_id: job.id.to_string(),
            })
    }
}

/// Point-in-time counts for one memory queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryQueueStats {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub dead: usize,
    pub completed: u64,
}

/// In-memory queue shared by all pools of the process.
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    next_id: AtomicU64,
    policies: RetryPolicies,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new(policies: RetryPolicies) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            policies,
            closed: AtomicBool::new(false),
        }
    }

    pub fn stats(&self, queue: &str) -> MemoryQueueStats {
        let Ok(queues) = self.queues.lock() else {
            return MemoryQueueStats::default();
        };
        queues
            .get(queue)
            .map(|state| MemoryQueueStats {
                waiting: state.waiting.len(),
                active: state.active.len(),
                delayed: state.delayed.len(),
                dead: state.dead.len(),
                completed: state.completed,
            })
            .unwrap_or_default()
    }

    /// Dead-lettered jobs with the error that put them there.
    pub fn dead_letters(&self, queue: &str) -> Vec<(JobId, HandlerError)> {
        let Ok(queues) = self.queues.lock() else {
            return Vec::new();
        };
        queues
            .get(queue)
            .map(|state| {
                state
                    .dead
                    .iter()
                    .map(|(job, error)| (job.id.clone(), error.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, QueueState>>, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.queues
            .lock()
            .map_err(|e| QueueError::Operation(e.to_string()))
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn enqueue(&self, queue: &str, payload: JsonValue) -> Result<JobId, QueueError> {
        let id = JobId::new(self.next_id.fetch_add(1, Ordering::Relaxed).to_string());
        let mut queues = self.lock()?;
        queues
            .entry(queue.to_string())
            .or_default()
            .waiting
            .push_back(StoredJob {
                id: id.clone(),
                payload,
                attempts_made: 0,
                created_at: Timestamp::now(),
                processed_at: None,
            });
        Ok(id)
    }

    async fn lease(&self, queue: &str, lease_for: Duration) -> Result<Option<Job>, QueueError> {
        let now = Instant::now();
        let mut queues = self.lock()?;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(None);
        };

        state.promote_due(now);
        let Some(mut stored) = state.waiting.pop_front() else {
            return Ok(None);
        };

        stored.processed_at = Some(Timestamp::now());
        let job = stored.to_job(queue);
        state
            .active
            .insert(stored.id.clone(), (stored, now + lease_for));
        Ok(Some(job))
    }

    async fn extend_lease(&self, job: &Job, lease_for: Duration) -> Result<(), QueueError> {
        let mut queues = self.lock()?;
        let lease = queues
            .get_mut(&job.queue_name)
            .and_then(|state| state.active.get_mut(&job.id))
            .ok_or_else(|| QueueError::NotLeased {
                queue: job.queue_name.clone(),
                job_id: job.id.to_string(),
            })?;
        lease.1 = Instant::now() + lease_for;
        Ok(())
    }

    async fn ack(&self, job: &Job) -> Result<(), QueueError> {
        let mut queues = self.lock()?;
        let state = queues.entry(job.queue_name.clone()).or_default();
        state.take_active(&job.queue_name, job)?;
        state.completed += 1;
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &HandlerError) -> Result<FailOutcome, QueueError> {
        let policy = self.policies.for_queue(&job.queue_name);
        let mut queues = self.lock()?;
        let state = queues.entry(job.queue_name.clone()).or_default();
        let mut stored = state.take_active(&job.queue_name, job)?;

        let outcome = policy.decide(stored.attempts_made, error);
        stored.attempts_made = outcome.attempts_made();
        match outcome {
            FailOutcome::Retrying { delay, .. } => state.schedule(Instant::now() + delay, stored),
            FailOutcome::DeadLettered { .. } => state.dead.push((stored, error.clone())),
        }
        Ok(outcome)
    }

    async fn reclaim_stalled(&self, queue: &str) -> Result<Vec<JobId>, QueueError> {
        let now = Instant::now();
        let mut queues = self.lock()?;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let mut expired: Vec<JobId> = state
            .active
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort();

        // Reclaimed jobs go to the head so they are re-delivered first
        for id in expired.iter().rev() {
            if let Some((stored, _)) = state.active.remove(id) {
                state.waiting.push_front(stored);
            }
        }
        Ok(expired)
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
