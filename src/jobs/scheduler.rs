use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::config::ScheduleConfig;
use crate::jobs::error::SchedulerError;
use crate::jobs::role::QueueKind;
use crate::queue::QueueBackend;

/// Payload of a job on the scheduled-triggers queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerPayload {
    pub schedule: String,
    pub target_queue: String,
    #[serde(default)]
    pub payload: JsonValue,
}

impl From<&ScheduleConfig> for TriggerPayload {
    fn from(schedule: &ScheduleConfig) -> Self {
        Self {
            schedule: schedule.name.clone(),
            target_queue: schedule.target_queue.clone(),
            payload: schedule.payload.clone(),
        }
    }
}

/// Enqueues trigger jobs on the scheduled-triggers queue from cron schedules
pub struct TriggerScheduler {
    scheduler: Mutex<JobScheduler>,
    schedules: usize,
}

impl TriggerScheduler {
    /// Register every schedule; nothing fires until [`start`](Self::start).
    pub async fn new(
        schedules: &[ScheduleConfig],
        queue: Arc<dyn QueueBackend>,
    ) -> Result<Self, SchedulerError> {
        let scheduler = JobScheduler::new().await?;

        for schedule in schedules {
            scheduler
                .add(Self::cron_job(schedule, queue.clone())?)
                .await?;
            tracing::debug!(
                schedule = %schedule.name,
                cron = %schedule.cron,
                target_queue = %schedule.target_queue,
                "Schedule registered"
            );
        }

        Ok(Self {
            scheduler: Mutex::new(scheduler),
            schedules: schedules.len(),
        })
    }

    fn cron_job(
        schedule: &ScheduleConfig,
        queue: Arc<dyn QueueBackend>,
    ) -> Result<Job, SchedulerError> {
        let name = schedule.name.clone();
        let trigger = TriggerPayload::from(schedule);

        Job::new_async(schedule.cron.as_str(), move |_uuid, _lock| {
            let queue = Arc::clone(&queue);
            let name = name.clone();
            let trigger = trigger.clone();

            Box::pin(async move {
                let payload = match serde_json::to_value(&trigger) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(schedule = %name, error = %e, "Trigger payload not serializable");
                        return;
                    }
                };

                match queue
                    .enqueue(QueueKind::ScheduledTriggers.as_str(), payload)
                    .await
                {
                    Ok(job_id) => {
                        tracing::info!(schedule = %name, job_id = %job_id, "Schedule fired");
                    }
                    Err(source) => {
                        let error = SchedulerError::Enqueue {
                            name: name.clone(),
                            source,
                        };
                        tracing::error!(schedule = %name, error = %error, "Schedule could not enqueue its trigger");
                    }
                }
            })
        })
        .map_err(|e| SchedulerError::InvalidCronExpression {
            name: schedule.name.clone(),
            message: e.to_string(),
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.scheduler.lock().await.start().await?;
        tracing::info!(schedules = self.schedules, "Trigger scheduler started");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.scheduler.lock().await.shutdown().await?;
        tracing::info!("Trigger scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::test_support::wait_until;
    use crate::queue::{MemoryQueue, RetryPolicies};
    use serde_json::json;
    use std::time::Duration;

    fn schedule(name: &str, cron: &str) -> ScheduleConfig {
        ScheduleConfig {
            name: name.to_string(),
            cron: cron.to_string(),
            target_queue: "maintenance".to_string(),
            payload: json!({"task": "purge"}),
        }
    }

    #[test]
    fn test_trigger_payload_from_schedule() {
        let trigger = TriggerPayload::from(&schedule("nightly", "0 0 3 * * *"));
        assert_eq!(
            serde_json::to_value(&trigger).unwrap(),
            json!({"schedule": "nightly", "target_queue": "maintenance", "payload": {"task": "purge"}})
        );
    }

    #[tokio::test]
    async fn test_invalid_cron_is_rejected() {
        let queue = Arc::new(MemoryQueue::new(RetryPolicies::default()));
        let result = TriggerScheduler::new(&[schedule("broken", "every tuesday")], queue).await;
        assert!(matches!(
            result,
            Err(SchedulerError::InvalidCronExpression { name, .. }) if name == "broken"
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_schedule_enqueues_trigger() {
        let queue = Arc::new(MemoryQueue::new(RetryPolicies::default()));
        let scheduler = TriggerScheduler::new(&[schedule("every-second", "* * * * * *")], queue.clone())
            .await
            .unwrap();
        scheduler.start().await.unwrap();

        tokio::time::timeout(
            Duration::from_secs(10),
            wait_until(|| queue.stats("scheduled-triggers").waiting > 0),
        )
        .await
        .expect("schedule should fire within ten seconds");
        scheduler.shutdown().await.unwrap();

        let job = queue
            .lease("scheduled-triggers", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        let trigger: TriggerPayload = job.payload_as().unwrap();
        assert_eq!(trigger.schedule, "every-second");
        assert_eq!(trigger.target_queue, "maintenance");
    }
}
