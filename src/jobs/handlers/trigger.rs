use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};

use crate::jobs::error::HandlerError;
use crate::jobs::role::QueueKind;
use crate::jobs::scheduler::TriggerPayload;
use crate::jobs::types::{Job, JobHandler};
use crate::queue::QueueBackend;

/// Forwards a fired schedule's payload onto its target queue
#[derive(Clone)]
pub struct TriggerHandler {
    queue: Arc<dyn QueueBackend>,
}

impl std::fmt::Debug for TriggerHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerHandler")
            .field("queue", &self.queue.name())
            .finish()
    }
}

impl TriggerHandler {
    pub fn new(queue: Arc<dyn QueueBackend>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl JobHandler for TriggerHandler {
    fn name(&self) -> &'static str {
        "trigger"
    }

    async fn handle(&self, job: &Job) -> Result<JsonValue, HandlerError> {
        let trigger: TriggerPayload = job.payload_as()?;

        let target: QueueKind = trigger.target_queue.parse().map_err(|_| {
            HandlerError::fatal(format!(
                "schedule '{}' targets unknown queue '{}'",
                trigger.schedule, trigger.target_queue
            ))
        })?;
        if target == QueueKind::ScheduledTriggers {
            return Err(HandlerError::fatal(format!(
                "schedule '{}' cannot target the trigger queue itself",
                trigger.schedule
            )));
        }

        let job_id = self
            .queue
            .enqueue(target.as_str(), trigger.payload)
            .await
            .map_err(|e| HandlerError::from_source(&format!("forwarding trigger to {target}"), &e))?;

        tracing::info!(
            schedule = %trigger.schedule,
            target_queue = %target,
            job_id = %job_id,
            "Trigger forwarded"
        );
        Ok(json!({"target_queue": target, "job_id": job_id}))
    }
}
