use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::jobs::role::QueueKind;
use crate::jobs::types::JobHandler;

/// Maps each queue to the handler that runs its jobs.
///
/// Assembled once at startup; lookups perform no I/O.
#[derive(Default, Clone)]
pub struct JobRegistry {
    handlers: BTreeMap<QueueKind, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `queue`, replacing any previous one
    pub fn register(&mut self, queue: QueueKind, handler: Arc<dyn JobHandler>) -> &mut Self {
        if let Some(previous) = self.handlers.insert(queue, handler) {
            tracing::warn!(queue = %queue, replaced = previous.name(), "Handler replaced");
        }
        self
    }

    /// Handler for a queue by name
    pub fn get(&self, queue_name: &str) -> AppResult<Arc<dyn JobHandler>> {
        let kind: QueueKind = queue_name.parse()?;
        self.handler_for(kind)
    }

    pub fn handler_for(&self, queue: QueueKind) -> AppResult<Arc<dyn JobHandler>> {
        self.handlers
            .get(&queue)
            .cloned()
            .ok_or_else(|| AppError::UnknownQueue {
                queue: queue.to_string(),
            })
    }

    pub fn contains(&self, queue: QueueKind) -> bool {
        self.handlers.contains_key(&queue)
    }

    pub fn queues(&self) -> impl Iterator<Item = QueueKind> + '_ {
        self.handlers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.handlers.iter().map(|(q, h)| (q.as_str(), h.name())))
            .finish()
    }
}
