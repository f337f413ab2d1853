//! Builds the configured queue backend.

use std::sync::Arc;

use crate::config::settings::{QueueBackendKind, QueueConfig};
use crate::queue::memory::MemoryQueue;
use crate::queue::redis::RedisQueue;
use crate::queue::{QueueBackend, QueueError, RetryPolicies};

/// Connect the backend selected by `config.backend`.
///
/// The returned handle is shared by every worker pool, the scheduler and the
/// trigger handler.
pub async fn connect_queue(
    config: &QueueConfig,
    policies: RetryPolicies,
) -> Result<Arc<dyn QueueBackend>, QueueError> {
    let backend: Arc<dyn QueueBackend> = match config.backend {
        QueueBackendKind::Memory => Arc::new(MemoryQueue::new(policies)),
        QueueBackendKind::Redis => Arc::new(RedisQueue::new(&config.redis, policies).await?),
    };

    tracing::info!(backend = backend.name(), "Queue backend connected");
    Ok(backend)
}
