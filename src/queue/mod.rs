//! Durable queue abstraction and its adapters.
//!
//! Worker pools talk to the queue only through [`QueueBackend`]. Two adapters
//! ship with the crate:
//! - `memory`: in-process, for development and tests
//! - `redis`: durable, shared between worker processes
//!
//! ```toml
//! [queue]
//! backend = "redis"
//!
//! [queue.redis]
//! url = "redis://127.0.0.1:6379"
//! pool_size = 16
//! connection_timeout = 5
//! key_prefix = "taskhive"
//! ```
//!
//! Retries are decided by the backend from the per-queue [`RetryPolicy`].

mod error;
mod manager;
mod memory;
mod policy;
mod redis;
mod traits;

pub use error::QueueError;
pub use manager::connect_queue;
pub use memory::{MemoryQueue, MemoryQueueStats};
pub use policy::{RetryPolicies, RetryPolicy};
pub use self::redis::RedisQueue;
pub use traits::{FailOutcome, QueueBackend};
