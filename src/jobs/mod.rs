//! Job orchestration: role-selected worker pools running registered handlers
//! against the queue backend, with every attempt recorded in the ledger.

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod role;
pub mod scheduler;
pub mod tracker;
pub mod types;

pub use dispatcher::InstrumentedDispatcher;
pub use error::{HandlerError, SchedulerError};
pub use events::{PoolCounters, PoolEvent};
pub use handlers::build_registry;
pub use models::{ExecutionPatch, ExecutionRecord};
pub use orchestrator::{HealthStatus, Orchestrator, OrchestratorConfig};
pub use pool::{PoolBinding, PoolOptions, WorkerPool, WorkerStatus};
pub use registry::JobRegistry;
pub use role::{QueueKind, QueueProfile, WorkerRole};
pub use scheduler::{TriggerPayload, TriggerScheduler};
pub use tracker::ExecutionTracker;
pub use types::{ExecutionStatus, Job, JobHandler, JobId};
