//! Repository layer for data access operations.

mod job_execution_repo;

pub use job_execution_repo::JobExecutionRepository;
