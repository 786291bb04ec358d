//! Durable job queue and worker loop.

pub mod repository;
pub mod runner;
pub mod types;

pub use repository::JobRepository;
pub use runner::{ensure_renewal_job, spawn_workers, JobRunner};
pub use types::{
    Job, JobFilter, JobOutcome, JobPayload, JobType, NewJob, DEFAULT_CLAIM_STALE_SECS,
};
