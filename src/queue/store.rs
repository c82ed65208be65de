//! Job store contract
//!
//! The store is the only state shared between the API process and the
//! worker processes. Its `claim_next` is the sole mutual-exclusion point:
//! implementations must hand each queued job to exactly one caller.

use std::time::Duration;

use async_trait::async_trait;

use super::jobs::{Job, JobError, JobPayload, JobStatus, TranscriptResult};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt job record {job_id}: {reason}")]
    Corrupt { job_id: String, reason: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result of a terminal transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The job moved from `started` to the requested terminal state.
    Applied,
    /// The job was already in the requested terminal state; nothing changed.
    AlreadyTerminal,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Append a new `queued` job and return its fresh id.
    async fn enqueue(&self, payload: JobPayload) -> StoreResult<String>;

    /// Current snapshot of a job, or `None` if the id was never issued
    /// (or has been evicted by retention).
    async fn fetch(&self, job_id: &str) -> StoreResult<Option<Job>>;

    /// Atomically take the oldest queued job, mark it `started` and grant
    /// `worker_id` a lease of `lease`.
    async fn claim_next(&self, worker_id: &str, lease: Duration) -> StoreResult<Option<Job>>;

    /// Extend the lease of a job still started and owned by `worker_id`.
    /// Returns `false` when the job is no longer ours.
    async fn renew_lease(&self, job_id: &str, worker_id: &str, lease: Duration) -> StoreResult<bool>;

    async fn complete(&self, job_id: &str, result: TranscriptResult) -> StoreResult<Completion>;

    async fn fail(&self, job_id: &str, error: JobError) -> StoreResult<Completion>;

    /// Fail every started job whose lease has expired and return them.
    async fn reap_expired(&self) -> StoreResult<Vec<Job>>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Shared transition check for terminal writes.
pub(crate) fn check_terminal_transition(
    job_id: &str,
    current: JobStatus,
    target: JobStatus,
) -> StoreResult<Completion> {
    if current == target {
        return Ok(Completion::AlreadyTerminal);
    }
    if current.can_transition_to(target) {
        return Ok(Completion::Applied);
    }
    Err(StoreError::InvalidTransition {
        job_id: job_id.to_string(),
        from: current,
        to: target,
    })
}
