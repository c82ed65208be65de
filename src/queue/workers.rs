// Worker process loop
//
// Claims the next queued job, runs the executor while renewing the lease,
// writes back the terminal state and removes the staged audio. Runs until
// the cancellation token fires, or until the queue is empty in burst mode.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::JobExecutor;
use super::jobs::{Job, JobError, JobOutcome, JobStatus, TranscriptResult};
use super::store::{Completion, JobStore, StoreError, StoreResult};
use crate::config::WorkerConfig;
use crate::utils::retry::{with_retry, RetryPolicy};

/// Extra attempts for writing a job's terminal state after a transient
/// store error.
const STORE_WRITE_RETRIES: u32 = 3;

/// What [`Worker::work_once`] did with the job it claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// The terminal state was written.
    Recorded(JobStatus),
    /// The job ran but its outcome could not be written; the reaper fails
    /// it once the lease runs out.
    Unrecorded,
}

pub struct Worker {
    id: String,
    store: Arc<dyn JobStore>,
    executor: JobExecutor,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn JobStore>,
        executor: JobExecutor,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            store,
            executor,
            config,
        }
    }

    /// `<host>-<pid>-<random>`, unique across processes sharing a store.
    pub fn generate_id() -> String {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "worker".to_string());
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", host, std::process::id(), &suffix[..8])
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Main loop. Returns only when `shutdown` is cancelled; a job that is
    /// already running is finished first.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.id, "Worker started");
        let mut last_reap: Option<Instant> = None;

        while !shutdown.is_cancelled() {
            if last_reap.map_or(true, |at| at.elapsed() >= self.config.reap_interval) {
                self.reap_expired().await;
                last_reap = Some(Instant::now());
            }

            let idle = match self.work_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!(worker_id = %self.id, "Job store error: {}", e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => {},
                    _ = sleep(self.config.poll_interval) => {},
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Burst mode: process jobs until the queue is empty, then return how
    /// many were handled.
    pub async fn run_burst(&self, shutdown: CancellationToken) -> StoreResult<usize> {
        info!(worker_id = %self.id, "Worker started in burst mode");
        self.reap_expired().await;

        let mut processed = 0;
        while !shutdown.is_cancelled() {
            match self.work_once().await? {
                Some(_) => processed += 1,
                None => break,
            }
        }

        info!(worker_id = %self.id, processed, "Queue drained, worker exiting");
        Ok(processed)
    }

    /// Claim and fully process at most one job. Returns `None` only when
    /// nothing was queued.
    pub async fn work_once(&self) -> StoreResult<Option<Processed>> {
        let Some(job) = self.store.claim_next(&self.id, self.config.lease).await? else {
            return Ok(None);
        };

        info!(
            worker_id = %self.id,
            job_id = %job.id,
            language = %job.payload.language,
            "Claimed job"
        );

        let started = Instant::now();
        let outcome = self.execute_with_lease(&job).await;
        let processed = self.record(&job, outcome).await;

        remove_staged_file(&job.payload.filepath).await;

        info!(
            worker_id = %self.id,
            job_id = %job.id,
            outcome = ?processed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job processed"
        );
        Ok(Some(processed))
    }

    /// Run the executor, renewing the lease every third of its length.
    async fn execute_with_lease(&self, job: &Job) -> JobOutcome {
        let period = (self.config.lease / 3).max(Duration::from_millis(10));
        let mut heartbeat = interval(period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        heartbeat.tick().await;

        let execution = self.executor.execute(&job.payload);
        tokio::pin!(execution);

        loop {
            tokio::select! {
                outcome = &mut execution => return outcome,
                _ = heartbeat.tick() => {
                    match self.store.renew_lease(&job.id, &self.id, self.config.lease).await {
                        Ok(true) => debug!(job_id = %job.id, "Lease renewed"),
                        Ok(false) => warn!(job_id = %job.id, "Lease lost while executing"),
                        Err(e) => warn!(job_id = %job.id, "Failed to renew lease: {}", e),
                    }
                }
            }
        }
    }

    /// Write the terminal state, retrying transient store errors. A write
    /// that still fails is logged, never propagated: one bad job must not
    /// stop the worker.
    async fn record(&self, job: &Job, outcome: JobOutcome) -> Processed {
        let policy = RetryPolicy {
            max_retries: STORE_WRITE_RETRIES,
            base_delay: self.config.poll_interval,
        };

        let (status, written) = match outcome {
            JobOutcome::Success { transcript } => {
                let result = TranscriptResult::new(transcript);
                let written = with_retry(
                    &policy,
                    |_| self.store.complete(&job.id, result.clone()),
                    is_transient,
                )
                .await;
                (JobStatus::Finished, written)
            }
            JobOutcome::Failure { kind, message } => {
                warn!(job_id = %job.id, kind = ?kind, "Job failed: {}", message);
                let error = JobError::new(kind, message);
                let written = with_retry(
                    &policy,
                    |_| self.store.fail(&job.id, error.clone()),
                    is_transient,
                )
                .await;
                (JobStatus::Failed, written)
            }
        };

        match written {
            Ok(Completion::Applied) => Processed::Recorded(status),
            Ok(Completion::AlreadyTerminal) => {
                warn!(job_id = %job.id, %status, "Job was already terminal");
                Processed::Recorded(status)
            }
            Err(e) => {
                error!(job_id = %job.id, %status, "Failed to record job outcome: {}", e);
                Processed::Unrecorded
            }
        }
    }

    async fn reap_expired(&self) {
        match self.store.reap_expired().await {
            Ok(reaped) => {
                for job in reaped {
                    warn!(
                        job_id = %job.id,
                        previous_worker = job.worker_id.as_deref().unwrap_or("unknown"),
                        "Lease expired, job marked failed"
                    );
                    // Ownership of the staged file passes to the reaper
                    remove_staged_file(&job.payload.filepath).await;
                }
            }
            Err(e) => error!(worker_id = %self.id, "Failed to reap expired leases: {}", e),
        }
    }
}

fn is_transient(error: &StoreError) -> bool {
    matches!(error, StoreError::Redis(_))
}

async fn remove_staged_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Deleted staged file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to delete staged file: {}", e),
    }
}
