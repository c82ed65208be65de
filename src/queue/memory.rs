// In-process job store
// Same semantics as the Redis store; used by tests and by `memory://`
// single-process mode, where the API and an embedded worker share it.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::jobs::{Job, JobError, JobPayload, JobStatus, TranscriptResult};
use super::store::{check_terminal_transition, Completion, JobStore, StoreError, StoreResult};

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<String, Job>,
    queue: VecDeque<String>,
    leases: HashMap<String, Instant>,
    /// Eviction deadlines of terminal jobs.
    expiries: HashMap<String, Instant>,
}

impl MemoryState {
    fn evict_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .expiries
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            self.expiries.remove(&id);
            self.jobs.remove(&id);
        }
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
    /// How long terminal jobs are kept; zero keeps them forever.
    result_ttl: Duration,
}

impl MemoryJobStore {
    /// A store that keeps terminal jobs forever.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result_ttl(result_ttl: Duration) -> Self {
        Self {
            result_ttl,
            ..Self::default()
        }
    }

    fn expiry(&self) -> Option<Instant> {
        (!self.result_ttl.is_zero()).then(|| Instant::now() + self.result_ttl)
    }

    /// Number of jobs ever enqueued (terminal ones included).
    pub async fn len(&self) -> usize {
        let mut state = self.state.lock().await;
        state.evict_expired();
        state.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn finish(
        &self,
        job_id: &str,
        target: JobStatus,
        apply: impl FnOnce(&mut Job),
    ) -> StoreResult<Completion> {
        let expiry = self.expiry();
        let mut state = self.state.lock().await;
        state.evict_expired();
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

        let completion = check_terminal_transition(job_id, job.status, target)?;
        if completion == Completion::Applied {
            job.status = target;
            job.ended_at = Some(Utc::now());
            apply(job);
            state.leases.remove(job_id);
            if let Some(deadline) = expiry {
                state.expiries.insert(job_id.to_string(), deadline);
            }
        }
        Ok(completion)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, payload: JobPayload) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        let mut state = self.state.lock().await;
        state.evict_expired();
        state.jobs.insert(id.clone(), Job::new(id.clone(), payload));
        state.queue.push_back(id.clone());
        Ok(id)
    }

    async fn fetch(&self, job_id: &str) -> StoreResult<Option<Job>> {
        let mut state = self.state.lock().await;
        state.evict_expired();
        Ok(state.jobs.get(job_id).cloned())
    }

    async fn claim_next(&self, worker_id: &str, lease: Duration) -> StoreResult<Option<Job>> {
        let mut state = self.state.lock().await;
        while let Some(id) = state.queue.pop_front() {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            if job.status != JobStatus::Queued {
                continue;
            }
            job.status = JobStatus::Started;
            job.started_at = Some(Utc::now());
            job.worker_id = Some(worker_id.to_string());
            let claimed = job.clone();
            state.leases.insert(id, Instant::now() + lease);
            return Ok(Some(claimed));
        }
        Ok(None)
    }

    async fn renew_lease(&self, job_id: &str, worker_id: &str, lease: Duration) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let owned = state.jobs.get(job_id).is_some_and(|job| {
            job.status == JobStatus::Started && job.worker_id.as_deref() == Some(worker_id)
        });
        if owned {
            state.leases.insert(job_id.to_string(), Instant::now() + lease);
        }
        Ok(owned)
    }

    async fn complete(&self, job_id: &str, result: TranscriptResult) -> StoreResult<Completion> {
        self.finish(job_id, JobStatus::Finished, |job| job.result = Some(result))
            .await
    }

    async fn fail(&self, job_id: &str, error: JobError) -> StoreResult<Completion> {
        self.finish(job_id, JobStatus::Failed, |job| job.error = Some(error))
            .await
    }

    async fn reap_expired(&self) -> StoreResult<Vec<Job>> {
        let now = Instant::now();
        let expiry = self.expiry();
        let mut state = self.state.lock().await;
        let expired: Vec<String> = state
            .leases
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut reaped = Vec::with_capacity(expired.len());
        for id in expired {
            state.leases.remove(&id);
            if let Some(job) = state.jobs.get_mut(&id) {
                if job.status == JobStatus::Started {
                    job.status = JobStatus::Failed;
                    job.ended_at = Some(Utc::now());
                    job.error = Some(JobError::worker_lost());
                    reaped.push(job.clone());
                    if let Some(deadline) = expiry {
                        state.expiries.insert(id, deadline);
                    }
                }
            }
        }
        Ok(reaped)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::jobs::{FailureKind, Language};
    use std::collections::HashSet;
    use std::sync::Arc;

    const LEASE: Duration = Duration::from_secs(60);

    fn payload(name: &str) -> JobPayload {
        JobPayload::new(format!("/tmp/{name}.m4a"), Language::Auto)
    }

    #[tokio::test]
    async fn test_enqueue_then_fetch_is_queued() {
        let store = MemoryJobStore::new();
        let id = store.enqueue(payload("a")).await.unwrap();

        let job = store.fetch(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert!(store.fetch("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_is_fifo() {
        let store = MemoryJobStore::new();
        let first = store.enqueue(payload("first")).await.unwrap();
        let second = store.enqueue(payload("second")).await.unwrap();

        let a = store.claim_next("w", LEASE).await.unwrap().unwrap();
        let b = store.claim_next("w", LEASE).await.unwrap().unwrap();
        assert_eq!(a.id, first);
        assert_eq!(b.id, second);
        assert_eq!(a.status, JobStatus::Started);
        assert!(store.claim_next("w", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_rules() {
        let store = MemoryJobStore::new();
        let id = store.enqueue(payload("a")).await.unwrap();

        // Not started yet
        let err = store.complete(&id, TranscriptResult::new("x")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { from: JobStatus::Queued, .. }));

        store.claim_next("w", LEASE).await.unwrap();
        assert_eq!(
            store.complete(&id, TranscriptResult::new("hello")).await.unwrap(),
            Completion::Applied
        );
        assert_eq!(
            store.complete(&id, TranscriptResult::new("other")).await.unwrap(),
            Completion::AlreadyTerminal
        );
        assert!(store
            .fail(&id, JobError::new(FailureKind::Timeout, "late"))
            .await
            .is_err());

        let job = store.fetch(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.result.unwrap().transcript, "hello");
        assert!(job.error.is_none());

        assert!(matches!(
            store.complete("nope", TranscriptResult::new("x")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_exclusive() {
        let store = Arc::new(MemoryJobStore::new());
        let mut enqueued = HashSet::new();
        for i in 0..50 {
            enqueued.insert(store.enqueue(payload(&i.to_string())).await.unwrap());
        }

        let workers = (0..8).map(|w| {
            let store = store.clone();
            tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = store.claim_next(&format!("w{w}"), LEASE).await.unwrap() {
                    claimed.push(job.id);
                    tokio::task::yield_now().await;
                }
                claimed
            })
        });

        let mut seen = Vec::new();
        for claimed in futures::future::join_all(workers).await {
            seen.extend(claimed.unwrap());
        }

        let unique: HashSet<_> = seen.iter().cloned().collect();
        assert_eq!(seen.len(), 50, "every job claimed exactly once");
        assert_eq!(unique, enqueued);
    }

    #[tokio::test]
    async fn test_expired_lease_fails_job() {
        let store = MemoryJobStore::new();
        let id = store.enqueue(payload("a")).await.unwrap();
        store.claim_next("w", Duration::from_millis(10)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let reaped = store.reap_expired().await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].id, id);

        let job = store.fetch(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().kind, FailureKind::WorkerLost);

        // The late worker can no longer finish it
        assert!(store.complete(&id, TranscriptResult::new("x")).await.is_err());
        assert!(!store.renew_lease(&id, "w", LEASE).await.unwrap());
    }

    #[tokio::test]
    async fn test_renewed_lease_survives_reaper() {
        let store = MemoryJobStore::new();
        let id = store.enqueue(payload("a")).await.unwrap();
        store.claim_next("w", Duration::from_millis(10)).await.unwrap();

        assert!(store.renew_lease(&id, "w", LEASE).await.unwrap());
        assert!(!store.renew_lease(&id, "someone-else", LEASE).await.unwrap());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.reap_expired().await.unwrap().is_empty());
        assert_eq!(store.fetch(&id).await.unwrap().unwrap().status, JobStatus::Started);
    }

    #[tokio::test]
    async fn test_terminal_jobs_expire_after_result_ttl() {
        let store = MemoryJobStore::with_result_ttl(Duration::from_millis(20));
        let finished = store.enqueue(payload("a")).await.unwrap();
        let pending = store.enqueue(payload("b")).await.unwrap();
        store.claim_next("w", LEASE).await.unwrap();
        store.complete(&finished, TranscriptResult::new("x")).await.unwrap();
        assert!(store.fetch(&finished).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.fetch(&finished).await.unwrap().is_none());
        assert_eq!(
            store.fetch(&pending).await.unwrap().unwrap().status,
            JobStatus::Queued
        );
        assert_eq!(store.len().await, 1);
    }
}
