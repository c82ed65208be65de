// Background job queue: job model, stores, executor and worker loop

pub mod executor;
pub mod jobs;
pub mod memory;
pub mod redis_store;
pub mod store;
pub mod workers;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

pub use executor::JobExecutor;
pub use jobs::{FailureKind, Job, JobError, JobOutcome, JobPayload, JobStatus, Language, TranscriptResult};
pub use memory::MemoryJobStore;
pub use redis_store::RedisJobStore;
pub use store::{Completion, JobStore, StoreError, StoreResult};
pub use workers::{Processed, Worker};

use crate::config::RedisConfig;

/// URL scheme that selects the in-process store.
pub const MEMORY_STORE_URL: &str = "memory://";

pub fn is_memory_store(config: &RedisConfig) -> bool {
    config.url.starts_with(MEMORY_STORE_URL)
}

/// Open the job store named by the configuration.
pub async fn connect(config: &RedisConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    if is_memory_store(config) {
        warn!("Using the in-process job store; jobs are lost on restart and invisible to other processes");
        return Ok(Arc::new(MemoryJobStore::with_result_ttl(config.result_ttl)));
    }

    let store = RedisJobStore::connect(config)
        .await
        .context("Failed to connect to job store")?;
    store.ping().await.context("Job store did not answer PING")?;
    info!(prefix = %config.key_prefix, "Connected to Redis job store");
    Ok(Arc::new(store))
}
