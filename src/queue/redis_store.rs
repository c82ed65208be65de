//! Redis-backed job store
//!
//! Layout, all under a configurable prefix:
//! - `<prefix>:job:<id>`  hash with the job record
//! - `<prefix>:queue`     list of pending ids, FIFO (RPUSH / LPOP)
//! - `<prefix>:leases`    sorted set of started ids scored by lease deadline (unix ms)
//!
//! Every state change runs server-side as a Lua script or a MULTI block, so
//! concurrent workers in different processes never claim the same job.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::debug;
use uuid::Uuid;

use super::jobs::{Job, JobError, JobPayload, JobStatus, TranscriptResult};
use super::store::{Completion, JobStore, StoreError, StoreResult};
use crate::config::RedisConfig;

const CLAIM_SCRIPT: &str = r"
while true do
  local id = redis.call('LPOP', KEYS[1])
  if not id then
    return false
  end
  local key = ARGV[1] .. id
  if redis.call('HGET', key, 'status') == 'queued' then
    redis.call('HSET', key, 'status', 'started', 'started_at', ARGV[2], 'worker_id', ARGV[4])
    redis.call('ZADD', KEYS[2], ARGV[3], id)
    return id
  end
end
";

const RENEW_SCRIPT: &str = r"
if redis.call('HGET', KEYS[1], 'status') == 'started'
   and redis.call('HGET', KEYS[1], 'worker_id') == ARGV[1] then
  redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
  return 1
end
return 0
";

// ARGV: target status, field, json value, ended_at, ttl secs, job id, lease cutoff ('' to skip)
const FINISH_SCRIPT: &str = r"
if ARGV[7] ~= '' then
  local score = redis.call('ZSCORE', KEYS[2], ARGV[6])
  if not score or tonumber(score) > tonumber(ARGV[7]) then
    return 'renewed'
  end
end
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
  redis.call('ZREM', KEYS[2], ARGV[6])
  return 'missing'
end
if status == ARGV[1] then
  return 'duplicate'
end
if status ~= 'started' then
  return status
end
redis.call('HSET', KEYS[1], 'status', ARGV[1], ARGV[2], ARGV[3], 'ended_at', ARGV[4])
redis.call('ZREM', KEYS[2], ARGV[6])
if tonumber(ARGV[5]) > 0 then
  redis.call('EXPIRE', KEYS[1], ARGV[5])
end
return 'applied'
";

#[derive(Clone)]
pub struct RedisJobStore {
    conn: ConnectionManager,
    prefix: String,
    result_ttl: Duration,
    claim_script: Script,
    renew_script: Script,
    finish_script: Script,
}

impl RedisJobStore {
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            prefix: config.key_prefix.clone(),
            result_ttl: config.result_ttl,
            claim_script: Script::new(CLAIM_SCRIPT),
            renew_script: Script::new(RENEW_SCRIPT),
            finish_script: Script::new(FINISH_SCRIPT),
        })
    }

    fn job_key_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    fn job_key(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    fn queue_key(&self) -> String {
        format!("{}:queue", self.prefix)
    }

    fn leases_key(&self) -> String {
        format!("{}:leases", self.prefix)
    }

    /// Run the terminal transition script. `lease_cutoff_ms` makes the
    /// write conditional on the lease having expired at that instant.
    async fn finish(
        &self,
        job_id: &str,
        target: JobStatus,
        field: &str,
        value: String,
        lease_cutoff_ms: Option<i64>,
    ) -> StoreResult<Option<Completion>> {
        let mut conn = self.conn.clone();
        let cutoff = lease_cutoff_ms.map(|ms| ms.to_string()).unwrap_or_default();

        let reply: String = self
            .finish_script
            .key(self.job_key(job_id))
            .key(self.leases_key())
            .arg(target.as_str())
            .arg(field)
            .arg(value)
            .arg(Utc::now().to_rfc3339())
            .arg(self.result_ttl.as_secs())
            .arg(job_id)
            .arg(cutoff)
            .invoke_async(&mut conn)
            .await?;

        match reply.as_str() {
            "applied" => Ok(Some(Completion::Applied)),
            "duplicate" => Ok(Some(Completion::AlreadyTerminal)),
            "renewed" => Ok(None),
            "missing" => Err(StoreError::NotFound(job_id.to_string())),
            other => {
                let from = other.parse::<JobStatus>().map_err(|reason| StoreError::Corrupt {
                    job_id: job_id.to_string(),
                    reason,
                })?;
                Err(StoreError::InvalidTransition {
                    job_id: job_id.to_string(),
                    from,
                    to: target,
                })
            }
        }
    }

    async fn finish_now(
        &self,
        job_id: &str,
        target: JobStatus,
        field: &str,
        value: String,
    ) -> StoreResult<Completion> {
        self.finish(job_id, target, field, value, None)
            .await?
            .ok_or_else(|| StoreError::Corrupt {
                job_id: job_id.to_string(),
                reason: "unconditional finish reported a renewed lease".to_string(),
            })
    }
}

fn lease_deadline_ms(lease: Duration) -> i64 {
    let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_add(lease_ms)
}

fn parse_timestamp(
    job_id: &str,
    fields: &HashMap<String, String>,
    name: &str,
) -> StoreResult<Option<DateTime<Utc>>> {
    fields
        .get(name)
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| StoreError::Corrupt {
                    job_id: job_id.to_string(),
                    reason: format!("bad {name}: {e}"),
                })
        })
        .transpose()
}

/// Rebuild a job from its hash fields.
fn job_from_fields(job_id: &str, fields: HashMap<String, String>) -> StoreResult<Job> {
    let corrupt = |reason: String| StoreError::Corrupt {
        job_id: job_id.to_string(),
        reason,
    };

    let status = fields
        .get("status")
        .ok_or_else(|| corrupt("missing status".to_string()))?
        .parse::<JobStatus>()
        .map_err(corrupt)?;
    let payload: JobPayload = serde_json::from_str(
        fields
            .get("payload")
            .ok_or_else(|| corrupt("missing payload".to_string()))?,
    )?;
    let enqueued_at = parse_timestamp(job_id, &fields, "enqueued_at")?
        .ok_or_else(|| corrupt("missing enqueued_at".to_string()))?;

    let result = match (status, fields.get("result")) {
        (JobStatus::Finished, Some(raw)) => Some(serde_json::from_str::<TranscriptResult>(raw)?),
        _ => None,
    };
    let error = match (status, fields.get("error")) {
        (JobStatus::Failed, Some(raw)) => Some(serde_json::from_str::<JobError>(raw)?),
        _ => None,
    };

    Ok(Job {
        id: job_id.to_string(),
        payload,
        status,
        enqueued_at,
        started_at: parse_timestamp(job_id, &fields, "started_at")?,
        ended_at: parse_timestamp(job_id, &fields, "ended_at")?,
        worker_id: fields.get("worker_id").cloned(),
        result,
        error,
    })
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn enqueue(&self, payload: JobPayload) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        let fields = [
            ("id", id.clone()),
            ("status", JobStatus::Queued.as_str().to_string()),
            ("payload", serde_json::to_string(&payload)?),
            ("enqueued_at", Utc::now().to_rfc3339()),
        ];

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(self.job_key(&id), &fields)
            .ignore()
            .rpush(self.queue_key(), &id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(job_id = %id, "Job enqueued");
        Ok(id)
    }

    async fn fetch(&self, job_id: &str) -> StoreResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.job_key(job_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        job_from_fields(job_id, fields).map(Some)
    }

    async fn claim_next(&self, worker_id: &str, lease: Duration) -> StoreResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let claimed: Option<String> = self
            .claim_script
            .key(self.queue_key())
            .key(self.leases_key())
            .arg(self.job_key_prefix())
            .arg(Utc::now().to_rfc3339())
            .arg(lease_deadline_ms(lease))
            .arg(worker_id)
            .invoke_async(&mut conn)
            .await?;

        match claimed {
            Some(id) => self.fetch(&id).await,
            None => Ok(None),
        }
    }

    async fn renew_lease(&self, job_id: &str, worker_id: &str, lease: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let renewed: i64 = self
            .renew_script
            .key(self.job_key(job_id))
            .key(self.leases_key())
            .arg(worker_id)
            .arg(lease_deadline_ms(lease))
            .arg(job_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn complete(&self, job_id: &str, result: TranscriptResult) -> StoreResult<Completion> {
        let value = serde_json::to_string(&result)?;
        self.finish_now(job_id, JobStatus::Finished, "result", value).await
    }

    async fn fail(&self, job_id: &str, error: JobError) -> StoreResult<Completion> {
        let value = serde_json::to_string(&error)?;
        self.finish_now(job_id, JobStatus::Failed, "error", value).await
    }

    async fn reap_expired(&self) -> StoreResult<Vec<Job>> {
        let now_ms = Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();
        let expired: Vec<String> = conn.zrangebyscore(self.leases_key(), "-inf", now_ms).await?;

        let value = serde_json::to_string(&JobError::worker_lost())?;
        let mut reaped = Vec::new();
        for id in expired {
            let outcome = self
                .finish(&id, JobStatus::Failed, "error", value.clone(), Some(now_ms))
                .await;
            match outcome {
                Ok(Some(Completion::Applied)) => {
                    if let Some(job) = self.fetch(&id).await? {
                        reaped.push(job);
                    }
                }
                // Renewed in the meantime, already terminal, or evicted
                Ok(_) | Err(StoreError::NotFound(_)) | Err(StoreError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reaped)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
