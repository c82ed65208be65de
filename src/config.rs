use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::retry::RetryPolicy;

/// Upload size limit: 16 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub transcription: TranscriptionConfig,
    pub worker: WorkerConfig,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
    /// How long terminal jobs are kept; zero keeps them forever.
    pub result_ttl: Duration,
}

#[derive(Clone)]
pub struct TranscriptionConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

// Hand-written so the key never reaches the logs
impl std::fmt::Debug for TranscriptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub lease: Duration,
    pub reap_interval: Duration,
}

impl TranscriptionConfig {
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }
}

impl Config {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let string_or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            server: ServerConfig {
                port: parse_or(&var, "PORT", 5000)?,
                host: string_or("HOST", "0.0.0.0"),
                cors_allowed_origins: string_or("ALLOWED_ORIGINS", "*")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                upload_dir: var("UPLOAD_FOLDER")
                    .map(PathBuf::from)
                    .unwrap_or_else(env::temp_dir),
                max_upload_bytes: parse_or(&var, "MAX_CONTENT_LENGTH", DEFAULT_MAX_UPLOAD_BYTES)?,
            },
            redis: RedisConfig {
                url: string_or("REDIS_URL", "redis://localhost:6379/0"),
                key_prefix: string_or("JOB_KEY_PREFIX", "transcribe"),
                result_ttl: Duration::from_secs(parse_or(&var, "RESULT_TTL_SECS", 500)?),
            },
            transcription: TranscriptionConfig {
                api_key: var("OPENAI_API_KEY"),
                base_url: string_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                model: string_or("OPENAI_TRANSCRIPTION_MODEL", "whisper-1"),
                connect_timeout: Duration::from_secs(positive_or(&var, "OPENAI_CONNECT_TIMEOUT_SECS", 30)?),
                read_timeout: Duration::from_secs(positive_or(&var, "OPENAI_READ_TIMEOUT_SECS", 30)?),
                request_timeout: Duration::from_secs(positive_or(&var, "OPENAI_TIMEOUT_SECS", 60)?),
                retry: RetryPolicy {
                    max_retries: parse_or(&var, "OPENAI_MAX_RETRIES", 2)?,
                    base_delay: Duration::from_millis(parse_or(&var, "OPENAI_RETRY_DELAY_MS", 1000)?),
                },
            },
            worker: WorkerConfig {
                poll_interval: Duration::from_millis(positive_or(&var, "WORKER_POLL_INTERVAL_MS", 500)?),
                lease: Duration::from_secs(positive_or(&var, "JOB_LEASE_SECS", 180)?),
                reap_interval: Duration::from_secs(positive_or(&var, "REAP_INTERVAL_SECS", 30)?),
            },
            log_dir: var("LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

/// Like [`parse_or`], for durations and intervals that must not be zero.
fn positive_or<F>(var: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(var, key, default)?;
    if value == 0 {
        anyhow::bail!("Invalid value for {key}: must be greater than zero");
    }
    Ok(value)
}
