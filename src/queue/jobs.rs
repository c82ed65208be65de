// Job definitions shared by the API, the job store and the worker

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job. Transitions only ever move forward:
/// `Queued -> Started -> {Finished | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    /// Whether `self -> next` is a legal single-step transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Started)
                | (JobStatus::Started, JobStatus::Finished)
                | (JobStatus::Started, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "started" => Ok(JobStatus::Started),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Language selector sent along with an upload.
///
/// Only `en` and `zh` pin the language; every other value (including
/// `auto`) leaves detection to the transcription service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "en")]
    English,
    #[serde(rename = "zh")]
    Chinese,
}

impl Language {
    /// Lenient parse: unrecognized selectors mean auto-detect.
    pub fn from_selector(selector: &str) -> Self {
        match selector.trim() {
            "en" => Language::English,
            "zh" => Language::Chinese,
            _ => Language::Auto,
        }
    }

    /// The explicit language parameter for the external API, if any.
    pub fn code(self) -> Option<&'static str> {
        match self {
            Language::Auto => None,
            Language::English => Some("en"),
            Language::Chinese => Some("zh"),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code().unwrap_or("auto"))
    }
}

/// Task inputs, stored by reference: the audio stays on the staging
/// filesystem and only its absolute path travels through the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub filepath: PathBuf,
    pub language: Language,
}

impl JobPayload {
    pub fn new(filepath: impl Into<PathBuf>, language: Language) -> Self {
        Self {
            filepath: filepath.into(),
            language,
        }
    }
}

/// Stored result of a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub success: bool,
    pub transcript: String,
}

impl TranscriptResult {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            success: true,
            transcript: transcript.into(),
        }
    }
}

/// Error taxonomy for failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Credential for the transcription service is missing.
    Configuration,
    /// The external call exceeded its bounded wait.
    Timeout,
    /// Any other failure reported by the external service or client.
    ExternalService,
    /// The staged audio could not be read.
    Io,
    /// The claiming worker let its lease expire.
    WorkerLost,
}

/// Stored error of a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn worker_lost() -> Self {
        Self::new(FailureKind::WorkerLost, WORKER_LOST_MESSAGE)
    }
}

pub const WORKER_LOST_MESSAGE: &str = "Worker stopped before the job finished.";

/// Outcome produced by the job executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success { transcript: String },
    Failure { kind: FailureKind, message: String },
}

impl JobOutcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        JobOutcome::Failure {
            kind,
            message: message.into(),
        }
    }
}

/// Snapshot of a job as held by the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub result: Option<TranscriptResult>,
    pub error: Option<JobError>,
}

impl Job {
    pub fn new(id: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            id: id.into(),
            payload,
            status: JobStatus::Queued,
            enqueued_at: Utc::now(),
            started_at: None,
            ended_at: None,
            worker_id: None,
            result: None,
            error: None,
        }
    }
}
