use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::queue::{JobStatus, JobStore, TranscriptResult};
use crate::storage::StagingArea;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub staging: StagingArea,
    pub config: Config,
}

// API Request/Response types

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub job_id: String,
    pub status_url: String,
    pub result_url: String,
}

impl UploadResponse {
    pub fn for_job(job_id: String) -> Self {
        Self {
            success: true,
            status_url: format!("/job_status/{job_id}"),
            result_url: format!("/result/{job_id}"),
            job_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub success: bool,
    pub status: JobStatus,
}

/// 200 body of `GET /result/{id}` for a finished job.
#[derive(Debug, Serialize)]
pub struct JobResultResponse {
    pub success: bool,
    pub result: TranscriptResult,
}

/// 202 body of `GET /result/{id}` while the job is still queued or running.
#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub success: bool,
    pub status: JobStatus,
}

/// `{success: false, error}`: failed jobs, unknown ids, internal errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

/// `{error}`: rejected uploads.
#[derive(Debug, Serialize)]
pub struct ValidationErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub job_store: String,
}
