//! `POST /upload`
//!
//! Validates a multipart upload, stages the audio and enqueues a
//! transcription job. Rejected uploads never reach the job store.

use axum::{
    extract::{multipart::MultipartError, multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use tracing::{info, warn};

use crate::models::{AppState, UploadResponse};
use crate::queue::{JobPayload, Language};
use crate::storage::has_extension;
use crate::types::{AppError, AppResult};

pub const ALLOWED_EXTENSION: &str = "m4a";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/upload", post(upload_file))
        .with_state(state)
}

struct UploadForm {
    file: Option<(String, Bytes)>,
    language: Language,
}

async fn upload_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<UploadResponse>> {
    let multipart = multipart.map_err(|e| {
        warn!("Upload rejected, not a multipart request: {}", e);
        AppError::Validation("No file part".to_string())
    })?;
    let form = read_form(multipart).await?;

    let Some((file_name, data)) = form.file else {
        warn!("Upload rejected: no file part");
        return Err(AppError::Validation("No file part".to_string()));
    };
    if file_name.is_empty() {
        warn!("Upload rejected: empty filename");
        return Err(AppError::Validation("No file selected".to_string()));
    }
    if !has_extension(&file_name, ALLOWED_EXTENSION) {
        warn!(file = %file_name, "Upload rejected: file type not allowed");
        return Err(AppError::Validation(
            "File type not allowed. Please upload an M4A file.".to_string(),
        ));
    }

    let path = state
        .staging
        .stage(&file_name, &data)
        .await
        .map_err(|e| AppError::Upload(e.to_string()))?;

    let job_id = match state
        .store
        .enqueue(JobPayload::new(path.clone(), form.language))
        .await
    {
        Ok(job_id) => job_id,
        Err(e) => {
            state.staging.discard(&path).await;
            return Err(AppError::Upload(e.to_string()));
        }
    };

    info!(
        job_id = %job_id,
        file = %file_name,
        bytes = data.len(),
        language = %form.language,
        "Upload accepted and job enqueued"
    );
    Ok(Json(UploadResponse::for_job(job_id)))
}

async fn read_form(mut multipart: Multipart) -> AppResult<UploadForm> {
    let mut form = UploadForm {
        file: None,
        language: Language::Auto,
    };

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                form.file = Some((file_name, data));
            }
            "language" => {
                let selector = field.text().await.map_err(multipart_error)?;
                form.language = Language::from_selector(&selector);
            }
            _ => {}
        }
    }

    Ok(form)
}

fn multipart_error(error: MultipartError) -> AppError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("File too large.".to_string())
    } else {
        AppError::Validation(error.body_text())
    }
}
