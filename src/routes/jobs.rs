//! Job polling endpoints
//!
//! - `GET /job_status/{job_id}` - current lifecycle state
//! - `GET /result/{job_id}` - transcript (200), failure (500) or still pending (202)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tracing::{debug, error};

use crate::models::{AppState, ErrorResponse, JobResultResponse, JobStatusResponse, PendingResponse};
use crate::queue::{Job, JobStatus};
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/job_status/{job_id}", get(job_status))
        .route("/result/{job_id}", get(job_result))
        .with_state(state)
}

async fn load_job(state: &AppState, job_id: &str) -> AppResult<Job> {
    state
        .store
        .fetch(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Job not found".to_string()))
}

async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobStatusResponse>> {
    let job = load_job(&state, &job_id).await?;
    debug!(job_id = %job_id, status = %job.status, "Status lookup");

    Ok(Json(JobStatusResponse {
        success: true,
        status: job.status,
    }))
}

async fn job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Response> {
    let job = load_job(&state, &job_id).await?;

    let response = match job.status {
        JobStatus::Finished => match job.result {
            Some(result) => (
                StatusCode::OK,
                Json(JobResultResponse {
                    success: true,
                    result,
                }),
            )
                .into_response(),
            None => {
                error!(job_id = %job_id, "Finished job has no stored result");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::new("Job finished without a result")),
                )
                    .into_response()
            }
        },
        JobStatus::Failed => {
            let message = job
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "Job failed".to_string());
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(message))).into_response()
        }
        JobStatus::Queued | JobStatus::Started => (
            StatusCode::ACCEPTED,
            Json(PendingResponse {
                success: false,
                status: job.status,
            }),
        )
            .into_response(),
    };

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{FailureKind, JobError, JobPayload, JobStore, Language, TranscriptResult};
    use crate::routes::test_support::{get, json_body, test_app};
    use std::time::Duration;
    use tower::ServiceExt;

    const LEASE: Duration = Duration::from_secs(60);

    async fn enqueue(store: &dyn JobStore) -> String {
        store
            .enqueue(JobPayload::new("/tmp/clip.m4a", Language::Auto))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_follows_lifecycle() {
        let app = test_app();
        let id = enqueue(app.store.as_ref()).await;

        let body = json_body(app.router.clone().oneshot(get(&format!("/job_status/{id}"))).await.unwrap()).await;
        assert_eq!(body, serde_json::json!({"success": true, "status": "queued"}));

        app.store.claim_next("w", LEASE).await.unwrap();
        let body = json_body(app.router.clone().oneshot(get(&format!("/job_status/{id}"))).await.unwrap()).await;
        assert_eq!(body["status"], "started");
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let app = test_app();

        let response = app.router.clone().oneshot(get("/job_status/never-issued")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"success": false, "error": "Job not found"})
        );

        let response = app.router.clone().oneshot(get("/result/never-issued")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_result_pending_is_202_without_result() {
        let app = test_app();
        let id = enqueue(app.store.as_ref()).await;
        app.store.claim_next("w", LEASE).await.unwrap();

        let response = app.router.clone().oneshot(get(&format!("/result/{id}"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["status"], "started");
        assert!(body.get("result").is_none());
    }

    #[tokio::test]
    async fn test_result_finished_nests_transcript() {
        let app = test_app();
        let id = enqueue(app.store.as_ref()).await;
        app.store.claim_next("w", LEASE).await.unwrap();
        app.store
            .complete(&id, TranscriptResult::new("the transcript"))
            .await
            .unwrap();

        let response = app.router.clone().oneshot(get(&format!("/result/{id}"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({
                "success": true,
                "result": {"success": true, "transcript": "the transcript"}
            })
        );
    }

    #[tokio::test]
    async fn test_result_failed_is_500_with_error() {
        let app = test_app();
        let id = enqueue(app.store.as_ref()).await;
        app.store.claim_next("w", LEASE).await.unwrap();
        app.store
            .fail(&id, JobError::new(FailureKind::Timeout, "Network timeout to OpenAI API."))
            .await
            .unwrap();

        let response = app.router.clone().oneshot(get(&format!("/result/{id}"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"success": false, "error": "Network timeout to OpenAI API."})
        );
    }
}
