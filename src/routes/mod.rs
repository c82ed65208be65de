//! API Routes
//!
//! - `POST /upload` - accept an M4A upload and enqueue a transcription job
//! - `GET /job_status/{job_id}` - lifecycle state of a job
//! - `GET /result/{job_id}` - transcript or failure of a job
//! - `GET /health` - liveness plus job store reachability

pub mod health;
pub mod jobs;
pub mod upload;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::cors_layer;
use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let max_upload_bytes = state.config.server.max_upload_bytes;
    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    Router::new()
        .merge(upload::router(state.clone()))
        .merge(jobs::router(state.clone()))
        .merge(health::router(state))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
