// Audio Transcriber - upload audio, transcribe it in a background worker, poll for the result

pub mod config;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod routes;
pub mod storage;
pub mod transcription;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
