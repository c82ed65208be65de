// HTTP boundary error type

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::models::{ErrorResponse, ValidationErrorResponse};
use crate::queue::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Client-caused upload problem; never reaches the queue.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    NotFound(String),

    /// Staging or enqueueing an accepted upload failed.
    #[error("File upload failed: {0}")]
    Upload(String),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upload(_) | AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            AppError::Validation(message) | AppError::PayloadTooLarge(message) => {
                (status, Json(ValidationErrorResponse { error: message })).into_response()
            }
            other => {
                if status.is_server_error() {
                    error!("Request failed: {}", other);
                }
                (status, Json(ErrorResponse::new(other.to_string()))).into_response()
            }
        }
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
