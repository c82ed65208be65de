// External speech-to-text client

pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::TranscriptionConfig;

pub use openai::OpenAiTranscriber;

/// Audio handed to a transcription backend.
#[derive(Debug, Clone)]
pub struct AudioInput {
    pub file_name: String,
    pub data: Bytes,
}

impl AudioInput {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranscriptionError {
    #[error("OpenAI API key is not configured.")]
    MissingApiKey,

    #[error("Request to transcription service timed out: {0}")]
    Timeout(String),

    #[error("Transcription service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Transcription request failed: {0}")]
    Request(String),

    #[error("Invalid transcription response: {0}")]
    InvalidResponse(String),
}

impl TranscriptionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TranscriptionError::Timeout(_))
    }
}

impl From<reqwest::Error> for TranscriptionError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TranscriptionError::Timeout(error.to_string())
        } else if error.is_decode() {
            TranscriptionError::InvalidResponse(error.to_string())
        } else {
            TranscriptionError::Request(error.to_string())
        }
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Fails fast when the backend cannot make calls at all.
    fn ensure_configured(&self) -> Result<(), TranscriptionError> {
        Ok(())
    }

    /// Transcribe `audio`. `language` is an explicit ISO-639-1 code; `None`
    /// leaves detection to the service.
    async fn transcribe(
        &self,
        audio: AudioInput,
        language: Option<&str>,
    ) -> Result<String, TranscriptionError>;
}

pub fn build_transcriber(config: &TranscriptionConfig) -> anyhow::Result<Arc<dyn Transcriber>> {
    Ok(Arc::new(OpenAiTranscriber::new(config)?))
}
