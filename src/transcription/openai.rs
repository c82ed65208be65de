// OpenAI audio transcription adapter
// API Reference: https://platform.openai.com/docs/api-reference/audio/createTranscription
//
// POST {base}/audio/transcriptions as multipart/form-data with `model`,
// `file` and an optional `language`. The response body is `{"text": "..."}`.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::{AudioInput, Transcriber, TranscriptionError};
use crate::config::TranscriptionConfig;
use crate::utils::retry::{with_retry, RetryPolicy};

pub struct OpenAiTranscriber {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiError,
}

#[derive(Deserialize)]
struct OpenAiError {
    message: String,
}

impl OpenAiTranscriber {
    pub fn new(config: &TranscriptionConfig) -> anyhow::Result<Self> {
        // Bounded waits: a worker must never block forever on the service
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(5)
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            retry: config.retry.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }

    fn build_form(&self, audio: &AudioInput, language: Option<&str>) -> Result<Form, TranscriptionError> {
        let mime = mime_guess::from_path(&audio.file_name).first_or_octet_stream();
        let file = Part::stream_with_length(audio.data.clone(), audio.data.len() as u64)
            .file_name(audio.file_name.clone())
            .mime_str(mime.essence_str())
            .map_err(|e| TranscriptionError::Request(e.to_string()))?;

        let form = Form::new().text("model", self.model.clone()).part("file", file);
        Ok(match language {
            Some(code) => form.text("language", code.to_string()),
            None => form,
        })
    }

    async fn send_once(
        &self,
        api_key: &str,
        audio: &AudioInput,
        language: Option<&str>,
    ) -> Result<String, TranscriptionError> {
        let form = self.build_form(audio, language)?;
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OpenAiErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(TranscriptionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: TranscriptionResponse = response.json().await?;
        Ok(parsed.text)
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    fn ensure_configured(&self) -> Result<(), TranscriptionError> {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(()),
            _ => Err(TranscriptionError::MissingApiKey),
        }
    }

    async fn transcribe(
        &self,
        audio: AudioInput,
        language: Option<&str>,
    ) -> Result<String, TranscriptionError> {
        self.ensure_configured()?;
        let api_key = self.api_key.as_deref().unwrap_or_default();

        debug!(
            file = %audio.file_name,
            bytes = audio.data.len(),
            language = language.unwrap_or("auto"),
            model = %self.model,
            "Sending transcription request"
        );

        let text = with_retry(
            &self.retry,
            |_attempt| self.send_once(api_key, &audio, language),
            TranscriptionError::is_timeout,
        )
        .await?;

        info!(chars = text.chars().count(), "Transcription received");
        Ok(text)
    }
}
