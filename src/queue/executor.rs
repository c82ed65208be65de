//! Job executor: the task body run by a worker for one transcription job.
//!
//! Every failure is folded into a [`JobOutcome::Failure`]; nothing here can
//! take the worker loop down.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use super::jobs::{FailureKind, JobOutcome, JobPayload};
use crate::transcription::{AudioInput, Transcriber, TranscriptionError};

/// Error text for timeout-class failures of the external call.
pub const NETWORK_TIMEOUT_MESSAGE: &str = "Network timeout to OpenAI API.";

#[derive(Clone)]
pub struct JobExecutor {
    transcriber: Arc<dyn Transcriber>,
}

impl JobExecutor {
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self { transcriber }
    }

    pub async fn execute(&self, payload: &JobPayload) -> JobOutcome {
        if let Err(e) = self.transcriber.ensure_configured() {
            warn!("Transcription backend is not configured: {}", e);
            return outcome_from_error(e);
        }

        let audio = match read_audio(&payload.filepath).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(path = %payload.filepath.display(), "Failed to open staged audio: {}", e);
                return JobOutcome::failure(FailureKind::Io, e.to_string());
            }
        };

        let language = payload.language.code();
        info!(
            path = %payload.filepath.display(),
            language = language.unwrap_or("auto"),
            "Transcribing staged audio"
        );

        match self.transcriber.transcribe(audio, language).await {
            Ok(transcript) => JobOutcome::Success { transcript },
            Err(e) => outcome_from_error(e),
        }
    }
}

async fn read_audio(path: &Path) -> std::io::Result<AudioInput> {
    let data = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio.m4a".to_string());
    Ok(AudioInput::new(file_name, data))
}

fn outcome_from_error(error: TranscriptionError) -> JobOutcome {
    match error {
        TranscriptionError::MissingApiKey => {
            JobOutcome::failure(FailureKind::Configuration, error.to_string())
        }
        TranscriptionError::Timeout(_) => {
            JobOutcome::failure(FailureKind::Timeout, NETWORK_TIMEOUT_MESSAGE)
        }
        other => JobOutcome::failure(FailureKind::ExternalService, other.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::queue::jobs::Language;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted backend that records what it was asked to do.
    pub(crate) struct FakeTranscriber {
        pub configured: bool,
        pub reply: Mutex<Option<Result<String, TranscriptionError>>>,
        pub calls: Mutex<Vec<(String, Option<String>, usize)>>,
    }

    impl FakeTranscriber {
        pub fn replying(reply: Result<String, TranscriptionError>) -> Arc<Self> {
            Arc::new(Self {
                configured: true,
                reply: Mutex::new(Some(reply)),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn unconfigured() -> Arc<Self> {
            Arc::new(Self {
                configured: false,
                reply: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn languages(&self) -> Vec<Option<String>> {
            self.calls.lock().unwrap().iter().map(|c| c.1.clone()).collect()
        }
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        fn ensure_configured(&self) -> Result<(), TranscriptionError> {
            if self.configured {
                Ok(())
            } else {
                Err(TranscriptionError::MissingApiKey)
            }
        }

        async fn transcribe(
            &self,
            audio: AudioInput,
            language: Option<&str>,
        ) -> Result<String, TranscriptionError> {
            self.calls.lock().unwrap().push((
                audio.file_name.clone(),
                language.map(str::to_string),
                audio.data.len(),
            ));
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok("default transcript".to_string()))
        }
    }

    fn staged(dir: &TempDir, language: Language) -> JobPayload {
        let path = dir.path().join("clip.m4a");
        std::fs::write(&path, b"m4a-bytes").unwrap();
        JobPayload::new(path, language)
    }

    #[tokio::test]
    async fn test_success_carries_transcript() {
        let dir = TempDir::new().unwrap();
        let fake = FakeTranscriber::replying(Ok("hello world".to_string()));
        let executor = JobExecutor::new(fake.clone());

        let outcome = executor.execute(&staged(&dir, Language::English)).await;

        assert_eq!(
            outcome,
            JobOutcome::Success {
                transcript: "hello world".to_string()
            }
        );
        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls[0].0, "clip.m4a");
        assert_eq!(calls[0].2, b"m4a-bytes".len());
    }

    #[tokio::test]
    async fn test_language_parameter_mapping() {
        let dir = TempDir::new().unwrap();
        for (selector, expected) in [
            ("zh", Some("zh")),
            ("en", Some("en")),
            ("auto", None),
            ("fr", None),
        ] {
            let fake = FakeTranscriber::replying(Ok(String::new()));
            let executor = JobExecutor::new(fake.clone());
            executor
                .execute(&staged(&dir, Language::from_selector(selector)))
                .await;
            assert_eq!(fake.languages(), vec![expected.map(str::to_string)], "{selector}");
        }
    }

    #[tokio::test]
    async fn test_timeout_maps_to_fixed_message() {
        let dir = TempDir::new().unwrap();
        let fake = FakeTranscriber::replying(Err(TranscriptionError::Timeout(
            "operation timed out".to_string(),
        )));
        let outcome = JobExecutor::new(fake).execute(&staged(&dir, Language::Auto)).await;

        assert_eq!(
            outcome,
            JobOutcome::failure(FailureKind::Timeout, "Network timeout to OpenAI API.")
        );
    }

    #[tokio::test]
    async fn test_other_errors_are_stringified() {
        let dir = TempDir::new().unwrap();
        let fake = FakeTranscriber::replying(Err(TranscriptionError::Api {
            status: 500,
            message: "upstream exploded".to_string(),
        }));
        let outcome = JobExecutor::new(fake).execute(&staged(&dir, Language::Auto)).await;

        match outcome {
            JobOutcome::Failure { kind, message } => {
                assert_eq!(kind, FailureKind::ExternalService);
                assert!(message.contains("upstream exploded"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_skip_the_call() {
        let dir = TempDir::new().unwrap();
        let fake = FakeTranscriber::unconfigured();
        let outcome = JobExecutor::new(fake.clone())
            .execute(&staged(&dir, Language::Auto))
            .await;

        assert_eq!(
            outcome,
            JobOutcome::failure(FailureKind::Configuration, "OpenAI API key is not configured.")
        );
        assert!(fake.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_io_failure() {
        let fake = FakeTranscriber::replying(Ok("never".to_string()));
        let payload = JobPayload::new("/nonexistent/dir/clip.m4a", Language::Auto);
        let outcome = JobExecutor::new(fake.clone()).execute(&payload).await;

        assert!(matches!(
            outcome,
            JobOutcome::Failure {
                kind: FailureKind::Io,
                ..
            }
        ));
        assert!(fake.calls.lock().unwrap().is_empty());
    }
}
