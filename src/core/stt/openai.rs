//! OpenAI STT (Whisper) client implementation.
//!
//! Whisper is a batch REST API. The capture pipeline writes each finished
//! utterance to a WAV spool file; this client uploads that file as a
//! multipart form and returns the transcription text. The HTTP client is
//! reused across requests (connection pooling), which matters because a
//! single call produces many short transcriptions.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{BaseSTT, STTConfig, STTError};

// =============================================================================
// Constants
// =============================================================================

/// Default endpoint for the OpenAI audio transcription API.
const OPENAI_TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Upload ceiling. OpenAI rejects files above 25MB; staying at 20MB leaves
/// room for the multipart envelope.
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// End-to-end timeout for one transcription request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Wire Messages
// =============================================================================

/// Successful transcription response (`response_format=json`).
#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Error envelope returned by the OpenAI API.
#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
    #[serde(rename = "type", default)]
    error_type: String,
}

// =============================================================================
// OpenAI STT Client
// =============================================================================

/// OpenAI Whisper client implementing the [`BaseSTT`] trait.
#[derive(Debug)]
pub struct OpenAISTT {
    config: STTConfig,
    http_client: Client,
}

impl OpenAISTT {
    /// Create a new client. Fails when the API key is missing.
    pub fn new(config: STTConfig) -> Result<Self, STTError> {
        if config.api_key.trim().is_empty() {
            return Err(STTError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                STTError::ConfigurationError(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn transcription_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(OPENAI_TRANSCRIPTION_URL)
    }
}

#[async_trait]
impl BaseSTT for OpenAISTT {
    async fn transcribe_audio(&self, wav_path: &Path) -> Result<String, STTError> {
        let wav_data = tokio::fs::read(wav_path).await.map_err(|e| {
            STTError::AudioFileError(format!("Failed to read {}: {e}", wav_path.display()))
        })?;

        if wav_data.len() > MAX_UPLOAD_BYTES {
            return Err(STTError::AudioFileError(format!(
                "Utterance file is {} bytes, above the {MAX_UPLOAD_BYTES} byte upload limit",
                wav_data.len()
            )));
        }

        debug!(
            bytes = wav_data.len(),
            model = %self.config.model,
            "Sending utterance to OpenAI transcription"
        );

        let file_part = Part::bytes(wav_data)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| STTError::ConfigurationError(format!("Invalid MIME type: {e}")))?;

        let form = Form::new()
            .part("file", file_part)
            .text("model", self.config.model.clone())
            .text("language", self.config.language.clone())
            .text("response_format", "json");

        let response = self
            .http_client
            .post(self.transcription_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| STTError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| STTError::NetworkError(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let error_msg = if let Ok(error_response) =
                serde_json::from_str::<OpenAIErrorResponse>(&response_text)
            {
                format!(
                    "OpenAI API error: {} ({})",
                    error_response.error.message, error_response.error.error_type
                )
            } else {
                format!("OpenAI API error ({status}): {response_text}")
            };

            return Err(if status.as_u16() == 401 {
                STTError::AuthenticationFailed(error_msg)
            } else {
                STTError::ProviderError(error_msg)
            });
        }

        let parsed: TranscriptionResponse = serde_json::from_str(&response_text)
            .map_err(|e| STTError::ProviderError(format!("Unexpected response body: {e}")))?;

        Ok(parsed.text.trim().to_string())
    }

    fn get_provider_info(&self) -> &'static str {
        "OpenAI Whisper STT"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> STTConfig {
        STTConfig {
            api_key: "sk-test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_requires_api_key() {
        let err = OpenAISTT::new(STTConfig::default()).unwrap_err();
        match err {
            STTError::AuthenticationFailed(msg) => assert!(msg.contains("API key")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_new_rejects_whitespace_api_key() {
        let config = STTConfig {
            api_key: "   ".to_string(),
            ..Default::default()
        };
        assert!(OpenAISTT::new(config).is_err());
    }

    #[test]
    fn test_transcription_url_default() {
        let stt = OpenAISTT::new(test_config()).unwrap();
        assert_eq!(stt.transcription_url(), OPENAI_TRANSCRIPTION_URL);
    }

    #[test]
    fn test_transcription_url_override() {
        let config = STTConfig {
            base_url: Some("http://127.0.0.1:9999/v1/audio/transcriptions".to_string()),
            ..test_config()
        };
        let stt = OpenAISTT::new(config).unwrap();
        assert_eq!(
            stt.transcription_url(),
            "http://127.0.0.1:9999/v1/audio/transcriptions"
        );
    }

    #[test]
    fn test_transcription_response_parsing() {
        let body = r#"{"text": " Bonjour, je voudrais un rendez-vous. "}"#;
        let parsed: TranscriptionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.text.trim(), "Bonjour, je voudrais un rendez-vous.");
    }

    #[test]
    fn test_error_response_parsing() {
        let body = r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}}"#;
        let parsed: OpenAIErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.error.message, "Incorrect API key provided");
        assert_eq!(parsed.error.error_type, "invalid_request_error");
    }

    #[test]
    fn test_error_response_parsing_without_type() {
        let body = r#"{"error": {"message": "boom"}}"#;
        let parsed: OpenAIErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.error.message, "boom");
        assert_eq!(parsed.error.error_type, "");
    }

    #[tokio::test]
    async fn test_transcribe_missing_file() {
        let stt = OpenAISTT::new(test_config()).unwrap();
        let err = stt
            .transcribe_audio(Path::new("/nonexistent/utterance.wav"))
            .await
            .unwrap_err();
        match err {
            STTError::AudioFileError(msg) => assert!(msg.contains("Failed to read")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
