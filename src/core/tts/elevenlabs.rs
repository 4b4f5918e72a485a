//! ElevenLabs TTS provider implementation.
//!
//! # API Reference
//!
//! - Endpoint: `POST https://api.elevenlabs.io/v1/text-to-speech/{voice_id}`
//! - Auth: `xi-api-key` header
//! - Output: requested via the `output_format` query parameter
//!
//! ElevenLabs can emit `ulaw_8000` natively, so the response body is already
//! in the telephony wire format and is forwarded without conversion.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{BaseTTS, TTSConfig, TTSError, TTSResult};

/// ElevenLabs TTS API endpoint. The voice id is appended as a path segment.
pub const ELEVENLABS_TTS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";

/// Output format matching the telephony stream (8 kHz mono mu-law).
const OUTPUT_FORMAT: &str = "ulaw_8000";

/// Model used when the configuration leaves it empty. The multilingual model
/// handles French without per-request language hints.
const DEFAULT_MODEL: &str = "eleven_multilingual_v2";

/// Voice used when the configuration leaves it empty (Rachel).
const DEFAULT_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";

/// End-to-end timeout for one synthesis request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error envelope returned by the ElevenLabs API.
#[derive(Debug, Deserialize)]
struct ElevenLabsErrorResponse {
    detail: ElevenLabsErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ElevenLabsErrorDetail {
    #[serde(default)]
    status: String,
    message: String,
}

/// ElevenLabs TTS provider implementing the [`BaseTTS`] trait.
#[derive(Debug)]
pub struct ElevenLabsTTS {
    config: TTSConfig,
    http_client: reqwest::Client,
    model: String,
    voice: String,
}

impl ElevenLabsTTS {
    /// Create a new ElevenLabs TTS instance.
    pub fn new(config: TTSConfig) -> TTSResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(TTSError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let model = if config.model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            config.model.clone()
        };

        let voice = config
            .voice_id
            .clone()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_VOICE.to_string());

        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                TTSError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            http_client,
            model,
            voice,
        })
    }

    fn synthesis_url(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(ELEVENLABS_TTS_URL);
        format!("{base}/{}?output_format={OUTPUT_FORMAT}", self.voice)
    }
}

#[async_trait]
impl BaseTTS for ElevenLabsTTS {
    async fn synthesize_speech_to_bytes(&self, text: &str) -> TTSResult<Vec<u8>> {
        let body = json!({
            "text": text,
            "model_id": self.model,
        });

        let response = self
            .http_client
            .post(self.synthesis_url())
            .header("xi-api-key", &self.config.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| TTSError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let response_text = response
                .text()
                .await
                .map_err(|e| TTSError::NetworkError(format!("Failed to read response: {e}")))?;

            let error_msg = if let Ok(error_response) =
                serde_json::from_str::<ElevenLabsErrorResponse>(&response_text)
            {
                format!(
                    "ElevenLabs API error: {} ({})",
                    error_response.detail.message, error_response.detail.status
                )
            } else {
                format!("ElevenLabs API error ({status}): {response_text}")
            };

            return Err(if status.as_u16() == 401 {
                TTSError::AuthenticationFailed(error_msg)
            } else {
                TTSError::ProviderError(error_msg)
            });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| TTSError::NetworkError(format!("Failed to read audio body: {e}")))?;

        if audio.is_empty() {
            return Err(TTSError::ProviderError(
                "ElevenLabs returned an empty audio body".to_string(),
            ));
        }

        debug!(
            text_len = text.len(),
            mulaw_bytes = audio.len(),
            voice = %self.voice,
            "Synthesized phrase via ElevenLabs TTS"
        );

        Ok(audio.to_vec())
    }

    fn provider_name(&self) -> &'static str {
        "elevenlabs"
    }

    fn voice(&self) -> &str {
        &self.voice
    }
}
