//! OpenAI TTS provider implementation.
//!
//! # API Reference
//!
//! - Endpoint: `POST https://api.openai.com/v1/audio/speech`
//! - Models: tts-1, tts-1-hd, gpt-4o-mini-tts
//! - Voices: alloy, ash, ballad, coral, echo, fable, onyx, nova, sage, shimmer, verse
//! - Output: raw PCM is always 24 kHz signed 16-bit little-endian mono
//! - Speed: 0.25 to 4.0
//!
//! The telephony stream wants 8 kHz mu-law, so the 24 kHz PCM response is
//! downsampled and encoded before it leaves this module.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{BaseTTS, TTSConfig, TTSError, TTSResult};
use crate::core::audio::mulaw::{encode_mulaw, le_bytes_to_pcm16};
use crate::core::audio::resample::resample_linear;
use crate::core::audio::TELEPHONY_SAMPLE_RATE;

/// OpenAI TTS API endpoint.
pub const OPENAI_TTS_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Sample rate of the raw PCM response format.
pub const OPENAI_PCM_SAMPLE_RATE: u32 = 24_000;

/// Model used when the configuration leaves it empty.
const DEFAULT_MODEL: &str = "tts-1";

/// Voice used when the configuration leaves it empty.
const DEFAULT_VOICE: &str = "nova";

/// End-to-end timeout for one synthesis request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

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

/// OpenAI TTS provider implementing the [`BaseTTS`] trait.
#[derive(Debug)]
pub struct OpenAITTS {
    config: TTSConfig,
    http_client: reqwest::Client,
    model: String,
    voice: String,
    speed: f32,
}

impl OpenAITTS {
    /// Create a new OpenAI TTS instance.
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

        let speed = config.speaking_rate.unwrap_or(1.0).clamp(0.25, 4.0);

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
            speed,
        })
    }

    fn synthesis_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(OPENAI_TTS_URL)
    }

    fn build_body(&self, text: &str) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "response_format": "pcm",
        });
        if (self.speed - 1.0).abs() > 0.001 {
            body["speed"] = json!(self.speed);
        }
        body
    }
}

#[async_trait]
impl BaseTTS for OpenAITTS {
    async fn synthesize_speech_to_bytes(&self, text: &str) -> TTSResult<Vec<u8>> {
        let response = self
            .http_client
            .post(self.synthesis_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&self.build_body(text))
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
                TTSError::AuthenticationFailed(error_msg)
            } else {
                TTSError::ProviderError(error_msg)
            });
        }

        let pcm_bytes = response
            .bytes()
            .await
            .map_err(|e| TTSError::NetworkError(format!("Failed to read audio body: {e}")))?;

        if pcm_bytes.is_empty() {
            return Err(TTSError::ProviderError(
                "OpenAI returned an empty audio body".to_string(),
            ));
        }

        let samples = le_bytes_to_pcm16(&pcm_bytes);
        let downsampled = resample_linear(&samples, OPENAI_PCM_SAMPLE_RATE, TELEPHONY_SAMPLE_RATE);
        let mulaw = encode_mulaw(&downsampled);

        debug!(
            text_len = text.len(),
            pcm_bytes = pcm_bytes.len(),
            mulaw_bytes = mulaw.len(),
            "Synthesized phrase via OpenAI TTS"
        );

        Ok(mulaw)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn voice(&self) -> &str {
        &self.voice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> TTSConfig {
        TTSConfig {
            api_key: "test_key".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_requires_api_key() {
        let err = OpenAITTS::new(TTSConfig::default()).unwrap_err();
        assert!(matches!(err, TTSError::AuthenticationFailed(_)));
    }

    #[test]
    fn test_defaults_applied() {
        let tts = OpenAITTS::new(test_config()).unwrap();
        assert_eq!(tts.model, DEFAULT_MODEL);
        assert_eq!(tts.voice(), DEFAULT_VOICE);
        assert!((tts.speed - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_explicit_voice_and_model() {
        let config = TTSConfig {
            voice_id: Some("shimmer".to_string()),
            model: "gpt-4o-mini-tts".to_string(),
            ..test_config()
        };
        let tts = OpenAITTS::new(config).unwrap();
        assert_eq!(tts.voice(), "shimmer");
        assert_eq!(tts.model, "gpt-4o-mini-tts");
    }

    #[test]
    fn test_empty_voice_falls_back_to_default() {
        let config = TTSConfig {
            voice_id: Some(String::new()),
            ..test_config()
        };
        let tts = OpenAITTS::new(config).unwrap();
        assert_eq!(tts.voice(), DEFAULT_VOICE);
    }

    #[test]
    fn test_speed_clamping() {
        let config = TTSConfig {
            speaking_rate: Some(0.1),
            ..test_config()
        };
        let tts = OpenAITTS::new(config).unwrap();
        assert!((tts.speed - 0.25).abs() < 0.001);

        let config = TTSConfig {
            speaking_rate: Some(5.0),
            ..test_config()
        };
        let tts = OpenAITTS::new(config).unwrap();
        assert!((tts.speed - 4.0).abs() < 0.001);
    }

    #[test]
    fn test_body_omits_default_speed() {
        let tts = OpenAITTS::new(test_config()).unwrap();
        let body = tts.build_body("Bonjour");
        assert_eq!(body["model"], "tts-1");
        assert_eq!(body["input"], "Bonjour");
        assert_eq!(body["response_format"], "pcm");
        assert!(body.get("speed").is_none());
    }

    #[test]
    fn test_body_includes_non_default_speed() {
        let config = TTSConfig {
            speaking_rate: Some(1.5),
            ..test_config()
        };
        let tts = OpenAITTS::new(config).unwrap();
        let body = tts.build_body("Bonjour");
        assert_eq!(body["speed"], 1.5);
    }

    #[test]
    fn test_synthesis_url_override() {
        let config = TTSConfig {
            base_url: Some("http://127.0.0.1:9999/v1/audio/speech".to_string()),
            ..test_config()
        };
        let tts = OpenAITTS::new(config).unwrap();
        assert_eq!(tts.synthesis_url(), "http://127.0.0.1:9999/v1/audio/speech");
    }

    #[test]
    fn test_provider_name() {
        let tts = OpenAITTS::new(test_config()).unwrap();
        assert_eq!(tts.provider_name(), "openai");
    }
}
