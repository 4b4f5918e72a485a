//! Text-to-speech provider integrations.
//!
//! Every provider behind [`BaseTTS`] returns audio in the telephony wire
//! format (8 kHz mono mu-law), so synthesized phrases can go straight to the
//! media stream or into the audio cache without further conversion. Providers
//! that cannot emit mu-law natively resample and encode internally.
//!
//! # Supported Providers
//!
//! - **ElevenLabs** (`elevenlabs`): native `ulaw_8000` output, no conversion.
//! - **OpenAI** (`openai`): 24 kHz PCM output, downsampled and mu-law encoded.

pub mod elevenlabs;
pub mod openai;

pub use elevenlabs::{ELEVENLABS_TTS_URL, ElevenLabsTTS};
pub use openai::{OPENAI_TTS_URL, OpenAITTS};

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Errors produced by TTS providers.
#[derive(Debug, Error)]
pub enum TTSError {
    /// The provider configuration is invalid or incomplete.
    #[error("TTS configuration error: {0}")]
    InvalidConfiguration(String),

    /// The provider rejected the credentials.
    #[error("TTS authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The request could not be sent or the response could not be read.
    #[error("TTS network error: {0}")]
    NetworkError(String),

    /// The provider returned an error response.
    #[error("TTS provider error: {0}")]
    ProviderError(String),

    /// The provider audio could not be converted to the wire format.
    #[error("TTS audio processing error: {0}")]
    AudioProcessingError(String),
}

/// Convenience alias used by the factory and providers.
pub type TTSResult<T> = Result<T, TTSError>;

// =============================================================================
// Configuration
// =============================================================================

/// Provider-independent TTS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TTSConfig {
    /// API key for the provider.
    pub api_key: String,

    /// Voice identifier. Empty selects the provider default.
    pub voice_id: Option<String>,

    /// Model identifier. Empty selects the provider default.
    pub model: String,

    /// Speaking speed multiplier, where supported.
    pub speaking_rate: Option<f32>,

    /// Optional override for the synthesis endpoint.
    pub base_url: Option<String>,
}

impl Default for TTSConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_id: None,
            model: String::new(),
            speaking_rate: None,
            base_url: None,
        }
    }
}

// =============================================================================
// Provider Trait
// =============================================================================

/// Common interface implemented by all TTS providers.
#[async_trait]
pub trait BaseTTS: Send + Sync {
    /// Synthesize `text` and return 8 kHz mono mu-law bytes.
    async fn synthesize_speech_to_bytes(&self, text: &str) -> TTSResult<Vec<u8>>;

    /// Provider slug, also used as the first cache namespace level.
    fn provider_name(&self) -> &'static str;

    /// Resolved voice identifier, used as the second cache namespace level.
    fn voice(&self) -> &str;
}

// =============================================================================
// Unconfigured Fallback
// =============================================================================

/// Stand-in provider used when no TTS API key is configured.
///
/// Every synthesis request fails with a configuration error, which the
/// playback pipeline absorbs the same way as a provider outage: the phrase
/// is dropped with a warning. Phrases already in the audio cache from an
/// earlier warm run still play.
pub struct UnconfiguredTts;

#[async_trait]
impl BaseTTS for UnconfiguredTts {
    async fn synthesize_speech_to_bytes(&self, _text: &str) -> TTSResult<Vec<u8>> {
        Err(TTSError::InvalidConfiguration(
            "TTS provider has no API key".to_string(),
        ))
    }

    fn provider_name(&self) -> &'static str {
        "unconfigured"
    }

    fn voice(&self) -> &str {
        "none"
    }
}

// =============================================================================
// Provider Enum and Factory
// =============================================================================

/// Supported TTS providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TTSProvider {
    /// ElevenLabs text-to-speech API.
    ElevenLabs,
    /// OpenAI text-to-speech API.
    OpenAI,
}

impl fmt::Display for TTSProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TTSProvider::ElevenLabs => write!(f, "elevenlabs"),
            TTSProvider::OpenAI => write!(f, "openai"),
        }
    }
}

impl FromStr for TTSProvider {
    type Err = TTSError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "elevenlabs" | "eleven-labs" | "eleven_labs" => Ok(TTSProvider::ElevenLabs),
            "openai" => Ok(TTSProvider::OpenAI),
            _ => Err(TTSError::InvalidConfiguration(format!(
                "Unsupported TTS provider: {s}. Supported providers: elevenlabs, openai"
            ))),
        }
    }
}

/// Factory function to create a TTS provider.
///
/// # Supported Providers
///
/// - `"elevenlabs"` - ElevenLabs TTS API
/// - `"openai"` - OpenAI TTS API (tts-1, tts-1-hd, gpt-4o-mini-tts)
///
/// # Example
///
/// ```rust,ignore
/// use callbot::core::tts::{TTSConfig, create_tts_provider};
///
/// let config = TTSConfig {
///     api_key: "your-api-key".to_string(),
///     ..Default::default()
/// };
///
/// let provider = create_tts_provider("elevenlabs", config)?;
/// ```
pub fn create_tts_provider(provider_type: &str, config: TTSConfig) -> TTSResult<Box<dyn BaseTTS>> {
    let provider = TTSProvider::from_str(provider_type)?;
    create_tts_provider_from_enum(provider, config)
}

/// Create a TTS provider instance from a provider enum value.
pub fn create_tts_provider_from_enum(
    provider: TTSProvider,
    config: TTSConfig,
) -> TTSResult<Box<dyn BaseTTS>> {
    match provider {
        TTSProvider::ElevenLabs => Ok(Box::new(ElevenLabsTTS::new(config)?)),
        TTSProvider::OpenAI => Ok(Box::new(OpenAITTS::new(config)?)),
    }
}

/// List the provider names accepted by [`create_tts_provider`].
pub fn get_supported_tts_providers() -> Vec<&'static str> {
    vec!["elevenlabs", "openai"]
}
