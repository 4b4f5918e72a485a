//! Speech-to-text provider integrations.
//!
//! Utterances are captured from the telephony stream as short spooled WAV
//! files and transcribed in one shot, so every provider behind [`BaseSTT`]
//! is a batch REST client rather than a streaming session. The capture side
//! decides when an utterance is complete; this module only turns a finished
//! WAV file into text.
//!
//! # Supported Providers
//!
//! - **OpenAI** (`openai`): Whisper transcription via multipart file upload.
//!
//! # Example
//!
//! ```rust,no_run
//! use callbot::core::stt::{STTConfig, create_stt_provider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = STTConfig {
//!         api_key: "sk-...".to_string(),
//!         ..Default::default()
//!     };
//!
//!     let stt = create_stt_provider("openai", config)?;
//!     let text = stt.transcribe_audio(std::path::Path::new("utterance.wav")).await?;
//!     println!("heard: {text}");
//!     Ok(())
//! }
//! ```

pub mod openai;

pub use openai::OpenAISTT;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Errors produced by STT providers.
#[derive(Debug, Error)]
pub enum STTError {
    /// The provider configuration is invalid or incomplete.
    #[error("STT configuration error: {0}")]
    ConfigurationError(String),

    /// The provider rejected the credentials.
    #[error("STT authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The request could not be sent or the response could not be read.
    #[error("STT network error: {0}")]
    NetworkError(String),

    /// The provider returned an error response.
    #[error("STT provider error: {0}")]
    ProviderError(String),

    /// The spooled utterance file could not be read.
    #[error("STT audio file error: {0}")]
    AudioFileError(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Provider-independent STT configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct STTConfig {
    /// API key for the provider.
    pub api_key: String,

    /// Transcription language hint (ISO 639-1).
    pub language: String,

    /// Model identifier understood by the provider.
    pub model: String,

    /// Sample rate of the spooled WAV files in Hz.
    pub sample_rate: u32,

    /// Optional override for the transcription endpoint.
    pub base_url: Option<String>,
}

impl Default for STTConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            language: "fr".to_string(),
            model: "whisper-1".to_string(),
            sample_rate: crate::core::audio::TELEPHONY_SAMPLE_RATE,
            base_url: None,
        }
    }
}

// =============================================================================
// Provider Trait
// =============================================================================

/// Common interface implemented by all STT providers.
#[async_trait]
pub trait BaseSTT: Send + Sync + fmt::Debug {
    /// Transcribe a finished WAV file and return the recognized text.
    ///
    /// The returned string is trimmed; an empty string means the provider
    /// recognized nothing.
    async fn transcribe_audio(&self, wav_path: &Path) -> Result<String, STTError>;

    /// Human-readable provider description for logs.
    fn get_provider_info(&self) -> &'static str;
}

// =============================================================================
// Unconfigured Fallback
// =============================================================================

/// Stand-in provider used when no STT API key is configured.
///
/// Every transcription fails with a configuration error, which the capture
/// pipeline absorbs the same way as a provider outage: the utterance yields
/// an empty transcript and the call carries on.
#[derive(Debug)]
pub struct UnconfiguredStt;

#[async_trait]
impl BaseSTT for UnconfiguredStt {
    async fn transcribe_audio(&self, _wav_path: &Path) -> Result<String, STTError> {
        Err(STTError::ConfigurationError(
            "STT provider has no API key".to_string(),
        ))
    }

    fn get_provider_info(&self) -> &'static str {
        "unconfigured"
    }
}

// =============================================================================
// Provider Enum and Factory
// =============================================================================

/// Supported STT providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum STTProvider {
    /// OpenAI Whisper transcription API.
    OpenAI,
}

impl fmt::Display for STTProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            STTProvider::OpenAI => write!(f, "openai"),
        }
    }
}

impl FromStr for STTProvider {
    type Err = STTError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "whisper" | "openai-whisper" => Ok(STTProvider::OpenAI),
            _ => Err(STTError::ConfigurationError(format!(
                "Unsupported STT provider: {s}. Supported providers: openai"
            ))),
        }
    }
}

/// Create an STT provider instance from a provider name.
pub fn create_stt_provider(
    provider: &str,
    config: STTConfig,
) -> Result<Box<dyn BaseSTT>, STTError> {
    let provider = STTProvider::from_str(provider)?;
    create_stt_provider_from_enum(provider, config)
}

/// Create an STT provider instance from a provider enum value.
pub fn create_stt_provider_from_enum(
    provider: STTProvider,
    config: STTConfig,
) -> Result<Box<dyn BaseSTT>, STTError> {
    match provider {
        STTProvider::OpenAI => Ok(Box::new(OpenAISTT::new(config)?)),
    }
}

/// List the provider names accepted by [`create_stt_provider`].
pub fn get_supported_stt_providers() -> Vec<&'static str> {
    vec!["openai"]
}

// =============================================================================
// Tests
// =============================================================================
