//! LLM provider integrations.
//!
//! The conversation logic uses short, single-shot chat completions for
//! routing, intent classification, and date extraction. Providers behind
//! [`BaseLLM`] take a prepared message list and return the raw completion
//! text; prompt construction and answer parsing live in [`prompts`].

pub mod openai;
pub mod prompts;

pub use openai::{OPENAI_CHAT_URL, OpenAILLM};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Errors produced by LLM providers.
#[derive(Debug, Error)]
pub enum LLMError {
    /// The provider configuration is invalid or incomplete.
    #[error("LLM configuration error: {0}")]
    ConfigurationError(String),

    /// The provider rejected the credentials.
    #[error("LLM authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The request could not be sent or the response could not be read.
    #[error("LLM network error: {0}")]
    NetworkError(String),

    /// The provider returned an error response or an unusable completion.
    #[error("LLM provider error: {0}")]
    ProviderError(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Provider-independent LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// API key for the provider.
    pub api_key: String,

    /// Model identifier. Empty selects the provider default.
    pub model: String,

    /// Sampling temperature applied to every request.
    pub temperature: Option<f32>,

    /// Optional override for the completion endpoint.
    pub base_url: Option<String>,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: String::new(),
            temperature: None,
            base_url: None,
        }
    }
}

// =============================================================================
// Chat Messages
// =============================================================================

/// One message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A prepared chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

// =============================================================================
// Provider Trait
// =============================================================================

/// Common interface implemented by all LLM providers.
#[async_trait]
pub trait BaseLLM: Send + Sync {
    /// Run one chat completion and return the trimmed completion text.
    async fn complete(&self, request: ChatRequest) -> Result<String, LLMError>;

    /// Resolved model identifier.
    fn model(&self) -> &str;
}

// =============================================================================
// Factory
// =============================================================================

/// Factory function to create an LLM provider.
///
/// # Supported Providers
///
/// - `"openai"` - OpenAI chat completions API
pub fn create_llm_provider(
    provider_type: &str,
    config: LLMConfig,
) -> Result<Box<dyn BaseLLM>, LLMError> {
    match provider_type.to_lowercase().as_str() {
        "openai" => Ok(Box::new(OpenAILLM::new(config)?)),
        _ => Err(LLMError::ConfigurationError(format!(
            "Unsupported LLM provider: {provider_type}. Supported providers: openai"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_helpers() {
        assert_eq!(ChatMessage::system("a").role, "system");
        assert_eq!(ChatMessage::user("b").role, "user");
        assert_eq!(ChatMessage::assistant("c").role, "assistant");
    }

    #[test]
    fn test_create_openai_llm_provider() {
        let config = LLMConfig {
            api_key: "sk-test".to_string(),
            ..Default::default()
        };
        let llm = create_llm_provider("openai", config).unwrap();
        assert_eq!(llm.model(), "gpt-4o-mini");
    }

    #[test]
    fn test_create_llm_provider_case_insensitive() {
        let config = LLMConfig {
            api_key: "sk-test".to_string(),
            ..Default::default()
        };
        assert!(create_llm_provider("OpenAI", config).is_ok());
    }

    #[test]
    fn test_invalid_provider_error_message() {
        let result = create_llm_provider("invalid", LLMConfig::default());
        match result {
            Err(LLMError::ConfigurationError(msg)) => {
                assert!(msg.contains("Unsupported LLM provider: invalid"));
                assert!(msg.contains("openai"));
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }
}
