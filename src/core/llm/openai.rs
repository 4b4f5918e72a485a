//! OpenAI chat completions client.
//!
//! # API Reference
//!
//! - Endpoint: `POST https://api.openai.com/v1/chat/completions`
//! - The first choice's message content is returned; other choices are
//!   ignored.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{BaseLLM, ChatMessage, ChatRequest, LLMConfig, LLMError};

/// OpenAI chat completions endpoint.
pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Model used when the configuration leaves it empty.
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// End-to-end timeout for one completion request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
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

/// OpenAI chat client implementing the [`BaseLLM`] trait.
#[derive(Debug)]
pub struct OpenAILLM {
    config: LLMConfig,
    http_client: reqwest::Client,
    model: String,
}

impl OpenAILLM {
    /// Create a new client. Fails when the API key is missing.
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        if config.api_key.trim().is_empty() {
            return Err(LLMError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let model = if config.model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            config.model.clone()
        };

        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                LLMError::ConfigurationError(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            http_client,
            model,
        })
    }

    fn completion_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(OPENAI_CHAT_URL)
    }
}

#[async_trait]
impl BaseLLM for OpenAILLM {
    async fn complete(&self, request: ChatRequest) -> Result<String, LLMError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature.or(self.config.temperature),
            max_tokens: request.max_tokens,
        };

        let response = self
            .http_client
            .post(self.completion_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| LLMError::NetworkError(format!("Failed to read response: {e}")))?;

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
                LLMError::AuthenticationFailed(error_msg)
            } else {
                LLMError::ProviderError(error_msg)
            });
        }

        let parsed: CompletionResponse = serde_json::from_str(&response_text)
            .map_err(|e| LLMError::ProviderError(format!("Unexpected response body: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LLMError::ProviderError(
                "OpenAI returned an empty completion".to_string(),
            ));
        }

        debug!(model = %self.model, chars = content.len(), "Chat completion received");

        Ok(content.trim().to_string())
    }

    fn model(&self) -> &str {
        &self.model
    }
}
