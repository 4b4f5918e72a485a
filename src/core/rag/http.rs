//! HTTP client for the RAG backend.
//!
//! # Endpoints
//!
//! - `POST {base}/users` - register or look up a user by phone number
//! - `POST {base}/conversations` - open a conversation
//! - `POST {base}/conversations/{id}/history` - append one turn
//! - `POST {base}/conversations/{id}/query` - streamed answer
//!
//! The query endpoint streams the answer as chunked UTF-8 text. Chunk
//! boundaries can split multi-byte characters, so decoding keeps a carry of
//! trailing incomplete bytes between chunks instead of decoding lossily.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{BaseRag, InterruptFlag, RagConfig, RagError};

/// Timeout for the non-streaming management calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for establishing the streaming query connection. The body itself
/// is unbounded; the stream lives as long as the answer.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct CreateUserResponse {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateConversationResponse {
    conversation_id: String,
}

/// REST client implementing the [`BaseRag`] trait.
#[derive(Debug)]
pub struct HttpRagClient {
    config: RagConfig,
    http_client: reqwest::Client,
    stream_client: reqwest::Client,
}

impl HttpRagClient {
    /// Create a new client. Fails when the base URL is missing.
    pub fn new(config: RagConfig) -> Result<Self, RagError> {
        if config.base_url.trim().is_empty() {
            return Err(RagError::ConfigurationError(
                "RAG base URL is required".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                RagError::ConfigurationError(format!("Failed to build HTTP client: {e}"))
            })?;

        // No overall timeout on the streaming client; answers take as long
        // as they take and the interrupt flag handles abandonment.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                RagError::ConfigurationError(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            http_client,
            stream_client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) if !key.is_empty() => builder.bearer_auth(key),
            _ => builder,
        }
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, RagError> {
        let response = self
            .authorize(self.http_client.post(self.endpoint(path)))
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RagError::NetworkError(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(RagError::BackendError(format!(
                "RAG backend returned {status}: {text}"
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| RagError::InvalidResponse(format!("Unexpected body: {e}")))
    }
}

/// Pull the longest valid UTF-8 prefix out of `buffer`, leaving any trailing
/// incomplete sequence in place for the next chunk.
fn drain_utf8(buffer: &mut Vec<u8>) -> Option<String> {
    if buffer.is_empty() {
        return None;
    }

    let valid_len = match std::str::from_utf8(buffer) {
        Ok(_) => buffer.len(),
        Err(e) => e.valid_up_to(),
    };

    if valid_len == 0 {
        return None;
    }

    let rest = buffer.split_off(valid_len);
    let chunk = std::mem::replace(buffer, rest);
    // Length was validated above.
    String::from_utf8(chunk).ok().filter(|s| !s.is_empty())
}

#[async_trait]
impl BaseRag for HttpRagClient {
    async fn create_user(&self, phone: &str) -> Result<String, RagError> {
        let response: CreateUserResponse = self
            .post_json("users", json!({ "phone_number": phone }))
            .await?;
        debug!(user_id = %response.user_id, "RAG user ready");
        Ok(response.user_id)
    }

    async fn create_conversation(&self, user_id: &str) -> Result<String, RagError> {
        let response: CreateConversationResponse = self
            .post_json("conversations", json!({ "user_id": user_id }))
            .await?;
        debug!(conversation_id = %response.conversation_id, "RAG conversation opened");
        Ok(response.conversation_id)
    }

    async fn append_history(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
    ) -> Result<(), RagError> {
        let response = self
            .authorize(
                self.http_client
                    .post(self.endpoint(&format!("conversations/{conversation_id}/history"))),
            )
            .json(&json!({ "role": role, "content": content }))
            .send()
            .await
            .map_err(|e| RagError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::BackendError(format!(
                "RAG backend returned {status}: {text}"
            )));
        }
        Ok(())
    }

    async fn rag_query_stream(
        &self,
        conversation_id: &str,
        user_query_content: &str,
        interrupt: InterruptFlag,
    ) -> Result<BoxStream<'static, Result<String, RagError>>, RagError> {
        let response = self
            .authorize(
                self.stream_client
                    .post(self.endpoint(&format!("conversations/{conversation_id}/query"))),
            )
            .json(&json!({ "query": user_query_content }))
            .send()
            .await
            .map_err(|e| RagError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::BackendError(format!(
                "RAG backend returned {status}: {text}"
            )));
        }

        let mut body = response.bytes_stream();
        let stream = try_stream! {
            let mut carry: Vec<u8> = Vec::new();

            while let Some(chunk) = body.next().await {
                if interrupt.is_interrupted() {
                    debug!("RAG answer stream interrupted");
                    return;
                }

                let chunk = chunk
                    .map_err(|e| RagError::NetworkError(format!("Stream read failed: {e}")))?;
                carry.extend_from_slice(&chunk);

                if let Some(text) = drain_utf8(&mut carry) {
                    yield text;
                }
            }

            // A trailing incomplete sequence means the body was cut off
            // mid-character; drop it rather than emit replacement glyphs.
            if let Some(text) = drain_utf8(&mut carry) {
                yield text;
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpRagClient {
        HttpRagClient::new(RagConfig {
            base_url: "http://rag.local/api".to_string(),
            api_key: None,
        })
        .unwrap()
    }

    #[test]
    fn test_new_requires_base_url() {
        let err = HttpRagClient::new(RagConfig::default()).unwrap_err();
        assert!(matches!(err, RagError::ConfigurationError(_)));
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let client = HttpRagClient::new(RagConfig {
            base_url: "http://rag.local/api/".to_string(),
            api_key: None,
        })
        .unwrap();
        assert_eq!(client.endpoint("users"), "http://rag.local/api/users");
    }

    #[test]
    fn test_endpoint_for_conversation_routes() {
        let client = client();
        assert_eq!(
            client.endpoint("conversations/c42/query"),
            "http://rag.local/api/conversations/c42/query"
        );
    }

    #[test]
    fn test_drain_utf8_complete() {
        let mut buffer = "Bonjour".as_bytes().to_vec();
        assert_eq!(drain_utf8(&mut buffer).unwrap(), "Bonjour");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_utf8_keeps_split_accent() {
        // "é" is 0xC3 0xA9; split it across two chunks.
        let mut buffer = vec![b'c', b'a', b'f', 0xC3];
        assert_eq!(drain_utf8(&mut buffer).unwrap(), "caf");
        assert_eq!(buffer, vec![0xC3]);

        buffer.push(0xA9);
        assert_eq!(drain_utf8(&mut buffer).unwrap(), "é");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_utf8_empty() {
        let mut buffer = Vec::new();
        assert!(drain_utf8(&mut buffer).is_none());
    }

    #[test]
    fn test_drain_utf8_only_incomplete_bytes() {
        let mut buffer = vec![0xC3];
        assert!(drain_utf8(&mut buffer).is_none());
        assert_eq!(buffer, vec![0xC3]);
    }
}
