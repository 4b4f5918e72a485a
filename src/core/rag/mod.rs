//! RAG backend integration.
//!
//! The course Q&A agent answers from a retrieval-augmented service that
//! owns users, conversations, and history, and streams answers chunk by
//! chunk. Streaming matters because chunks are spoken as they arrive; the
//! caller can barge in mid-answer, which trips the [`InterruptFlag`] and
//! tears the stream down without waiting for the tail.

pub mod http;

pub use http::HttpRagClient;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Errors produced by the RAG backend client.
#[derive(Debug, Error)]
pub enum RagError {
    /// The client configuration is invalid or incomplete.
    #[error("RAG configuration error: {0}")]
    ConfigurationError(String),

    /// The request could not be sent or the response could not be read.
    #[error("RAG network error: {0}")]
    NetworkError(String),

    /// The backend returned an error response.
    #[error("RAG backend error: {0}")]
    BackendError(String),

    /// The backend response did not match the expected shape.
    #[error("RAG invalid response: {0}")]
    InvalidResponse(String),
}

// =============================================================================
// Interrupt Flag
// =============================================================================

/// Shared abort signal for an in-flight streamed answer.
///
/// Cloned into the consuming stream and held by the barge-in path; setting
/// it ends the stream at the next chunk boundary.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the stream to stop.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm the flag for the next answer.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// RAG backend client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RagConfig {
    /// Base URL of the RAG service, without a trailing slash.
    pub base_url: String,

    /// Optional bearer token.
    pub api_key: Option<String>,
}

// =============================================================================
// Client Trait
// =============================================================================

/// Common interface to the RAG backend.
#[async_trait]
pub trait BaseRag: Send + Sync {
    /// Register (or look up) a user keyed by phone number, returning its id.
    async fn create_user(&self, phone: &str) -> Result<String, RagError>;

    /// Open a new conversation for a user, returning the conversation id.
    async fn create_conversation(&self, user_id: &str) -> Result<String, RagError>;

    /// Append one turn to the conversation history.
    async fn append_history(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
    ) -> Result<(), RagError>;

    /// Ask a question and stream the answer as text chunks.
    ///
    /// The stream ends early without error when `interrupt` trips; partial
    /// answers are normal and the caller decides what to do with them.
    async fn rag_query_stream(
        &self,
        conversation_id: &str,
        user_query_content: &str,
        interrupt: InterruptFlag,
    ) -> Result<BoxStream<'static, Result<String, RagError>>, RagError>;
}

// =============================================================================
// Unconfigured Fallback
// =============================================================================

/// Stand-in client used when no RAG base URL is configured.
///
/// Every operation fails with a configuration error, which the agent graph
/// absorbs the same way as a backend outage: the Q&A path answers with the
/// spoken error phrase while the calendar flow keeps working.
pub struct UnconfiguredRag;

impl UnconfiguredRag {
    fn refuse<T>(&self) -> Result<T, RagError> {
        Err(RagError::ConfigurationError(
            "RAG backend is not configured".to_string(),
        ))
    }
}

#[async_trait]
impl BaseRag for UnconfiguredRag {
    async fn create_user(&self, _phone: &str) -> Result<String, RagError> {
        self.refuse()
    }

    async fn create_conversation(&self, _user_id: &str) -> Result<String, RagError> {
        self.refuse()
    }

    async fn append_history(
        &self,
        _conversation_id: &str,
        _role: &str,
        _content: &str,
    ) -> Result<(), RagError> {
        self.refuse()
    }

    async fn rag_query_stream(
        &self,
        _conversation_id: &str,
        _user_query_content: &str,
        _interrupt: InterruptFlag,
    ) -> Result<BoxStream<'static, Result<String, RagError>>, RagError> {
        self.refuse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_flag_starts_clear() {
        let flag = InterruptFlag::new();
        assert!(!flag.is_interrupted());
    }

    #[tokio::test]
    async fn test_unconfigured_rag_fails_every_operation() {
        let rag = UnconfiguredRag;
        assert!(matches!(
            rag.create_user("+33600000000").await,
            Err(RagError::ConfigurationError(_))
        ));
        assert!(matches!(
            rag.create_conversation("u-1").await,
            Err(RagError::ConfigurationError(_))
        ));
        assert!(
            rag.rag_query_stream("c-1", "question", InterruptFlag::new())
                .await
                .is_err()
        );
    }

    #[test]
    fn test_interrupt_flag_trips_and_resets() {
        let flag = InterruptFlag::new();
        flag.interrupt();
        assert!(flag.is_interrupted());
        flag.reset();
        assert!(!flag.is_interrupted());
    }

    #[test]
    fn test_interrupt_flag_clones_share_state() {
        let flag = InterruptFlag::new();
        let clone = flag.clone();
        clone.interrupt();
        assert!(flag.is_interrupted());
    }
}
