//! Top-level application error type.
//!
//! Every subsystem defines its own `thiserror` enum; `AppError` wraps them
//! so `main`, the HTTP handlers, and the call session can propagate a single
//! type with `?`. The `IntoResponse` impl maps errors to HTTP statuses for
//! the REST surface; media-plane code never surfaces errors to the caller,
//! it recovers locally with a spoken message instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::agents::GraphError;
use crate::config::ConfigError;
use crate::core::audio::AudioError;
use crate::core::cache::CacheError;
use crate::core::crm::CrmError;
use crate::core::llm::LLMError;
use crate::core::rag::RagError;
use crate::core::stt::STTError;
use crate::core::telephony::TelephonyError;
use crate::core::tts::TTSError;
use crate::core::vad::VadError;

/// Convenience alias used throughout the crate.
pub type AppResult<T> = Result<T, AppError>;

/// Aggregated application error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("vad error: {0}")]
    Vad(#[from] VadError),

    #[error("stt error: {0}")]
    Stt(#[from] STTError),

    #[error("tts error: {0}")]
    Tts(#[from] TTSError),

    #[error("llm error: {0}")]
    Llm(#[from] LLMError),

    #[error("crm error: {0}")]
    Crm(#[from] CrmError),

    #[error("rag error: {0}")]
    Rag(#[from] RagError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("agent graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("telephony error: {0}")]
    Telephony(#[from] TelephonyError),

    /// The agents graph was not initialized at call start. This is the only
    /// fatal per-call condition; it indicates missing service configuration.
    #[error("agents graph is not initialized; check LLM/RAG/CRM configuration")]
    GraphUninitialized,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::GraphUninitialized => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Transport(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::error!(status = %status, error = %self, "request failed");
        let body = axum::Json(serde_json::json!({
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_uninitialized_maps_to_503() {
        let err = AppError::GraphUninitialized;
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_transport_maps_to_bad_gateway() {
        let err = AppError::Transport("peer went away".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("peer went away"));
    }

    #[test]
    fn test_module_error_conversion() {
        let stt = STTError::NetworkError("timeout".to_string());
        let app: AppError = stt.into();
        assert!(matches!(app, AppError::Stt(_)));
        assert_eq!(app.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
