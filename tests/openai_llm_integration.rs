//! Integration tests for the OpenAI chat completions client
//!
//! These tests verify:
//! - The completion round trip against a mock API
//! - Error envelope handling (API errors, auth failures, empty completions)
//!
//! No test here talks to the real OpenAI API; the endpoint is overridden
//! with a wiremock server.

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use callbot::core::llm::{
    BaseLLM, ChatMessage, ChatRequest, LLMConfig, LLMError, OpenAILLM, create_llm_provider,
};

/// Build a config pointed at a mock server
fn mock_config(server: &MockServer) -> LLMConfig {
    LLMConfig {
        api_key: "sk-test".to_string(),
        base_url: Some(format!("{}/v1/chat/completions", server.uri())),
        ..Default::default()
    }
}

fn greeting_request() -> ChatRequest {
    ChatRequest::new(vec![
        ChatMessage::system("Tu es une assistante téléphonique."),
        ChatMessage::user("Bonjour"),
    ])
}

/// Test the factory rejects unknown providers
#[test]
fn test_factory_rejects_unknown_provider() {
    let config = LLMConfig {
        api_key: "sk-test".to_string(),
        ..Default::default()
    };
    assert!(create_llm_provider("anthropic", config).is_err());
}

/// Test a successful completion round trip through the mock API
#[tokio::test]
async fn test_completion_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [
                {"message": {"role": "assistant", "content": " Bonjour, que puis-je faire pour vous ? "}}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let llm = OpenAILLM::new(mock_config(&server)).unwrap();
    let reply = llm.complete(greeting_request()).await.unwrap();

    // Whitespace from the provider is trimmed
    assert_eq!(reply, "Bonjour, que puis-je faire pour vous ?");
}

/// Test that an empty choice list is a provider error
#[tokio::test]
async fn test_empty_choices_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
        .mount(&server)
        .await;

    let llm = OpenAILLM::new(mock_config(&server)).unwrap();
    let err = llm.complete(greeting_request()).await.unwrap_err();

    match err {
        LLMError::ProviderError(msg) => assert!(msg.contains("empty completion")),
        other => panic!("Expected ProviderError, got: {other:?}"),
    }
}

/// Test that a whitespace-only completion is a provider error
#[tokio::test]
async fn test_blank_completion_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "   "}}]
        })))
        .mount(&server)
        .await;

    let llm = OpenAILLM::new(mock_config(&server)).unwrap();
    assert!(llm.complete(greeting_request()).await.is_err());
}

/// Test that the API error envelope surfaces as a provider error
#[tokio::test]
async fn test_api_error_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "error": {"message": "The server had an error", "type": "server_error"}
        })))
        .mount(&server)
        .await;

    let llm = OpenAILLM::new(mock_config(&server)).unwrap();
    let err = llm.complete(greeting_request()).await.unwrap_err();

    match err {
        LLMError::ProviderError(msg) => {
            assert!(msg.contains("The server had an error"));
            assert!(msg.contains("server_error"));
        }
        other => panic!("Expected ProviderError, got: {other:?}"),
    }
}

/// Test that a 401 maps to an authentication failure
#[tokio::test]
async fn test_unauthorized_maps_to_authentication_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let llm = OpenAILLM::new(mock_config(&server)).unwrap();
    let err = llm.complete(greeting_request()).await.unwrap_err();

    assert!(matches!(err, LLMError::AuthenticationFailed(_)));
}
