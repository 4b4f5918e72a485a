//! Integration tests for the ElevenLabs TTS provider
//!
//! These tests verify:
//! - Provider creation through the factory
//! - The synthesis round trip against a mock API (native `ulaw_8000` output)
//! - Error envelope handling (API errors, auth failures, empty bodies)
//!
//! No test here talks to the real ElevenLabs API; the endpoint is overridden
//! with a wiremock server.

use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use callbot::core::tts::{
    BaseTTS, ElevenLabsTTS, TTSConfig, TTSError, TTSProvider, create_tts_provider,
    create_tts_provider_from_enum, get_supported_tts_providers,
};

/// Build a config pointed at a mock server
fn mock_config(server: &MockServer) -> TTSConfig {
    TTSConfig {
        api_key: "el-test".to_string(),
        voice_id: Some("callbot-voice".to_string()),
        base_url: Some(format!("{}/v1/text-to-speech", server.uri())),
        ..Default::default()
    }
}

// =============================================================================
// Factory Tests
// =============================================================================

/// Test the supported provider list
#[test]
fn test_elevenlabs_in_supported_providers() {
    let providers = get_supported_tts_providers();
    assert!(providers.contains(&"elevenlabs"));
}

/// Test provider creation via string name and aliases
#[test]
fn test_create_elevenlabs_provider_by_name() {
    let config = TTSConfig {
        api_key: "el-test".to_string(),
        ..Default::default()
    };

    for name in ["elevenlabs", "ElevenLabs", "eleven-labs", "eleven_labs"] {
        let tts = create_tts_provider(name, config.clone()).unwrap();
        assert_eq!(tts.provider_name(), "elevenlabs");
    }
}

/// Test provider creation via enum, with the default voice applied
#[test]
fn test_create_elevenlabs_provider_by_enum() {
    let config = TTSConfig {
        api_key: "el-test".to_string(),
        ..Default::default()
    };

    let tts = create_tts_provider_from_enum(TTSProvider::ElevenLabs, config).unwrap();
    assert!(!tts.voice().is_empty());
}

/// Test API key validation
#[test]
fn test_elevenlabs_requires_api_key() {
    let result = create_tts_provider("elevenlabs", TTSConfig::default());

    match result {
        Err(TTSError::AuthenticationFailed(msg)) => assert!(msg.contains("API key")),
        Err(e) => panic!("Expected AuthenticationFailed, got: {e}"),
        Ok(_) => panic!("Expected error, got success"),
    }
}

// =============================================================================
// Synthesis Round Trip
// =============================================================================

/// Test a successful synthesis round trip through the mock API
///
/// The response body is 8kHz mu-law and must be forwarded byte for byte;
/// any conversion here would corrupt the wire audio.
#[tokio::test]
async fn test_synthesis_round_trip() {
    let wire_audio: Vec<u8> = vec![0xFF, 0x7F, 0x00, 0x80, 0xFF, 0x7F, 0x00, 0x80];

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/callbot-voice"))
        .and(query_param("output_format", "ulaw_8000"))
        .and(header("xi-api-key", "el-test"))
        .and(body_json(serde_json::json!({
            "text": "Bonjour, comment puis-je vous aider ?",
            "model_id": "eleven_multilingual_v2"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(wire_audio.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let tts = ElevenLabsTTS::new(mock_config(&server)).unwrap();
    let audio = tts
        .synthesize_speech_to_bytes("Bonjour, comment puis-je vous aider ?")
        .await
        .unwrap();

    assert_eq!(audio, wire_audio);
}

/// Test that an empty audio body is rejected
#[tokio::test]
async fn test_empty_audio_body_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let tts = ElevenLabsTTS::new(mock_config(&server)).unwrap();
    let err = tts.synthesize_speech_to_bytes("Bonjour").await.unwrap_err();

    match err {
        TTSError::ProviderError(msg) => assert!(msg.contains("empty audio body")),
        other => panic!("Expected ProviderError, got: {other:?}"),
    }
}

// =============================================================================
// Error Handling
// =============================================================================

/// Test that the API error envelope surfaces as a provider error
#[tokio::test]
async fn test_api_error_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
            "detail": {"status": "invalid_voice", "message": "Voice not found"}
        })))
        .mount(&server)
        .await;

    let tts = ElevenLabsTTS::new(mock_config(&server)).unwrap();
    let err = tts.synthesize_speech_to_bytes("Bonjour").await.unwrap_err();

    match err {
        TTSError::ProviderError(msg) => {
            assert!(msg.contains("Voice not found"));
            assert!(msg.contains("invalid_voice"));
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
            "detail": {"status": "invalid_api_key", "message": "Invalid API key"}
        })))
        .mount(&server)
        .await;

    let tts = ElevenLabsTTS::new(mock_config(&server)).unwrap();
    let err = tts.synthesize_speech_to_bytes("Bonjour").await.unwrap_err();

    assert!(matches!(err, TTSError::AuthenticationFailed(_)));
}
