//! REST endpoints: health probe and the provider voice webhook.

use axum::Form;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::handlers::stream::messages::PHONE_PARAMETER;
use crate::state::AppState;

/// Health check endpoint with the gauges worth scraping.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_calls": state.active_call_count(),
        "ws_connections": state.ws_connection_count(),
        "agent_ready": state.graph.is_some(),
    }))
}

/// Fields the telephony provider posts to the voice webhook. All optional;
/// the TwiML answer only needs the caller number, and survives without it.
#[derive(Debug, Default, Deserialize)]
pub struct VoiceWebhookForm {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "From")]
    pub from: Option<String>,
}

/// Answer an inbound call with TwiML that connects it to the media stream
/// endpoint, forwarding the caller number as a stream parameter so the
/// session can identify the caller.
pub async fn voice_webhook(
    State(state): State<Arc<AppState>>,
    Form(form): Form<VoiceWebhookForm>,
) -> Response {
    let Some(stream_url) = state.config.media_stream_url() else {
        warn!("Voice webhook hit but PUBLIC_URL is not configured");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "media stream URL is not configured"})),
        )
            .into_response();
    };

    info!(
        call_sid = ?form.call_sid,
        from = ?form.from,
        "Inbound call, connecting to media stream"
    );

    let caller = form.from.as_deref().unwrap_or("");
    let twiml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Connect>
        <Stream url="{}">
            <Parameter name="{}" value="{}" />
        </Stream>
    </Connect>
</Response>"#,
        escape_xml(&stream_url),
        PHONE_PARAMETER,
        escape_xml(caller)
    );

    ([(header::CONTENT_TYPE, "application/xml")], twiml).into_response()
}

/// Escape a value for interpolation into an XML attribute.
fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::testing::{FakeWireTts, ScriptedStt};
    use crate::config::ServerConfig;
    use crate::core::cache::AudioCache;
    use crate::core::telephony::NoopCallControl;
    use tempfile::TempDir;

    async fn state_with(config: ServerConfig) -> (Arc<AppState>, TempDir) {
        let dir = TempDir::new().unwrap();
        let cache = AudioCache::open(&dir.path().join("cache"), "fake", "voice")
            .await
            .unwrap();
        let state = AppState::from_parts(
            config,
            Arc::new(ScriptedStt::answering(&[])),
            Arc::new(FakeWireTts::default()),
            Arc::new(cache),
            None,
            Arc::new(NoopCallControl),
        );
        (state, dir)
    }

    #[tokio::test]
    async fn test_health_reports_status_and_gauges() {
        let (state, _dir) = state_with(ServerConfig::for_tests()).await;

        let Json(body) = health_check(State(state)).await;

        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_calls"], 0);
        assert_eq!(body["ws_connections"], 0);
        assert_eq!(body["agent_ready"], false);
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn test_voice_webhook_answers_with_stream_twiml() {
        let mut config = ServerConfig::for_tests();
        config.public_url = Some("https://callbot.example.com".to_string());
        let (state, _dir) = state_with(config).await;

        let form = VoiceWebhookForm {
            call_sid: Some("CA123".to_string()),
            from: Some("+33612345678".to_string()),
        };
        let response = voice_webhook(State(state), Form(form)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("application/xml")
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let twiml = String::from_utf8(body.to_vec()).unwrap();
        assert!(twiml.contains(r#"<Stream url="wss://callbot.example.com/stream">"#));
        assert!(twiml.contains(r#"<Parameter name="phone" value="+33612345678" />"#));
    }

    #[tokio::test]
    async fn test_voice_webhook_without_public_url_is_an_error() {
        let (state, _dir) = state_with(ServerConfig::for_tests()).await;

        let response = voice_webhook(State(state), Form(VoiceWebhookForm::default())).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_escape_xml_neutralizes_attribute_breakouts() {
        assert_eq!(
            escape_xml(r#"a"b<c>&'d"#),
            "a&quot;b&lt;c&gt;&amp;&apos;d"
        );
        assert_eq!(escape_xml("+33612345678"), "+33612345678");
    }
}
