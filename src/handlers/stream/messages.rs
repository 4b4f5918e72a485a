//! Media stream wire protocol.
//!
//! The telephony provider speaks JSON text frames over the WebSocket. Inbound
//! frames are tagged by an `event` field; the provider sends `connected` and
//! `start` once, then a `media` frame every 20 ms, `mark` echoes, and `stop`
//! when the caller hangs up. Outbound frames reuse the same tagging and carry
//! the stream SID announced in `start`.
//!
//! Unknown inbound events deserialize into [`InboundEvent::Other`] so a
//! provider-side protocol addition never kills a live call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Custom parameter carrying the caller's phone number, set in the TwiML
/// `<Stream>` block that opens the media connection.
pub const PHONE_PARAMETER: &str = "phone";

// =============================================================================
// Inbound (provider -> orchestrator)
// =============================================================================

/// One inbound frame from the media stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    /// Transport-level handshake, sent before `start`.
    Connected,

    /// Call metadata. Media frames only arrive after this.
    Start { start: StartFrame },

    /// 20 ms of caller audio.
    Media { media: MediaFrame },

    /// Echo of an outbound mark; the audio queued before it has played out.
    Mark { mark: MarkFrame },

    /// The provider closed the stream (caller hangup or call transfer).
    Stop,

    /// Any event this build does not know. Logged and skipped.
    #[serde(other)]
    Other,
}

/// Payload of the `start` event.
#[derive(Debug, Clone, Deserialize)]
pub struct StartFrame {
    /// Provider identifier of the phone call, used for REST call control.
    #[serde(rename = "callSid")]
    pub call_sid: String,

    /// Identifier of this media stream, echoed on every outbound frame.
    #[serde(rename = "streamSid")]
    pub stream_sid: String,

    /// `<Parameter>` values from the TwiML that opened the stream.
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StartFrame {
    /// Caller phone number passed through the TwiML parameters, if any.
    pub fn caller_phone(&self) -> Option<&str> {
        self.custom_parameters
            .get(PHONE_PARAMETER)
            .map(String::as_str)
            .filter(|phone| !phone.trim().is_empty())
    }
}

/// Payload of the `media` event.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFrame {
    /// Base64-encoded mu-law audio.
    pub payload: String,
}

/// Payload of the `mark` event.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkFrame {
    pub name: String,
}

// =============================================================================
// Outbound (orchestrator -> provider)
// =============================================================================

/// One outbound frame to the media stream.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundEvent {
    /// Audio for the caller.
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },

    /// Playback marker, echoed back by the provider once reached.
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: OutboundMark,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutboundMedia {
    /// Base64-encoded mu-law audio.
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutboundMark {
    pub name: String,
}

impl OutboundEvent {
    /// Build a media frame for `stream_sid`.
    pub fn media(stream_sid: impl Into<String>, payload_b64: impl Into<String>) -> Self {
        OutboundEvent::Media {
            stream_sid: stream_sid.into(),
            media: OutboundMedia {
                payload: payload_b64.into(),
            },
        }
    }

    /// Build a mark frame for `stream_sid`.
    pub fn mark(stream_sid: impl Into<String>, name: impl Into<String>) -> Self {
        OutboundEvent::Mark {
            stream_sid: stream_sid.into(),
            mark: OutboundMark { name: name.into() },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_connected() {
        let raw = r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#;
        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, InboundEvent::Connected));
    }

    #[test]
    fn test_parse_start_with_phone_parameter() {
        let raw = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "accountSid": "AC00000000000000000000000000000000",
                "callSid": "CA11111111111111111111111111111111",
                "streamSid": "MZ22222222222222222222222222222222",
                "tracks": ["inbound"],
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
                "customParameters": {"phone": "+33612345678"}
            },
            "streamSid": "MZ22222222222222222222222222222222"
        }"#;

        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        match event {
            InboundEvent::Start { start } => {
                assert_eq!(start.call_sid, "CA11111111111111111111111111111111");
                assert_eq!(start.stream_sid, "MZ22222222222222222222222222222222");
                assert_eq!(start.caller_phone(), Some("+33612345678"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_start_without_parameters_has_no_phone() {
        let raw = r#"{
            "event": "start",
            "start": {"callSid": "CA1", "streamSid": "MZ1"}
        }"#;

        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        match event {
            InboundEvent::Start { start } => assert_eq!(start.caller_phone(), None),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_blank_phone_parameter_is_ignored() {
        let raw = r#"{
            "event": "start",
            "start": {"callSid": "CA1", "streamSid": "MZ1", "customParameters": {"phone": "  "}}
        }"#;

        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        match event {
            InboundEvent::Start { start } => assert_eq!(start.caller_phone(), None),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_media() {
        let raw = r#"{
            "event": "media",
            "sequenceNumber": "3",
            "media": {"track": "inbound", "chunk": "2", "timestamp": "40", "payload": "f39/fw=="},
            "streamSid": "MZ1"
        }"#;

        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        match event {
            InboundEvent::Media { media } => assert_eq!(media.payload, "f39/fw=="),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_mark_and_stop() {
        let mark: InboundEvent =
            serde_json::from_str(r#"{"event":"mark","streamSid":"MZ1","mark":{"name":"m-3"}}"#)
                .unwrap();
        match mark {
            InboundEvent::Mark { mark } => assert_eq!(mark.name, "m-3"),
            other => panic!("unexpected event: {other:?}"),
        }

        let stop: InboundEvent = serde_json::from_str(
            r#"{"event":"stop","stop":{"accountSid":"AC1","callSid":"CA1"},"streamSid":"MZ1"}"#,
        )
        .unwrap();
        assert!(matches!(stop, InboundEvent::Stop));
    }

    #[test]
    fn test_unknown_event_is_other() {
        let event: InboundEvent =
            serde_json::from_str(r#"{"event":"dtmf","dtmf":{"digit":"1"}}"#).unwrap();
        assert!(matches!(event, InboundEvent::Other));
    }

    #[test]
    fn test_outbound_media_shape() {
        let event = OutboundEvent::media("MZ1", "AAAA");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"event": "media", "streamSid": "MZ1", "media": {"payload": "AAAA"}})
        );
    }

    #[test]
    fn test_outbound_mark_shape() {
        let event = OutboundEvent::mark("MZ1", "phrase-7");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"event": "mark", "streamSid": "MZ1", "mark": {"name": "phrase-7"}})
        );
    }
}
