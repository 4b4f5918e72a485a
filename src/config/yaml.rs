use serde::Deserialize;
use std::path::PathBuf;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// This structure represents the full configuration that can be loaded from a
/// YAML file. All fields are optional to allow partial configuration; anything
/// absent falls back to environment variables and then to defaults.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   public_url: "https://callbot.example.com"
///
/// providers:
///   stt: "openai"
///   tts: "elevenlabs"
///   tts_voice: "nicolas"
///   llm_model: "gpt-4o-mini"
///   openai_api_key: "your-openai-key"
///   elevenlabs_api_key: "your-elevenlabs-key"
///
/// rag:
///   base_url: "https://rag.example.com"
///   api_key: "your-rag-key"
///
/// crm:
///   base_url: "https://crm.example.com/api/v2"
///   api_token: "your-crm-token"
///   owner_id: "0055t000..."
///
/// telephony:
///   account_sid: "AC..."
///   auth_token: "your-twilio-token"
///
/// cache:
///   path: "/var/cache/callbot/audio"
///   spool_path: "/var/cache/callbot/utterances"
///
/// call:
///   required_silence_ms: 700
///   hangup_silence_secs: 70
///
/// appointments:
///   duration_minutes: 60
///   working_hours:
///     time_slots:
///       - "09:00-12:00"
///       - "13:00-16:00"
///   allowed_weekdays: [0, 1, 2, 3, 4]
///   max_days_ahead: 30
///   timezone: "Europe/Paris"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub providers: Option<ProvidersYaml>,
    pub rag: Option<RagYaml>,
    pub crm: Option<CrmYaml>,
    pub telephony: Option<TelephonyYaml>,
    pub cache: Option<CacheYaml>,
    pub security: Option<SecurityYaml>,
    pub call: Option<CallYaml>,
    pub appointments: Option<AppointmentsYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Public base URL used to build the stream URL handed to the telephony
    /// provider in TwiML responses.
    pub public_url: Option<String>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Provider selection and API keys from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersYaml {
    /// STT provider name ("openai")
    pub stt: Option<String>,
    /// TTS provider name ("openai" or "elevenlabs")
    pub tts: Option<String>,
    /// Voice identifier, also used as the cache namespace
    pub tts_voice: Option<String>,
    /// Chat model used for routing, intent classification and extraction
    pub llm_model: Option<String>,
    /// OpenAI API key for Whisper STT, TTS and chat completions
    pub openai_api_key: Option<String>,
    /// ElevenLabs API key for TTS
    pub elevenlabs_api_key: Option<String>,
}

/// RAG backend configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RagYaml {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

/// CRM backend configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CrmYaml {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    /// Default advisor the bot books appointments for
    pub owner_id: Option<String>,
    /// Advisor display name, spoken to callers and fed to prompts
    pub owner_name: Option<String>,
}

/// Telephony control API credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TelephonyYaml {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
}

/// Audio cache configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CacheYaml {
    /// Root of the pregenerated audio tree
    pub path: Option<String>,
    /// Directory for short-lived utterance WAV files awaiting transcription
    pub spool_path: Option<String>,
}

/// Security configuration from YAML
///
/// # Example YAML structure
/// ```yaml
/// security:
///   cors_allowed_origins: "https://example.com,https://app.example.com"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
///   max_websocket_connections: 1000
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    pub rate_limit_requests_per_second: Option<u32>,
    /// Maximum burst size for rate limiting
    pub rate_limit_burst_size: Option<u32>,
    /// Maximum concurrent WebSocket connections
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    pub max_connections_per_ip: Option<u32>,
}

/// Per-call behavior tuning from YAML
///
/// All values have working defaults; this section exists so operators can
/// retune silence and barge-in behavior without a rebuild.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CallYaml {
    /// Normalized RMS floor under which a no-speech chunk counts as silence
    pub rms_silence_threshold: Option<f32>,
    /// Multiplier over the RMS floor required to barge in while speaking
    pub barge_in_factor: Option<f32>,
    /// Sustained loud audio required before a barge-in triggers (ms)
    pub barge_in_sustain_ms: Option<u64>,
    /// Trailing silence that closes an utterance and triggers a flush (ms)
    pub required_silence_ms: Option<u64>,
    /// Silence before the bot asks whether the caller is still there (s)
    pub reask_silence_secs: Option<u64>,
    /// Silence before the bot says goodbye and hangs up (s)
    pub hangup_silence_secs: Option<u64>,
    /// Whether the re-ask prompt is spoken at all
    pub speak_anew_on_silence: Option<bool>,
    /// Minimum buffered audio before a silence-driven flush (bytes)
    pub min_utterance_bytes: Option<usize>,
    /// Buffered audio that forces a flush regardless of silence (bytes)
    pub max_utterance_bytes: Option<usize>,
    /// Pacing overlap subtracted from each inter-chunk wait (ms)
    pub pacing_overlap_ms: Option<u64>,
    /// Run normalization and high-pass filtering before STT
    pub preprocess_audio: Option<bool>,
    /// Outbound queue depth at which producers start to cooperatively wait
    pub outgoing_queue_high_water: Option<usize>,
    /// WebRTC VAD aggressiveness (0-3)
    pub vad_mode: Option<u8>,
}

/// Appointment scheduling rules from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppointmentsYaml {
    pub duration_minutes: Option<u32>,
    pub working_hours: Option<WorkingHoursYaml>,
    /// Weekday indices, 0 = Monday .. 6 = Sunday
    #[serde(default)]
    pub allowed_weekdays: Vec<u8>,
    pub max_days_ahead: Option<i64>,
    pub timezone: Option<String>,
}

/// Working hours from YAML
///
/// The `time_slots` list is the preferred form. The legacy `start`/`end`
/// pair is still honored and materialized as two slots split at the
/// 12:00/13:00 lunch break.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WorkingHoursYaml {
    pub start: Option<String>,
    pub end: Option<String>,
    #[serde(default)]
    pub time_slots: Vec<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is malformed,
    /// or a field has an invalid type.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        let config: YamlConfig =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Yaml {
                path: path.clone(),
                source,
            })?;

        Ok(config)
    }
}
