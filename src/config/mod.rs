//! Configuration module for the callbot server
//!
//! This module handles server configuration from various sources: .env files,
//! YAML files, and environment variables. Priority: YAML > ENV vars > .env
//! values > defaults. The one exception is the appointment scheduling rules,
//! where `BUSINESS_*` environment variables override the YAML file so an
//! operator can retune business hours without touching the deployed config.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `business_hours`: appointment scheduling rules and their resolution
//!
//! # Example
//! ```rust,no_run
//! use callbot::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;
use url::Url;

pub mod business_hours;
pub mod yaml;

pub use business_hours::{BusinessHoursConfig, SlotWindow};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Per-call behavior tuning.
///
/// Every value has a working default; the YAML `call:` section can override
/// individual knobs. Out-of-range values are clamped rather than rejected.
#[derive(Debug, Clone)]
pub struct CallTuning {
    /// Normalized RMS floor under which a no-speech chunk counts as silence.
    pub rms_silence_threshold: f32,
    /// Multiplier over the RMS floor a chunk must exceed to barge in.
    pub barge_in_factor: f32,
    /// Sustained loud audio required before a barge-in triggers (ms).
    pub barge_in_sustain_ms: u64,
    /// Trailing silence that closes an utterance and triggers a flush (ms).
    pub required_silence_ms: u64,
    /// Silence before the bot asks whether the caller is still there (s).
    pub reask_silence_secs: u64,
    /// Silence before the bot says goodbye and hangs up (s).
    pub hangup_silence_secs: u64,
    /// Whether the re-ask prompt is spoken at all.
    pub speak_anew_on_silence: bool,
    /// Minimum buffered audio before a silence-driven flush (bytes).
    pub min_utterance_bytes: usize,
    /// Buffered audio that forces a flush regardless of silence (bytes).
    pub max_utterance_bytes: usize,
    /// Pacing overlap subtracted from each inter-chunk wait (ms), at most 1000.
    pub pacing_overlap_ms: u64,
    /// Run normalization and high-pass filtering before STT.
    pub preprocess_audio: bool,
    /// Outbound queue depth at which producers cooperatively wait.
    pub outgoing_queue_high_water: usize,
    /// WebRTC VAD aggressiveness (0-3).
    pub vad_mode: u8,
}

impl Default for CallTuning {
    fn default() -> Self {
        Self {
            rms_silence_threshold: 0.015,
            barge_in_factor: 2.5,
            barge_in_sustain_ms: 90,
            required_silence_ms: 700,
            reask_silence_secs: 15,
            hangup_silence_secs: 70,
            speak_anew_on_silence: true,
            min_utterance_bytes: 8_000,
            max_utterance_bytes: 320_000,
            pacing_overlap_ms: 300,
            preprocess_audio: true,
            outgoing_queue_high_water: 64,
            vad_mode: 2,
        }
    }
}

impl CallTuning {
    fn apply_yaml(&mut self, call: &yaml::CallYaml) {
        if let Some(value) = call.rms_silence_threshold {
            self.rms_silence_threshold = value;
        }
        if let Some(value) = call.barge_in_factor {
            self.barge_in_factor = value;
        }
        if let Some(value) = call.barge_in_sustain_ms {
            self.barge_in_sustain_ms = value;
        }
        if let Some(value) = call.required_silence_ms {
            self.required_silence_ms = value;
        }
        if let Some(value) = call.reask_silence_secs {
            self.reask_silence_secs = value;
        }
        if let Some(value) = call.hangup_silence_secs {
            self.hangup_silence_secs = value;
        }
        if let Some(value) = call.speak_anew_on_silence {
            self.speak_anew_on_silence = value;
        }
        if let Some(value) = call.min_utterance_bytes {
            self.min_utterance_bytes = value;
        }
        if let Some(value) = call.max_utterance_bytes {
            self.max_utterance_bytes = value;
        }
        if let Some(value) = call.pacing_overlap_ms {
            self.pacing_overlap_ms = value;
        }
        if let Some(value) = call.preprocess_audio {
            self.preprocess_audio = value;
        }
        if let Some(value) = call.outgoing_queue_high_water {
            self.outgoing_queue_high_water = value;
        }
        if let Some(value) = call.vad_mode {
            self.vad_mode = value;
        }
    }

    /// Clamp values into their supported ranges.
    fn normalize(&mut self) {
        let defaults = Self::default();

        self.rms_silence_threshold = self.rms_silence_threshold.clamp(0.0, 1.0);
        if self.barge_in_factor < 1.0 {
            warn!(
                factor = self.barge_in_factor,
                "barge_in_factor below 1.0, using default"
            );
            self.barge_in_factor = defaults.barge_in_factor;
        }
        if self.pacing_overlap_ms > 1_000 {
            warn!(
                overlap_ms = self.pacing_overlap_ms,
                "pacing_overlap_ms clamped to 1000"
            );
            self.pacing_overlap_ms = 1_000;
        }
        if self.vad_mode > 3 {
            self.vad_mode = 3;
        }
        if self.min_utterance_bytes >= self.max_utterance_bytes {
            warn!(
                min = self.min_utterance_bytes,
                max = self.max_utterance_bytes,
                "utterance byte bounds inverted, using defaults"
            );
            self.min_utterance_bytes = defaults.min_utterance_bytes;
            self.max_utterance_bytes = defaults.max_utterance_bytes;
        }
        if self.outgoing_queue_high_water == 0 {
            self.outgoing_queue_high_water = defaults.outgoing_queue_high_water;
        }
        if self.hangup_silence_secs <= self.reask_silence_secs {
            warn!(
                reask = self.reask_silence_secs,
                hangup = self.hangup_silence_secs,
                "silence ladder inverted, using defaults"
            );
            self.reask_silence_secs = defaults.reask_silence_secs;
            self.hangup_silence_secs = defaults.hangup_silence_secs;
        }
    }
}

/// Server configuration
///
/// Contains everything needed to run the callbot server, including:
/// - Server settings (host, port, TLS, public URL)
/// - Provider selection and API keys (OpenAI, ElevenLabs)
/// - RAG and CRM backend endpoints
/// - Telephony control API credentials
/// - Audio cache and utterance spool locations
/// - Security settings (CORS, rate limiting, connection limits)
/// - Per-call behavior tuning and appointment scheduling rules
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// Public base URL used to build the media stream URL in TwiML replies
    pub public_url: Option<String>,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Provider selection
    pub stt_provider: String,
    pub tts_provider: String,
    pub tts_voice: Option<String>,
    pub llm_model: String,

    // Provider API keys
    /// OpenAI API key for Whisper STT, TTS and chat completions
    pub openai_api_key: Option<String>,
    /// ElevenLabs API key for TTS
    pub elevenlabs_api_key: Option<String>,

    // RAG backend
    pub rag_base_url: Option<String>,
    pub rag_api_key: Option<String>,

    // CRM backend
    pub crm_base_url: Option<String>,
    pub crm_api_token: Option<String>,
    /// Default advisor the bot books appointments for
    pub crm_owner_id: Option<String>,
    /// Advisor display name, spoken to callers and fed to prompts
    pub crm_owner_name: Option<String>,

    // Telephony control API
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,

    // Audio storage
    /// Root of the pregenerated audio tree
    pub cache_path: PathBuf,
    /// Directory for short-lived utterance WAV files awaiting transcription
    pub spool_path: PathBuf,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,

    // Call behavior
    pub tuning: CallTuning,

    // Appointment scheduling rules
    pub business_hours: BusinessHoursConfig,
}

/// Zeroize all secret fields when ServerConfig is dropped so sensitive data
/// is cleared from memory immediately after use.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.elevenlabs_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.rag_api_key {
            key.zeroize();
        }
        if let Some(ref mut token) = self.crm_api_token {
            token.zeroize();
        }
        if let Some(ref mut token) = self.twilio_auth_token {
            token.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Note: the .env file is loaded in main.rs at application startup, so by
    /// the time this runs, .env values already appear as environment
    /// variables (with actual environment variables taking precedence).
    pub fn from_env() -> Result<Self, ConfigError> {
        let tls = match (env_string("TLS_CERT_PATH"), env_string("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            _ => None,
        };

        let config = Self {
            host: env_string("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_parse("PORT").unwrap_or(8080),
            public_url: env_string("PUBLIC_URL"),
            tls,
            stt_provider: env_string("STT_PROVIDER").unwrap_or_else(|| "openai".to_string()),
            tts_provider: env_string("TTS_PROVIDER").unwrap_or_else(|| "elevenlabs".to_string()),
            tts_voice: env_string("TTS_VOICE"),
            llm_model: env_string("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            openai_api_key: env_string("OPENAI_API_KEY"),
            elevenlabs_api_key: env_string("ELEVENLABS_API_KEY"),
            rag_base_url: env_string("RAG_BASE_URL"),
            rag_api_key: env_string("RAG_API_KEY"),
            crm_base_url: env_string("CRM_BASE_URL"),
            crm_api_token: env_string("CRM_API_TOKEN"),
            crm_owner_id: env_string("CRM_OWNER_ID"),
            crm_owner_name: env_string("CRM_OWNER_NAME"),
            twilio_account_sid: env_string("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: env_string("TWILIO_AUTH_TOKEN"),
            cache_path: env_string("AUDIO_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("cache/audio")),
            spool_path: env_string("UTTERANCE_SPOOL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("callbot-utterances")),
            cors_allowed_origins: env_string("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: env_parse("RATE_LIMIT_REQUESTS_PER_SECOND")
                .unwrap_or(60),
            rate_limit_burst_size: env_parse("RATE_LIMIT_BURST_SIZE").unwrap_or(10),
            max_websocket_connections: env_parse("MAX_WEBSOCKET_CONNECTIONS"),
            max_connections_per_ip: env_parse("MAX_CONNECTIONS_PER_IP").unwrap_or(100),
            tuning: CallTuning::default(),
            business_hours: BusinessHoursConfig::resolve(None),
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// Appointment scheduling rules are the exception: `BUSINESS_*`
    /// environment variables override the YAML `appointments:` section.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;

        let mut config = Self::from_env()?;
        config.apply_yaml(&yaml_config);
        config.business_hours = BusinessHoursConfig::resolve(yaml_config.appointments.as_ref());
        config.tuning.normalize();

        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: &yaml::YamlConfig) {
        if let Some(server) = &yaml.server {
            if let Some(host) = &server.host {
                self.host = host.clone();
            }
            if let Some(port) = server.port {
                self.port = port;
            }
            if let Some(public_url) = &server.public_url {
                self.public_url = Some(public_url.clone());
            }
            if let Some(tls) = &server.tls {
                if tls.enabled.unwrap_or(true) {
                    if let (Some(cert), Some(key)) = (&tls.cert_path, &tls.key_path) {
                        self.tls = Some(TlsConfig {
                            cert_path: PathBuf::from(cert),
                            key_path: PathBuf::from(key),
                        });
                    }
                } else {
                    self.tls = None;
                }
            }
        }

        if let Some(providers) = &yaml.providers {
            if let Some(stt) = &providers.stt {
                self.stt_provider = stt.clone();
            }
            if let Some(tts) = &providers.tts {
                self.tts_provider = tts.clone();
            }
            if let Some(voice) = &providers.tts_voice {
                self.tts_voice = Some(voice.clone());
            }
            if let Some(model) = &providers.llm_model {
                self.llm_model = model.clone();
            }
            if let Some(key) = &providers.openai_api_key {
                self.openai_api_key = Some(key.clone());
            }
            if let Some(key) = &providers.elevenlabs_api_key {
                self.elevenlabs_api_key = Some(key.clone());
            }
        }

        if let Some(rag) = &yaml.rag {
            if let Some(base_url) = &rag.base_url {
                self.rag_base_url = Some(base_url.clone());
            }
            if let Some(key) = &rag.api_key {
                self.rag_api_key = Some(key.clone());
            }
        }

        if let Some(crm) = &yaml.crm {
            if let Some(base_url) = &crm.base_url {
                self.crm_base_url = Some(base_url.clone());
            }
            if let Some(token) = &crm.api_token {
                self.crm_api_token = Some(token.clone());
            }
            if let Some(owner) = &crm.owner_id {
                self.crm_owner_id = Some(owner.clone());
            }
            if let Some(name) = &crm.owner_name {
                self.crm_owner_name = Some(name.clone());
            }
        }

        if let Some(telephony) = &yaml.telephony {
            if let Some(sid) = &telephony.account_sid {
                self.twilio_account_sid = Some(sid.clone());
            }
            if let Some(token) = &telephony.auth_token {
                self.twilio_auth_token = Some(token.clone());
            }
        }

        if let Some(cache) = &yaml.cache {
            if let Some(path) = &cache.path {
                self.cache_path = PathBuf::from(path);
            }
            if let Some(path) = &cache.spool_path {
                self.spool_path = PathBuf::from(path);
            }
        }

        if let Some(security) = &yaml.security {
            if let Some(origins) = &security.cors_allowed_origins {
                self.cors_allowed_origins = Some(origins.clone());
            }
            if let Some(rps) = security.rate_limit_requests_per_second {
                self.rate_limit_requests_per_second = rps;
            }
            if let Some(burst) = security.rate_limit_burst_size {
                self.rate_limit_burst_size = burst;
            }
            if let Some(max) = security.max_websocket_connections {
                self.max_websocket_connections = Some(max);
            }
            if let Some(max) = security.max_connections_per_ip {
                self.max_connections_per_ip = max;
            }
        }

        if let Some(call) = &yaml.call {
            self.tuning.apply_yaml(call);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_requests_per_second == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit_requests_per_second must be greater than 0".to_string(),
            ));
        }
        if self.rate_limit_burst_size == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit_burst_size must be greater than 0".to_string(),
            ));
        }
        if let Some(url) = &self.public_url {
            Url::parse(url)
                .map_err(|e| ConfigError::Invalid(format!("invalid public_url {url}: {e}")))?;
        }
        Ok(())
    }

    /// Get the server address as a string in the format "host:port".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled.
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// The websocket URL the telephony provider should stream call media to.
    ///
    /// Derived from `public_url` by swapping the scheme to ws/wss and
    /// appending the stream path.
    pub fn media_stream_url(&self) -> Option<String> {
        let base = self.public_url.as_ref()?;
        let mut url = Url::parse(base).ok()?;
        let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
        url.set_scheme(scheme).ok()?;
        url.set_path("/stream");
        Some(url.to_string())
    }

    /// Get API key for a specific provider.
    ///
    /// # Arguments
    /// * `provider` - The name of the provider (e.g., "openai", "elevenlabs")
    pub fn get_api_key(&self, provider: &str) -> Result<String, String> {
        match provider.to_lowercase().as_str() {
            "openai" | "whisper" | "openai-whisper" => self
                .openai_api_key
                .as_ref()
                .cloned()
                .ok_or_else(|| "OpenAI API key not configured in server environment".to_string()),
            "elevenlabs" | "eleven-labs" | "eleven_labs" => {
                self.elevenlabs_api_key.as_ref().cloned().ok_or_else(|| {
                    "ElevenLabs API key not configured in server environment".to_string()
                })
            }
            _ => Err(format!("Unsupported provider: {provider}")),
        }
    }
}

/// Read an environment variable, treating empty values as unset.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Read and parse an environment variable, warning on malformed values.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable environment variable");
            None
        }
    }
}

#[cfg(test)]
impl ServerConfig {
    /// Baseline configuration for unit tests, built without touching the
    /// process environment. No secrets, no backends, default tuning.
    pub(crate) fn for_tests() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            public_url: None,
            tls: None,
            stt_provider: "openai".to_string(),
            tts_provider: "elevenlabs".to_string(),
            tts_voice: Some("nicolas".to_string()),
            llm_model: "gpt-4o-mini".to_string(),
            openai_api_key: None,
            elevenlabs_api_key: None,
            rag_base_url: None,
            rag_api_key: None,
            crm_base_url: None,
            crm_api_token: None,
            crm_owner_id: None,
            crm_owner_name: None,
            twilio_account_sid: None,
            twilio_auth_token: None,
            cache_path: PathBuf::from("cache/audio"),
            spool_path: std::env::temp_dir().join("callbot-utterances"),
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
            tuning: CallTuning::default(),
            business_hours: BusinessHoursConfig::default(),
        }
    }
}
