//! Server startup wiring.
//!
//! Builds every long-lived component from a [`ServerConfig`] and hands back
//! the shared [`AppState`]: speech providers, the pregenerated audio cache,
//! the agent graph with its RAG and CRM backends, and provider-side call
//! control. Missing backends degrade rather than abort: without a CRM the
//! bot runs anonymously and refuses bookings, without a RAG service course
//! questions get the spoken error phrase. Only the LLM is indispensable;
//! without it no graph is built and every call is refused at the start
//! frame.
//!
//! This module also hosts the `warm-cache` CLI command, which synthesizes
//! the static phrase catalog into the on-disk cache ahead of deployment:
//!
//! ```text
//! $ callbot --config config.yaml warm-cache
//! ```

use std::sync::Arc;

use tracing::{info, warn};

use crate::agents::phrases::pregenerated_catalog;
use crate::agents::{AgentDeps, AgentGraph};
use crate::config::ServerConfig;
use crate::core::cache::AudioCache;
use crate::core::crm::rest::RestCrmClient;
use crate::core::crm::{CalendarClient, CrmConfig, DirectoryClient, UnconfiguredCrm};
use crate::core::llm::{LLMConfig, create_llm_provider};
use crate::core::rag::http::HttpRagClient;
use crate::core::rag::{BaseRag, RagConfig, UnconfiguredRag};
use crate::core::stt::{BaseSTT, STTConfig, STTProvider, UnconfiguredStt, create_stt_provider_from_enum};
use crate::core::telephony::create_call_control;
use crate::core::tts::{BaseTTS, TTSConfig, TTSProvider, UnconfiguredTts, create_tts_provider_from_enum};
use crate::errors::AppResult;
use crate::state::AppState;

/// Spoken advisor name when none is configured.
const DEFAULT_OWNER_NAME: &str = "notre conseillère";

/// Build the shared application state from configuration.
///
/// Fails only on unusable provider configuration (an unknown provider
/// name) or an unwritable cache directory. Backend outages and missing
/// API keys surface later, per request, through the degraded paths.
pub async fn build_state(config: ServerConfig) -> AppResult<Arc<AppState>> {
    let stt = build_stt(&config)?;
    let tts = build_tts(&config)?;
    let cache = warm_audio_cache(&config, tts.as_ref()).await?;
    let graph = build_graph(&config);
    let call_control = create_call_control(
        config.twilio_account_sid.as_deref(),
        config.twilio_auth_token.as_deref(),
    );

    Ok(AppState::from_parts(
        config,
        stt,
        tts,
        cache,
        graph,
        call_control,
    ))
}

/// Body of the `warm-cache` CLI command.
///
/// Unlike the startup warm pass this propagates synthesis failures; the
/// point of running it ahead of deployment is to fail loudly.
pub async fn warm_cache(config: &ServerConfig) -> AppResult<()> {
    let tts = build_tts(config)?;
    let cache = AudioCache::open(&config.cache_path, tts.provider_name(), tts.voice()).await?;
    let report = cache.synchronize(&pregenerated_catalog(), tts.as_ref()).await?;
    info!(
        kept = report.kept,
        synthesized = report.synthesized,
        dropped = report.dropped_entries,
        removed = report.removed_files,
        path = %config.cache_path.display(),
        "Audio cache warmed"
    );
    Ok(())
}

fn build_stt(config: &ServerConfig) -> AppResult<Arc<dyn BaseSTT>> {
    // An unknown provider name is a deployment mistake and fails startup.
    // A known provider without its API key degrades to the stub.
    let provider: STTProvider = config.stt_provider.parse()?;
    let api_key = match config.get_api_key(&config.stt_provider) {
        Ok(key) => key,
        Err(reason) => {
            warn!(
                provider = %provider,
                %reason,
                "STT disabled; utterances will produce empty transcripts"
            );
            return Ok(Arc::new(UnconfiguredStt));
        }
    };

    let stt = create_stt_provider_from_enum(
        provider,
        STTConfig {
            api_key,
            ..Default::default()
        },
    )?;
    Ok(Arc::from(stt))
}

fn build_tts(config: &ServerConfig) -> AppResult<Arc<dyn BaseTTS>> {
    let provider: TTSProvider = config.tts_provider.parse()?;
    let api_key = match config.get_api_key(&config.tts_provider) {
        Ok(key) => key,
        Err(reason) => {
            warn!(
                provider = %provider,
                %reason,
                "TTS disabled; only phrases already in the audio cache will play"
            );
            return Ok(Arc::new(UnconfiguredTts));
        }
    };

    let tts = create_tts_provider_from_enum(
        provider,
        TTSConfig {
            api_key,
            voice_id: config.tts_voice.clone(),
            ..Default::default()
        },
    )?;
    Ok(Arc::from(tts))
}

/// Assemble the conversation graph, or `None` when no LLM is available.
fn build_graph(config: &ServerConfig) -> Option<Arc<AgentGraph>> {
    let Some(api_key) = config.openai_api_key.clone() else {
        warn!("OPENAI_API_KEY is not set; the agent graph is disabled and calls will be refused");
        return None;
    };

    let llm = match create_llm_provider(
        "openai",
        LLMConfig {
            api_key,
            model: config.llm_model.clone(),
            ..Default::default()
        },
    ) {
        Ok(llm) => Arc::from(llm),
        Err(error) => {
            warn!(%error, "LLM provider init failed; the agent graph is disabled");
            return None;
        }
    };

    let (calendar, directory) = build_crm(config);
    Some(Arc::new(AgentGraph::new(AgentDeps {
        llm,
        rag: build_rag(config),
        calendar,
        directory,
        business_hours: config.business_hours.clone(),
        owner_id: config.crm_owner_id.clone().unwrap_or_default(),
        owner_name: config
            .crm_owner_name
            .clone()
            .unwrap_or_else(|| DEFAULT_OWNER_NAME.to_string()),
    })))
}

fn build_rag(config: &ServerConfig) -> Arc<dyn BaseRag> {
    let Some(base_url) = config.rag_base_url.clone() else {
        info!("RAG_BASE_URL is not set; course questions will get the spoken error phrase");
        return Arc::new(UnconfiguredRag);
    };

    match HttpRagClient::new(RagConfig {
        base_url,
        api_key: config.rag_api_key.clone(),
    }) {
        Ok(client) => Arc::new(client),
        Err(error) => {
            warn!(%error, "RAG client init failed; continuing unconfigured");
            Arc::new(UnconfiguredRag)
        }
    }
}

fn build_crm(config: &ServerConfig) -> (Arc<dyn CalendarClient>, Arc<dyn DirectoryClient>) {
    let (Some(base_url), Some(api_token)) =
        (config.crm_base_url.clone(), config.crm_api_token.clone())
    else {
        info!("CRM is not configured; callers stay anonymous and bookings are refused");
        let stub = Arc::new(UnconfiguredCrm);
        return (stub.clone(), stub);
    };

    match RestCrmClient::new(CrmConfig {
        base_url,
        api_token,
    }) {
        Ok(client) => {
            let client = Arc::new(client);
            (client.clone(), client)
        }
        Err(error) => {
            warn!(%error, "CRM client init failed; continuing unconfigured");
            let stub = Arc::new(UnconfiguredCrm);
            (stub.clone(), stub)
        }
    }
}

/// Open the cache and reconcile it against the phrase catalog. Synthesis
/// failures leave the cache cold instead of blocking startup; missing
/// phrases are synthesized per call.
async fn warm_audio_cache(
    config: &ServerConfig,
    tts: &dyn BaseTTS,
) -> AppResult<Arc<AudioCache>> {
    let cache = AudioCache::open(&config.cache_path, tts.provider_name(), tts.voice()).await?;
    match cache.synchronize(&pregenerated_catalog(), tts).await {
        Ok(report) => info!(
            kept = report.kept,
            synthesized = report.synthesized,
            dropped = report.dropped_entries,
            removed = report.removed_files,
            "Audio cache ready"
        ),
        Err(error) => warn!(
            %error,
            "Audio cache warm-up incomplete; missing phrases will be synthesized per call"
        ),
    }
    Ok(Arc::new(cache))
}
