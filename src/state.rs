//! Shared application state.
//!
//! One [`AppState`] is built at startup and handed to every handler through
//! axum's `State` extractor. It owns the provider clients, the pregenerated
//! audio cache, the conversation graph, and two pieces of live bookkeeping:
//! the registry of calls currently on the line and the WebSocket connection
//! counters the admission middleware checks before an upgrade.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::agents::AgentGraph;
use crate::config::ServerConfig;
use crate::core::cache::AudioCache;
use crate::core::stt::BaseSTT;
use crate::core::telephony::CallControl;
use crate::core::tts::BaseTTS;

// =============================================================================
// Errors
// =============================================================================

/// Reasons a WebSocket upgrade is refused before it starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionLimitError {
    /// The server-wide connection ceiling is reached.
    #[error("maximum concurrent WebSocket connections reached")]
    GlobalLimitReached,

    /// This client address already holds its maximum number of connections.
    #[error("maximum WebSocket connections for this address reached")]
    PerIpLimitReached,
}

// =============================================================================
// Connection Limits
// =============================================================================

/// WebSocket admission accounting with a global and a per-address ceiling.
///
/// A slot is reserved with [`try_acquire`](Self::try_acquire) before the
/// upgrade completes and returned with [`release`](Self::release) when the
/// stream ends, whichever way it ends.
#[derive(Debug)]
pub struct ConnectionLimits {
    max_total: Option<usize>,
    max_per_ip: u32,
    total: AtomicUsize,
    per_ip: DashMap<IpAddr, usize>,
}

impl ConnectionLimits {
    pub fn new(max_total: Option<usize>, max_per_ip: u32) -> Self {
        Self {
            max_total,
            max_per_ip,
            total: AtomicUsize::new(0),
            per_ip: DashMap::new(),
        }
    }

    /// Reserve a connection slot for `ip`.
    ///
    /// The global counter is reserved first and rolled back if the
    /// per-address check fails, so concurrent acquires never overshoot
    /// either ceiling.
    pub fn try_acquire(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let previous = self.total.fetch_add(1, Ordering::SeqCst);
        if let Some(max) = self.max_total {
            if previous >= max {
                self.total.fetch_sub(1, Ordering::SeqCst);
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        }

        let mut count = self.per_ip.entry(ip).or_insert(0);
        if *count >= self.max_per_ip as usize {
            drop(count);
            self.per_ip.remove_if(&ip, |_, c| *c == 0);
            self.total.fetch_sub(1, Ordering::SeqCst);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *count += 1;
        Ok(())
    }

    /// Return a slot reserved by [`try_acquire`](Self::try_acquire).
    ///
    /// A release with no matching acquire is logged and ignored rather than
    /// corrupting the counters.
    pub fn release(&self, ip: IpAddr) {
        let mut released = false;
        if let Some(mut count) = self.per_ip.get_mut(&ip) {
            if *count > 0 {
                *count -= 1;
                released = true;
            }
        }
        if !released {
            warn!(client_ip = %ip, "Connection release without a matching acquire");
            return;
        }
        self.per_ip.remove_if(&ip, |_, count| *count == 0);
        self.total.fetch_sub(1, Ordering::SeqCst);
    }

    /// Connections currently held across all addresses.
    pub fn total_count(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Connections currently held by one address.
    pub fn count_for_ip(&self, ip: &IpAddr) -> usize {
        self.per_ip.get(ip).map(|count| *count).unwrap_or(0)
    }
}

// =============================================================================
// Call Registry
// =============================================================================

/// Bookkeeping for one call currently on the line.
#[derive(Debug, Clone)]
pub struct ActiveCall {
    pub stream_sid: String,
    pub caller_phone: String,
    pub started_at: Instant,
}

// =============================================================================
// App State
// =============================================================================

/// Everything the handlers share.
pub struct AppState {
    pub config: ServerConfig,
    pub stt: Arc<dyn BaseSTT>,
    pub tts: Arc<dyn BaseTTS>,
    pub cache: Arc<AudioCache>,
    /// Conversation engine, absent when the LLM provider is not configured.
    /// Streams arriving without it are refused at call start.
    pub graph: Option<Arc<AgentGraph>>,
    pub call_control: Arc<dyn CallControl>,
    calls: DashMap<String, ActiveCall>,
    limits: ConnectionLimits,
}

impl AppState {
    /// Assemble the state from already-built components.
    ///
    /// Provider construction lives in [`crate::init::build_state`]; tests
    /// call this directly with fakes.
    pub fn from_parts(
        config: ServerConfig,
        stt: Arc<dyn BaseSTT>,
        tts: Arc<dyn BaseTTS>,
        cache: Arc<AudioCache>,
        graph: Option<Arc<AgentGraph>>,
        call_control: Arc<dyn CallControl>,
    ) -> Arc<Self> {
        let limits = ConnectionLimits::new(
            config.max_websocket_connections,
            config.max_connections_per_ip,
        );
        Arc::new(Self {
            config,
            stt,
            tts,
            cache,
            graph,
            call_control,
            calls: DashMap::new(),
            limits,
        })
    }

    // ----- call registry -----

    /// Record a call when its stream starts.
    pub fn register_call(&self, call_sid: &str, call: ActiveCall) {
        self.calls.insert(call_sid.to_string(), call);
        info!(call_sid, active_calls = self.calls.len(), "Call registered");
    }

    /// Drop a call when its stream ends, returning its record when known.
    pub fn deregister_call(&self, call_sid: &str) -> Option<ActiveCall> {
        let removed = self.calls.remove(call_sid).map(|(_, call)| call);
        if removed.is_some() {
            info!(
                call_sid,
                active_calls = self.calls.len(),
                "Call deregistered"
            );
        }
        removed
    }

    /// Number of calls currently on the line.
    pub fn active_call_count(&self) -> usize {
        self.calls.len()
    }

    // ----- connection admission -----

    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        self.limits.try_acquire(ip)
    }

    pub fn release_connection(&self, ip: IpAddr) {
        self.limits.release(ip)
    }

    pub fn ws_connection_count(&self) -> usize {
        self.limits.total_count()
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.limits.count_for_ip(ip)
    }
}

// =============================================================================
// Tests
// =============================================================================
