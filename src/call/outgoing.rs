//! Outbound speech queue and pacing worker.
//!
//! Synthesized phrases are chunked into short mu-law pieces and fed to the
//! media stream by a single worker task. The worker paces itself so the
//! provider buffers at most one chunk ahead of playback; that is what makes
//! a barge-in effective, because [`OutgoingManager::clear_queue`] can only
//! silence audio that has not left the orchestrator yet.
//!
//! The phrase text rides on the first chunk of each phrase. Draining the
//! queue therefore returns the text of every phrase whose playback had not
//! begun, which the capture-and-restore path on the incoming side relies on.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agents::SpeakSink;
use crate::agents::phrases;
use crate::config::CallTuning;
use crate::core::audio::{TELEPHONY_SAMPLE_RATE, TELEPHONY_SAMPLE_WIDTH};
use crate::core::cache::AudioCache;
use crate::core::tts::BaseTTS;
use crate::handlers::stream::messages::OutboundEvent;

use super::StreamTransport;

/// Bytes of mu-law audio per queue item (500 ms at 8 kHz).
const CHUNK_BYTES: usize = 4_000;

/// Consecutive send failures before transmission tracking restarts.
const SEND_ERROR_LIMIT: u32 = 3;

/// Tracking restarts before the worker gives up on the transport.
const RESTART_LIMIT: u32 = 3;

/// Base backoff after a failed send, multiplied by the failure streak.
const ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// Poll interval used by [`OutgoingManager::await_drained`].
const DRAIN_POLL: Duration = Duration::from_millis(50);

// =============================================================================
// Queue items
// =============================================================================

/// One unit of work for the pacing worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingItem {
    /// A chunk of mu-law audio. `text` is set on the first chunk of a phrase.
    Speech {
        text: Option<String>,
        audio: Vec<u8>,
    },
    /// Playback marker sent after the last chunk of a phrase.
    Mark { name: String },
    /// Deliberate beat of silence between phrases.
    Pause { duration: Duration },
}

// =============================================================================
// Shared state
// =============================================================================

struct SharedState {
    queue: Mutex<VecDeque<OutgoingItem>>,
    /// Wakes the worker when items arrive.
    work: Notify,
    /// Wakes producers waiting below the high-water mark.
    space: Notify,
    /// True while the worker is handling a popped item.
    transmitting: AtomicBool,
    /// Whether a barge-in is currently allowed to clear the queue.
    interruptible: AtomicBool,
    /// Set when the worker has given up; enqueues become no-ops.
    stopped: AtomicBool,
}

impl SharedState {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            work: Notify::new(),
            space: Notify::new(),
            transmitting: AtomicBool::new(false),
            interruptible: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Producer-facing handle over the outbound queue and its worker.
pub struct OutgoingManager {
    shared: Arc<SharedState>,
    cache: Arc<AudioCache>,
    tts: Arc<dyn BaseTTS>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    high_water: usize,
    phrase_counter: AtomicU64,
}

impl OutgoingManager {
    /// Spawn the pacing worker for one call and return the handle.
    pub fn start(
        stream_sid: impl Into<String>,
        transport: Arc<dyn StreamTransport>,
        tts: Arc<dyn BaseTTS>,
        cache: Arc<AudioCache>,
        tuning: &CallTuning,
    ) -> Self {
        let shared = Arc::new(SharedState::new());
        let cancel = CancellationToken::new();

        let worker = Worker {
            shared: Arc::clone(&shared),
            transport,
            stream_sid: stream_sid.into(),
            overlap: Duration::from_millis(tuning.pacing_overlap_ms),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(worker.run());

        Self {
            shared,
            cache,
            tts,
            cancel,
            worker: Mutex::new(Some(handle)),
            high_water: tuning.outgoing_queue_high_water,
            phrase_counter: AtomicU64::new(0),
        }
    }

    /// Queue a phrase for the caller.
    ///
    /// The audio comes from the phrase cache when the exact text is known;
    /// otherwise it is synthesized and cached as a runtime entry. A failed
    /// synthesis degrades to the cached technical-error phrase, or silence
    /// when even that is absent.
    pub async fn enqueue_text(&self, text: &str) {
        if self.shared.is_stopped() {
            debug!(text, "Transmission stopped, dropping phrase");
            return;
        }

        let audio = match self.cache.get(text).await {
            Some(audio) => audio,
            None => match self.tts.synthesize_speech_to_bytes(text).await {
                Ok(audio) => {
                    if let Err(e) = self.cache.insert_runtime(text, &audio).await {
                        warn!(error = %e, "Failed to cache synthesized phrase");
                    }
                    audio
                }
                Err(e) => {
                    warn!(error = %e, text, "Synthesis failed, falling back to the error phrase");
                    match self.cache.get(phrases::TECHNICAL_ERROR).await {
                        Some(audio) => {
                            self.enqueue_speech(phrases::TECHNICAL_ERROR, audio).await;
                        }
                        None => {
                            error!("Error phrase missing from cache, staying silent");
                        }
                    }
                    return;
                }
            },
        };

        self.enqueue_speech(text, audio).await;
    }

    /// Queue a beat of silence between phrases.
    pub async fn enqueue_pause(&self, duration: Duration) {
        if self.shared.is_stopped() {
            return;
        }
        self.wait_for_space().await;
        self.shared.queue.lock().push_back(OutgoingItem::Pause { duration });
        self.shared.work.notify_one();
    }

    /// Chunk a synthesized phrase onto the queue, text on the first chunk,
    /// a mark after the last.
    async fn enqueue_speech(&self, text: &str, audio: Vec<u8>) {
        if audio.is_empty() {
            debug!(text, "Skipping phrase with empty audio");
            return;
        }

        self.wait_for_space().await;

        let mark = format!("phrase-{}", self.phrase_counter.fetch_add(1, Ordering::SeqCst));
        let mut queue = self.shared.queue.lock();
        for (i, chunk) in audio.chunks(CHUNK_BYTES).enumerate() {
            queue.push_back(OutgoingItem::Speech {
                text: (i == 0).then(|| text.to_string()),
                audio: chunk.to_vec(),
            });
        }
        queue.push_back(OutgoingItem::Mark { name: mark });
        drop(queue);

        self.shared.work.notify_one();
    }

    /// Cooperatively wait until the queue is below the high-water mark.
    async fn wait_for_space(&self) {
        loop {
            let notified = self.shared.space.notified();
            if self.shared.queue.lock().len() < self.high_water || self.shared.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    /// Atomically drain the queue and return the text of every phrase whose
    /// playback had not begun, in queue order, joined with spaces.
    pub fn clear_queue(&self) -> String {
        let removed: Vec<OutgoingItem> = {
            let mut queue = self.shared.queue.lock();
            queue.drain(..).collect()
        };
        self.shared.space.notify_waiters();

        let texts: Vec<&str> = removed
            .iter()
            .filter_map(|item| match item {
                OutgoingItem::Speech { text: Some(text), .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();

        if !removed.is_empty() {
            debug!(items = removed.len(), phrases = texts.len(), "Outbound queue cleared");
        }
        texts.join(" ")
    }

    /// Whether audio is being transmitted or still waiting in the queue.
    pub fn is_sending(&self) -> bool {
        self.shared.transmitting.load(Ordering::SeqCst) || !self.shared.queue.lock().is_empty()
    }

    /// Whether any queued phrase still carries its text.
    pub fn has_text_to_be_sent(&self) -> bool {
        self.shared
            .queue
            .lock()
            .iter()
            .any(|item| matches!(item, OutgoingItem::Speech { text: Some(_), .. }))
    }

    /// Whether a barge-in may clear the current speech.
    pub fn can_speech_be_interrupted(&self) -> bool {
        self.shared.interruptible.load(Ordering::SeqCst)
    }

    /// The worker gave up on the transport.
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Poll until all queued audio has been handed to the transport, up to
    /// `timeout`. Returns false when audio was still pending at the deadline.
    pub async fn await_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.is_stopped() || !self.is_sending() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }

    /// Cancel the worker and wait for it to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.shared.space.notify_waiters();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Outgoing worker did not shut down cleanly");
            }
        }
    }
}

#[async_trait]
impl SpeakSink for OutgoingManager {
    async fn say(&self, text: &str) {
        self.enqueue_text(text).await;
    }

    fn set_interruptible(&self, interruptible: bool) {
        self.shared.interruptible.store(interruptible, Ordering::SeqCst);
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Worker {
    shared: Arc<SharedState>,
    transport: Arc<dyn StreamTransport>,
    stream_sid: String,
    overlap: Duration,
    cancel: CancellationToken,
}

/// Pacing trackers, reset whenever transmission tracking restarts.
#[derive(Default)]
struct PacingState {
    last_send: Option<Instant>,
    last_duration: Duration,
    consecutive_errors: u32,
    restarts: u32,
}

impl Worker {
    async fn run(self) {
        let mut pacing = PacingState::default();

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let item = self.shared.queue.lock().pop_front();
            let Some(item) = item else {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = self.shared.work.notified() => continue,
                }
            };

            self.shared.transmitting.store(true, Ordering::SeqCst);
            let keep_going = self.handle_item(item, &mut pacing).await;
            self.shared.transmitting.store(false, Ordering::SeqCst);
            self.shared.space.notify_waiters();

            if !keep_going {
                self.shared.stopped.store(true, Ordering::SeqCst);
                self.shared.space.notify_waiters();
                error!(
                    stream_sid = %self.stream_sid,
                    "Media transport unusable, transmission stopped"
                );
                return;
            }
        }
    }

    /// Process one item. Returns false when the transport is given up on.
    async fn handle_item(&self, item: OutgoingItem, pacing: &mut PacingState) -> bool {
        match item {
            OutgoingItem::Speech { audio, .. } => {
                // Hold until the previous chunk has nearly played out, so
                // the provider never sits on more than one chunk of audio.
                if let Some(last_send) = pacing.last_send {
                    if let Some(deadline) = (last_send + pacing.last_duration).checked_sub(self.overlap)
                    {
                        tokio::select! {
                            _ = self.cancel.cancelled() => return true,
                            _ = tokio::time::sleep_until(deadline) => {}
                        }
                    }
                }

                let duration = Duration::from_secs_f64(
                    audio.len() as f64
                        / (TELEPHONY_SAMPLE_RATE * TELEPHONY_SAMPLE_WIDTH) as f64,
                );
                let event = OutboundEvent::media(self.stream_sid.clone(), BASE64.encode(&audio));

                match self.transport.send_event(event).await {
                    Ok(()) => {
                        pacing.last_send = Some(Instant::now());
                        pacing.last_duration = duration;
                        pacing.consecutive_errors = 0;
                        true
                    }
                    Err(e) => self.note_send_failure(e, pacing).await,
                }
            }

            OutgoingItem::Mark { name } => {
                // Marks queue in-band provider-side; they neither wait for
                // pacing nor contribute playback time to it.
                let event = OutboundEvent::mark(self.stream_sid.clone(), name);
                match self.transport.send_event(event).await {
                    Ok(()) => {
                        pacing.consecutive_errors = 0;
                        true
                    }
                    Err(e) => self.note_send_failure(e, pacing).await,
                }
            }

            OutgoingItem::Pause { duration } => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(duration) => {}
                }
                true
            }
        }
    }

    /// Record a failed send. Returns false once the restart budget is spent.
    async fn note_send_failure(&self, error: super::TransportError, pacing: &mut PacingState) -> bool {
        pacing.consecutive_errors += 1;
        warn!(
            error = %error,
            streak = pacing.consecutive_errors,
            "Failed to send media frame"
        );

        let backoff = ERROR_BACKOFF * pacing.consecutive_errors;
        tokio::select! {
            _ = self.cancel.cancelled() => return true,
            _ = tokio::time::sleep(backoff) => {}
        }

        if pacing.consecutive_errors >= SEND_ERROR_LIMIT {
            pacing.restarts += 1;
            pacing.consecutive_errors = 0;
            pacing.last_send = None;
            pacing.last_duration = Duration::ZERO;

            if pacing.restarts >= RESTART_LIMIT {
                return false;
            }
            info!(restarts = pacing.restarts, "Restarting transmission tracking");
        }
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
