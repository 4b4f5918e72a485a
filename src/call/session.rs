//! One call from socket upgrade to hangup.
//!
//! The session splits the socket, waits for the provider's `start` frame,
//! then runs two things side by side: the frame loop (media, marks, stop)
//! and at most one agent turn at a time, spawned as its own task. Keeping
//! the frame loop free while the graph thinks is what makes barge-in work:
//! caller audio keeps flowing through the incoming manager, which can trip
//! the interrupt flag and clear the outgoing queue while the turn is still
//! streaming its answer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::agents::phrases;
use crate::agents::{AgentGraph, ConversationState, SpeakSink, TurnOutcome};
use crate::core::rag::InterruptFlag;
use crate::handlers::stream::messages::{InboundEvent, OutboundEvent, StartFrame};
use crate::state::{ActiveCall, AppState};

use super::incoming::{FrameOutcome, IncomingAudioManager};
use super::outgoing::OutgoingManager;
use super::{StreamTransport, TransportError};

/// How long the provider gets to send its `start` frame.
const START_DEADLINE: Duration = Duration::from_secs(10);

/// Call dropped when no frame at all arrives for this long. The provider
/// streams continuously, silence included, so this only trips on a dead
/// transport, never on a quiet caller.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Ceiling on waiting for farewell audio to play out.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Beat of silence after the last farewell phrase, so the hangup does not
/// clip its tail.
const FAREWELL_PAUSE: Duration = Duration::from_millis(400);

/// Caller phone used when the TwiML passed none through.
const ANONYMOUS_CALLER: &str = "anonyme";

// =============================================================================
// Socket Transport
// =============================================================================

/// Writer half of the media socket, shared between the pacing worker and
/// the session's own close path.
pub struct WsTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait::async_trait]
impl StreamTransport for WsTransport {
    async fn send_event(&self, event: OutboundEvent) -> Result<(), TransportError> {
        let json = serde_json::to_string(&event).map_err(|e| TransportError::Send(e.to_string()))?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(json.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(None))
            .await
            .map_err(|_| TransportError::Closed)
    }
}

// =============================================================================
// Session
// =============================================================================

/// Why the session loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    /// The agent graph reached its goodbye.
    AgentEnded,
    /// The caller stayed silent past the hangup threshold.
    SilenceHangup,
    /// The provider sent `stop`; the call is already over.
    ProviderStop,
    /// The peer closed the socket or the stream ended.
    PeerClosed,
    /// The socket failed mid-call.
    ReceiveError,
    /// No frames at all arrived within [`IDLE_TIMEOUT`].
    IdleTimeout,
    /// A turn task died or the conversation state was lost.
    TurnAborted,
}

/// State of one live call.
///
/// Owns both audio managers and the conversation, and keeps at most one
/// agent turn in flight as a spawned task. The conversation state travels
/// into the task and comes back with the outcome, so between turns exactly
/// one of `conversation` and `turn` is populated.
pub struct CallSession {
    app: Arc<AppState>,
    graph: Arc<AgentGraph>,
    call_sid: String,
    caller_phone: String,
    started: Instant,
    transport: Arc<dyn StreamTransport>,
    outgoing: Arc<OutgoingManager>,
    incoming: IncomingAudioManager,
    interrupt: InterruptFlag,
    conversation: Option<ConversationState>,
    turn: Option<JoinHandle<(ConversationState, TurnOutcome)>>,
}

impl CallSession {
    /// Drive one upgraded socket through its whole call.
    pub async fn run(socket: WebSocket, app: Arc<AppState>) {
        let (sink, mut receiver) = socket.split();
        let transport = Arc::new(WsTransport::new(sink));

        let Some(start) = await_start(&mut receiver).await else {
            debug!("Stream ended before start, nothing to do");
            close_quietly(transport.as_ref()).await;
            return;
        };

        // The only fatal per-call condition: without the graph there is
        // nobody to talk to, so the call is refused outright.
        let Some(graph) = app.graph.clone() else {
            error!(
                call_sid = %start.call_sid,
                "Agent graph not initialized, refusing the call"
            );
            close_quietly(transport.as_ref()).await;
            return;
        };

        let caller_phone = start
            .caller_phone()
            .unwrap_or(ANONYMOUS_CALLER)
            .to_string();
        let call_sid = start.call_sid;
        let stream_sid = start.stream_sid;

        info!(
            call_sid = %call_sid,
            stream_sid = %stream_sid,
            caller = %caller_phone,
            "Call started"
        );

        let outgoing = Arc::new(OutgoingManager::start(
            stream_sid.clone(),
            transport.clone(),
            app.tts.clone(),
            app.cache.clone(),
            &app.config.tuning,
        ));

        let interrupt = InterruptFlag::new();
        let incoming = match IncomingAudioManager::new(
            call_sid.clone(),
            app.config.tuning.clone(),
            app.config.spool_path.clone(),
            app.stt.clone(),
            Arc::clone(&outgoing),
            interrupt.clone(),
        ) {
            Ok(incoming) => incoming,
            Err(e) => {
                error!(
                    call_sid = %call_sid,
                    error = %e,
                    "Voice detector init failed, refusing the call"
                );
                outgoing.shutdown().await;
                close_quietly(transport.as_ref()).await;
                return;
            }
        };

        app.register_call(
            &call_sid,
            ActiveCall {
                stream_sid,
                caller_phone: caller_phone.clone(),
                started_at: Instant::now(),
            },
        );

        let mut session = CallSession {
            app,
            graph,
            call_sid: call_sid.clone(),
            caller_phone,
            started: Instant::now(),
            transport,
            outgoing,
            incoming,
            interrupt,
            conversation: None,
            turn: None,
        };

        // Greeting turn. Frame processing starts at the same time, so the
        // caller can barge into the welcome like into any other speech.
        let bootstrap = ConversationState::new(&session.call_sid, &session.caller_phone);
        session.spawn_turn(bootstrap);

        let reason = session.drive(&mut receiver).await;
        session.finish(reason).await;
    }

    /// Main loop: frames in, turns out, until something ends the call.
    async fn drive<S>(&mut self, receiver: &mut S) -> EndReason
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        let mut idle_deadline = time::Instant::now() + IDLE_TIMEOUT;
        loop {
            tokio::select! {
                biased;

                finished = poll_turn(&mut self.turn), if self.turn.is_some() => {
                    match finished {
                        Ok((state, outcome)) => {
                            self.conversation = Some(state);
                            if outcome.end_call {
                                return EndReason::AgentEnded;
                            }
                        }
                        Err(e) => {
                            error!(call_sid = %self.call_sid, error = %e, "Turn task died");
                            return EndReason::TurnAborted;
                        }
                    }
                }

                frame = receiver.next() => {
                    idle_deadline = time::Instant::now() + IDLE_TIMEOUT;
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reason) = self.handle_frame(&text).await {
                                return reason;
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            debug!(call_sid = %self.call_sid, "Peer closed the socket");
                            return EndReason::PeerClosed;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(call_sid = %self.call_sid, error = %e, "Socket receive error");
                            return EndReason::ReceiveError;
                        }
                        None => return EndReason::PeerClosed,
                    }
                }

                _ = time::sleep_until(idle_deadline) => {
                    warn!(
                        call_sid = %self.call_sid,
                        "No frames from the provider, dropping the call"
                    );
                    return EndReason::IdleTimeout;
                }
            }
        }
    }

    /// Dispatch one text frame. `Some` ends the loop.
    async fn handle_frame(&mut self, text: &str) -> Option<EndReason> {
        let event = match serde_json::from_str::<InboundEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(call_sid = %self.call_sid, error = %e, "Unparseable frame skipped");
                return None;
            }
        };

        match event {
            InboundEvent::Media { media } => {
                match self.incoming.process_media(&media.payload).await {
                    FrameOutcome::Continue => None,
                    FrameOutcome::Transcript(transcript) => {
                        self.handle_transcript(transcript).await
                    }
                    FrameOutcome::Hangup => Some(EndReason::SilenceHangup),
                }
            }
            InboundEvent::Mark { mark } => {
                debug!(call_sid = %self.call_sid, mark = %mark.name, "Playback mark returned");
                None
            }
            InboundEvent::Stop => {
                info!(call_sid = %self.call_sid, "Provider stopped the stream");
                Some(EndReason::ProviderStop)
            }
            InboundEvent::Connected | InboundEvent::Start { .. } => {
                debug!(call_sid = %self.call_sid, "Control frame out of sequence, skipped");
                None
            }
            InboundEvent::Other => {
                debug!(call_sid = %self.call_sid, "Unknown frame skipped");
                None
            }
        }
    }

    /// Route a recognized utterance into the next agent turn.
    async fn handle_transcript(&mut self, transcript: String) -> Option<EndReason> {
        // A turn still running at this point was barged into; let it unwind
        // before routing the new input.
        let mut state = match self.turn.take() {
            Some(join) => match join.await {
                Ok((state, outcome)) => {
                    if outcome.end_call {
                        return Some(EndReason::AgentEnded);
                    }
                    state
                }
                Err(e) => {
                    error!(call_sid = %self.call_sid, error = %e, "Turn task died");
                    return Some(EndReason::TurnAborted);
                }
            },
            None => match self.conversation.take() {
                Some(state) => state,
                None => {
                    error!(call_sid = %self.call_sid, "Conversation state lost");
                    return Some(EndReason::TurnAborted);
                }
            },
        };

        // Clear any barge-in interrupt from the utterance that produced this
        // transcript; the new answer must not start life interrupted.
        self.interrupt.reset();
        state.user_input = Some(transcript);
        self.spawn_turn(state);
        None
    }

    /// Run one graph turn as its own task so frames keep flowing meanwhile.
    fn spawn_turn(&mut self, mut state: ConversationState) {
        let graph = Arc::clone(&self.graph);
        let sink = Arc::clone(&self.outgoing);
        let interrupt = self.interrupt.clone();
        self.turn = Some(tokio::spawn(async move {
            let outcome = graph.run_turn(&mut state, &*sink, &interrupt).await;
            (state, outcome)
        }));
    }

    /// Tear the call down: farewell where one is owed, provider-side hangup
    /// where the call may still be alive, then transport and bookkeeping.
    async fn finish(mut self, reason: EndReason) {
        if let Some(join) = self.turn.take() {
            join.abort();
        }

        match reason {
            EndReason::AgentEnded | EndReason::SilenceHangup | EndReason::TurnAborted => {
                self.outgoing.set_interruptible(false);
                match reason {
                    // The graph speaks its own goodbye before setting end_call.
                    EndReason::SilenceHangup => {
                        self.outgoing.enqueue_text(phrases::GOODBYE).await;
                    }
                    EndReason::TurnAborted => {
                        self.outgoing.enqueue_text(phrases::TECHNICAL_ERROR).await;
                    }
                    _ => {}
                }
                self.outgoing.enqueue_pause(FAREWELL_PAUSE).await;
                if !self.outgoing.await_drained(DRAIN_TIMEOUT).await {
                    warn!(call_sid = %self.call_sid, "Farewell audio did not drain in time");
                }
                self.end_call_remote().await;
            }
            EndReason::IdleTimeout => {
                // The socket looks dead but the phone call may not be.
                self.end_call_remote().await;
            }
            EndReason::ProviderStop | EndReason::PeerClosed | EndReason::ReceiveError => {}
        }

        close_quietly(self.transport.as_ref()).await;
        self.outgoing.shutdown().await;
        self.app.deregister_call(&self.call_sid);

        let history_turns = self
            .conversation
            .as_ref()
            .map(|state| state.history.len())
            .unwrap_or(0);
        info!(
            call_sid = %self.call_sid,
            reason = ?reason,
            duration_secs = self.started.elapsed().as_secs(),
            history_turns,
            "Call ended"
        );
    }

    async fn end_call_remote(&self) {
        if let Err(e) = self.app.call_control.end_call(&self.call_sid).await {
            warn!(call_sid = %self.call_sid, error = %e, "Provider-side hangup failed");
        }
    }
}

/// Await the in-flight turn. Pends forever when none is running, so it can
/// sit in a `select!` behind an `is_some` guard.
async fn poll_turn(
    turn: &mut Option<JoinHandle<(ConversationState, TurnOutcome)>>,
) -> Result<(ConversationState, TurnOutcome), tokio::task::JoinError> {
    match turn.as_mut() {
        Some(join) => {
            let result = join.await;
            *turn = None;
            result
        }
        None => std::future::pending().await,
    }
}

/// Read frames until the `start` event arrives.
///
/// Returns `None` when the peer closes, errors out, or the deadline passes
/// first.
async fn await_start<S>(receiver: &mut S) -> Option<StartFrame>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let wait = time::timeout(START_DEADLINE, async {
        while let Some(frame) = receiver.next().await {
            let message = match frame {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Socket error before start");
                    return None;
                }
            };
            match message {
                Message::Text(text) => match serde_json::from_str::<InboundEvent>(&text) {
                    Ok(InboundEvent::Start { start }) => return Some(start),
                    Ok(InboundEvent::Connected) => debug!("Media stream connected"),
                    Ok(InboundEvent::Stop) => return None,
                    Ok(_) => debug!("Frame before start skipped"),
                    Err(e) => debug!(error = %e, "Unparseable frame before start"),
                },
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    })
    .await;

    match wait {
        Ok(start) => start,
        Err(_) => {
            warn!("No start frame within {START_DEADLINE:?}");
            None
        }
    }
}

async fn close_quietly(transport: &dyn StreamTransport) {
    if let Err(e) = transport.close().await {
        debug!(error = %e, "Socket close failed");
    }
}

// =============================================================================
// Tests
// =============================================================================
