//! Conversation agents and the per-call dispatch graph.
//!
//! One [`AgentGraph`] is built at startup and shared by every call; all
//! per-call facts live in [`ConversationState`]. A turn enters the graph at
//! the router and walks an explicit transition table until a terminal node,
//! so cyclic routes are bounded by construction.
//!
//! # Architecture
//!
//! ```text
//! transcript ──> router ──┬─> conversation_start ─> init ─> identify ─> welcome
//!                         ├─> calendar_agent
//!                         ├─> rag_course_agent
//!                         ├─> lead_agent
//!                         └─> wait_for_user_input
//! ```

pub mod calendar;
pub mod conversation;
pub mod lead;
pub mod phrases;
pub mod rag_course;
pub mod router;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BusinessHoursConfig;
use crate::core::crm::{CalendarClient, CallerProfile, DirectoryClient};
use crate::core::llm::BaseLLM;
use crate::core::rag::{BaseRag, InterruptFlag};

/// Errors surfaced by the agent graph.
///
/// Graph nodes recover locally with spoken fallbacks instead of failing the
/// turn, so no variant is currently constructed; the enum exists so
/// `AppError` can wrap graph failures uniformly with the other subsystems.
#[derive(Debug, Error)]
pub enum GraphError {}

/// Hard ceiling on node transitions within one turn.
const MAX_HOPS: usize = 8;

// =============================================================================
// Conversation State
// =============================================================================

/// Who produced a history turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    /// Role string used by the RAG backend history API and in prompts.
    pub fn role(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        }
    }
}

/// One conversation turn as remembered locally.
#[derive(Debug, Clone)]
pub struct HistoryTurn {
    pub speaker: Speaker,
    pub text: String,
}

/// Everything one call accumulates across turns.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub call_id: String,
    pub caller_phone: String,
    pub history: Vec<HistoryTurn>,
    /// RAG backend conversation handle; present once bootstrap ran.
    pub conversation_id: Option<String>,
    /// RAG backend user handle.
    pub rag_user_id: Option<String>,
    /// What the CRM knows about the caller.
    pub caller_profile: Option<CallerProfile>,
    /// Id of the lead recorded during this call, if any.
    pub last_lead_status: Option<String>,
    /// Event id of an appointment booked during this call, if any.
    pub appointment_created: Option<String>,
    /// Transcript waiting to be routed this turn.
    pub user_input: Option<String>,
    /// Set by the node that decided the call is over.
    pub end_call: bool,
}

impl ConversationState {
    pub fn new(call_id: impl Into<String>, caller_phone: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            caller_phone: caller_phone.into(),
            ..Default::default()
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.history.push(HistoryTurn {
            speaker: Speaker::User,
            text: text.into(),
        });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.history.push(HistoryTurn {
            speaker: Speaker::Assistant,
            text: text.into(),
        });
    }

    /// History as "role: text" lines for prompt embedding.
    pub fn formatted_history(&self) -> String {
        self.history
            .iter()
            .map(|turn| format!("{}: {}", turn.speaker.role(), turn.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Facts a single turn needs, captured once at its start.
///
/// The advisor id and contact id travel with the turn instead of living in
/// shared agent state, so concurrent calls cannot observe each other's
/// values.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// CRM id of the advisor whose calendar is being booked.
    pub owner_id: String,
    /// CRM contact id of the caller, when identified.
    pub who_id: Option<String>,
    /// Wall clock the whole turn reasons against.
    pub now: DateTime<Utc>,
}

// =============================================================================
// Speech Sink
// =============================================================================

/// Outbound speech endpoint handed to graph nodes.
///
/// Implementations queue the text for synthesis and paced transmission.
/// Synthesis failures are absorbed downstream with a spoken fallback, so
/// nodes never see them.
#[async_trait]
pub trait SpeakSink: Send + Sync {
    /// Queue one sentence for speech.
    async fn say(&self, text: &str);

    /// Whether speech queued from now on may be cut short by the caller.
    fn set_interruptible(&self, interruptible: bool);
}

/// Say `text` and record it as an assistant turn.
pub(crate) async fn speak(state: &mut ConversationState, sink: &dyn SpeakSink, text: &str) {
    sink.say(text).await;
    state.push_assistant(text);
}

// =============================================================================
// Graph
// =============================================================================

/// Shared services and policy the graph nodes work against.
pub struct AgentDeps {
    pub llm: Arc<dyn BaseLLM>,
    pub rag: Arc<dyn BaseRag>,
    pub calendar: Arc<dyn CalendarClient>,
    pub directory: Arc<dyn DirectoryClient>,
    pub business_hours: BusinessHoursConfig,
    /// CRM id of the advisor whose calendar the bot books.
    pub owner_id: String,
    /// Advisor display name, injected into classification prompts.
    pub owner_name: String,
}

/// Nodes of the per-turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GraphNode {
    Router,
    ConversationStart,
    InitConversation,
    UserIdentification,
    ConversationStartEnd,
    WaitForUserInput,
    LeadAgent,
    CalendarAgent,
    RagCourseAgent,
    End,
}

/// What the session loop needs to know after a turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnOutcome {
    /// The conversation reached its goodbye; drain speech and hang up.
    pub end_call: bool,
}

/// Process-wide conversation graph, shared across calls.
pub struct AgentGraph {
    deps: AgentDeps,
}

impl AgentGraph {
    pub fn new(deps: AgentDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &AgentDeps {
        &self.deps
    }

    /// Run one turn.
    ///
    /// `state.user_input` carries the transcript to route, or `None` for the
    /// bootstrap turn triggered by the stream start. The input is consumed
    /// here; nodes receive it by argument.
    pub async fn run_turn(
        &self,
        state: &mut ConversationState,
        sink: &dyn SpeakSink,
        interrupt: &InterruptFlag,
    ) -> TurnOutcome {
        let input = state.user_input.take();
        if let Some(text) = &input {
            state.push_user(text.clone());
        }

        let ctx = CallContext {
            owner_id: self.deps.owner_id.clone(),
            who_id: state.caller_profile.as_ref().and_then(|p| p.who_id()),
            now: Utc::now(),
        };

        let mut node = GraphNode::Router;
        let mut hops = 0usize;
        while node != GraphNode::End {
            hops += 1;
            if hops > MAX_HOPS {
                warn!(call_id = %state.call_id, "graph transition limit reached, ending turn");
                break;
            }
            debug!(call_id = %state.call_id, node = ?node, "entering graph node");

            node = match node {
                GraphNode::Router => {
                    router::route(&self.deps, state, sink, input.as_deref()).await
                }
                GraphNode::ConversationStart => conversation::greet(state, sink).await,
                GraphNode::InitConversation => {
                    conversation::init_backend_conversation(&self.deps, state).await
                }
                GraphNode::UserIdentification => {
                    conversation::identify_caller(&self.deps, state).await
                }
                GraphNode::ConversationStartEnd => {
                    conversation::finish_welcome(&self.deps, state, sink).await
                }
                GraphNode::WaitForUserInput => GraphNode::End,
                GraphNode::LeadAgent => {
                    lead::handle_lead_turn(
                        &self.deps,
                        state,
                        sink,
                        input.as_deref().unwrap_or_default(),
                    )
                    .await;
                    GraphNode::End
                }
                GraphNode::CalendarAgent => {
                    calendar::handle_calendar_turn(
                        &self.deps,
                        &ctx,
                        state,
                        sink,
                        input.as_deref().unwrap_or_default(),
                    )
                    .await;
                    GraphNode::End
                }
                GraphNode::RagCourseAgent => {
                    rag_course::answer_course_query(
                        &self.deps,
                        state,
                        sink,
                        interrupt,
                        input.as_deref().unwrap_or_default(),
                    )
                    .await;
                    GraphNode::End
                }
                GraphNode::End => GraphNode::End,
            };
        }

        TurnOutcome {
            end_call: state.end_call,
        }
    }
}

// =============================================================================
// Test Support
// =============================================================================
