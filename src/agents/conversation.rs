//! Call bootstrap nodes: greeting, backend conversation setup, caller
//! identification, and the welcome.

use tracing::warn;
use uuid::Uuid;

use super::{AgentDeps, ConversationState, GraphNode, Speaker, SpeakSink, speak};
use crate::agents::phrases;

/// Speak the opening line.
pub(super) async fn greet(state: &mut ConversationState, sink: &dyn SpeakSink) -> GraphNode {
    speak(state, sink, phrases::GREETING).await;
    GraphNode::InitConversation
}

/// Create the caller and a fresh conversation on the RAG backend.
///
/// A backend outage must not kill the call: the conversation falls back to
/// a locally generated id so the bootstrap never re-runs, and later queries
/// surface a spoken error instead.
pub(super) async fn init_backend_conversation(
    deps: &AgentDeps,
    state: &mut ConversationState,
) -> GraphNode {
    match deps.rag.create_user(&state.caller_phone).await {
        Ok(user_id) => {
            match deps.rag.create_conversation(&user_id).await {
                Ok(conversation_id) => state.conversation_id = Some(conversation_id),
                Err(e) => {
                    warn!(error = %e, "could not open a backend conversation");
                    state.conversation_id = Some(local_conversation_id());
                }
            }
            state.rag_user_id = Some(user_id);
        }
        Err(e) => {
            warn!(error = %e, "could not register the caller with the backend");
            state.conversation_id = Some(local_conversation_id());
        }
    }
    GraphNode::UserIdentification
}

fn local_conversation_id() -> String {
    format!("local-{}", Uuid::new_v4())
}

/// Look the caller up in the CRM by phone number.
pub(super) async fn identify_caller(
    deps: &AgentDeps,
    state: &mut ConversationState,
) -> GraphNode {
    match deps.directory.identify_caller(&state.caller_phone).await {
        Ok(profile) => state.caller_profile = Some(profile),
        Err(e) => warn!(error = %e, "caller lookup failed, continuing anonymously"),
    }
    GraphNode::ConversationStartEnd
}

/// Speak the identity-aware or generic welcome and mirror it to the backend
/// history.
pub(super) async fn finish_welcome(
    deps: &AgentDeps,
    state: &mut ConversationState,
    sink: &dyn SpeakSink,
) -> GraphNode {
    let welcome = state
        .caller_profile
        .as_ref()
        .and_then(|profile| profile.display_name())
        .map(|name| phrases::welcome_known(&name))
        .unwrap_or_else(|| phrases::WELCOME_UNKNOWN.to_string());

    speak(state, sink, &welcome).await;

    if let Some(conversation_id) = &state.conversation_id {
        if let Err(e) = deps
            .rag
            .append_history(conversation_id, Speaker::Assistant.role(), &welcome)
            .await
        {
            warn!(error = %e, "could not mirror the welcome to the backend history");
        }
    }
    GraphNode::End
}
