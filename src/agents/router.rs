//! Top-level routing of caller utterances.

use tracing::{debug, warn};

use super::{AgentDeps, ConversationState, GraphNode, SpeakSink, speak};
use crate::agents::lead::contains_contact_details;
use crate::agents::phrases;
use crate::core::llm::ChatRequest;
use crate::core::llm::prompts::{RoutingLabel, routing_messages};

/// Markers that end the call when the utterance is essentially a farewell.
const FAREWELL_MARKERS: &[&str] = &[
    "au revoir",
    "bonne journée",
    "bonne soirée",
    "à bientôt",
    "c'est tout merci",
];

/// Utterances longer than this are never treated as farewells; "au revoir"
/// inside a long sentence usually quotes something else.
const MAX_FAREWELL_CHARS: usize = 40;

/// Whether the utterance is a goodbye rather than a request.
pub fn is_farewell(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    lowered.chars().count() <= MAX_FAREWELL_CHARS
        && FAREWELL_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Entry node: decide where this turn goes.
///
/// A call without a backend conversation always bootstraps first. A turn
/// without a transcript has nothing to do. Everything else is classified
/// and dispatched; unclassifiable utterances go through the general query
/// path unless they carry contact details worth recording as a lead.
pub(super) async fn route(
    deps: &AgentDeps,
    state: &mut ConversationState,
    sink: &dyn SpeakSink,
    input: Option<&str>,
) -> GraphNode {
    if state.conversation_id.is_none() {
        return GraphNode::ConversationStart;
    }

    let Some(text) = input else {
        return GraphNode::WaitForUserInput;
    };

    if is_farewell(text) {
        speak(state, sink, phrases::GOODBYE).await;
        state.end_call = true;
        return GraphNode::End;
    }

    let label = classify(deps, text).await;
    debug!(label = %label, "utterance routed");

    match label {
        RoutingLabel::ScheduleAppointment => GraphNode::CalendarAgent,
        RoutingLabel::TrainingCourseQuery => GraphNode::RagCourseAgent,
        RoutingLabel::Others => {
            if contains_contact_details(text) {
                GraphNode::LeadAgent
            } else {
                GraphNode::RagCourseAgent
            }
        }
    }
}

async fn classify(deps: &AgentDeps, text: &str) -> RoutingLabel {
    let request = ChatRequest::new(routing_messages(text)).with_max_tokens(16);
    match deps.llm.complete(request).await {
        Ok(completion) => RoutingLabel::parse(&completion),
        Err(e) => {
            warn!(error = %e, "routing classification failed, treating as general query");
            RoutingLabel::Others
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::*;
    use std::sync::Arc;

    fn deps_with_llm(llm: ScriptedLlm) -> AgentDeps {
        deps_from(
            Arc::new(llm),
            Arc::new(FakeRag::default()),
            Arc::new(FakeCalendar::default()),
            Arc::new(FakeDirectory::default()),
        )
    }

    fn started_state() -> ConversationState {
        let mut state = ConversationState::new("call-1", "+33612345678");
        state.conversation_id = Some("conv-1".to_string());
        state
    }

    #[test]
    fn test_farewells_are_detected() {
        assert!(is_farewell("au revoir"));
        assert!(is_farewell("Merci, au revoir !"));
        assert!(is_farewell("bonne journée"));
        assert!(!is_farewell("je voudrais un rendez-vous"));
    }

    #[test]
    fn test_long_sentences_are_not_farewells() {
        assert!(!is_farewell(
            "avant de vous dire au revoir j'aurais encore une question sur la formation"
        ));
    }

    #[tokio::test]
    async fn test_missing_conversation_routes_to_bootstrap() {
        let deps = deps_with_llm(ScriptedLlm::new(&[]));
        let mut state = ConversationState::new("call-1", "+33612345678");
        let sink = RecordingSink::default();

        let next = route(&deps, &mut state, &sink, Some("bonjour")).await;

        assert_eq!(next, GraphNode::ConversationStart);
    }

    #[tokio::test]
    async fn test_no_input_waits() {
        let deps = deps_with_llm(ScriptedLlm::new(&[]));
        let mut state = started_state();
        let sink = RecordingSink::default();

        let next = route(&deps, &mut state, &sink, None).await;

        assert_eq!(next, GraphNode::WaitForUserInput);
    }

    #[tokio::test]
    async fn test_appointment_label_routes_to_calendar() {
        let deps = deps_with_llm(ScriptedLlm::new(&["schedule_calendar_appointment"]));
        let mut state = started_state();
        let sink = RecordingSink::default();

        let next = route(&deps, &mut state, &sink, Some("je veux un rendez-vous")).await;

        assert_eq!(next, GraphNode::CalendarAgent);
    }

    #[tokio::test]
    async fn test_course_label_routes_to_rag() {
        let deps = deps_with_llm(ScriptedLlm::new(&["training_course_query"]));
        let mut state = started_state();
        let sink = RecordingSink::default();

        let next = route(&deps, &mut state, &sink, Some("parlez-moi de la formation")).await;

        assert_eq!(next, GraphNode::RagCourseAgent);
    }

    #[tokio::test]
    async fn test_others_with_contact_details_routes_to_lead() {
        let deps = deps_with_llm(ScriptedLlm::new(&["others"]));
        let mut state = started_state();
        let sink = RecordingSink::default();

        let next = route(
            &deps,
            &mut state,
            &sink,
            Some("rappelez-moi au 06 12 34 56 78"),
        )
        .await;

        assert_eq!(next, GraphNode::LeadAgent);
    }

    #[tokio::test]
    async fn test_classification_failure_falls_back_to_rag() {
        let deps = deps_with_llm(ScriptedLlm::failing());
        let mut state = started_state();
        let sink = RecordingSink::default();

        let next = route(&deps, &mut state, &sink, Some("une question")).await;

        assert_eq!(next, GraphNode::RagCourseAgent);
    }

    #[tokio::test]
    async fn test_farewell_speaks_goodbye_and_ends() {
        let deps = deps_with_llm(ScriptedLlm::new(&[]));
        let mut state = started_state();
        let sink = RecordingSink::default();

        let next = route(&deps, &mut state, &sink, Some("au revoir")).await;

        assert_eq!(next, GraphNode::End);
        assert!(state.end_call);
        assert_eq!(sink.said(), vec![phrases::GOODBYE.to_string()]);
    }
}
