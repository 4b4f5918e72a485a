//! Lead capture from free-form utterances.
//!
//! Callers who are neither booking nor asking about a course sometimes
//! leave a callback number or an email mid-sentence. Those details are
//! pulled out with plain patterns and recorded as a CRM lead.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::{AgentDeps, ConversationState, SpeakSink, speak};
use crate::agents::phrases;
use crate::core::crm::NewLead;

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

/// French numbers in national (06 12 34 56 78) or international
/// (+33 6 12 34 56 78) form, with optional spaces, dots, or dashes.
static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\+33\s?|0)[1-9](?:[\s.\-]?\d{2}){4}").unwrap());

/// Contact details pulled out of an utterance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContact {
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl ExtractedContact {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none() && self.email.is_none()
    }
}

/// Pull a phone number and an email address out of free text.
pub fn extract_contact(text: &str) -> ExtractedContact {
    ExtractedContact {
        phone: PHONE_PATTERN.find(text).map(|m| normalize_phone(m.as_str())),
        email: EMAIL_PATTERN.find(text).map(|m| m.as_str().to_string()),
    }
}

/// Whether an utterance carries anything worth recording as a lead.
pub fn contains_contact_details(text: &str) -> bool {
    !extract_contact(text).is_empty()
}

fn normalize_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect()
}

/// Record the caller as a lead from the utterance and the CRM profile.
pub(super) async fn handle_lead_turn(
    deps: &AgentDeps,
    state: &mut ConversationState,
    sink: &dyn SpeakSink,
    input: &str,
) {
    let extracted = extract_contact(input);
    if extracted.is_empty() {
        speak(state, sink, phrases::LEAD_NEED_CONTACT).await;
        return;
    }

    let contact = state
        .caller_profile
        .as_ref()
        .and_then(|profile| profile.contact.clone());

    let lead = NewLead {
        first_name: contact.as_ref().and_then(|c| c.first_name.clone()),
        last_name: contact.as_ref().and_then(|c| c.last_name.clone()),
        phone: extracted
            .phone
            .clone()
            .unwrap_or_else(|| state.caller_phone.clone()),
        email: extracted.email.clone(),
        company: None,
        description: Some(format!(
            "Demande enregistrée par l'assistante vocale : {input}"
        )),
    };

    match deps.directory.create_lead(&lead).await {
        Some(lead_id) => {
            debug!(lead_id = %lead_id, "lead recorded");
            state.last_lead_status = Some(lead_id);
            speak(state, sink, phrases::LEAD_RECORDED).await;
        }
        None => {
            warn!("lead creation was refused by the CRM");
            speak(state, sink, phrases::TECHNICAL_ERROR).await;
        }
    }
}
