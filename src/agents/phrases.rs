//! Fixed French utterances spoken by the callbot.
//!
//! Every phrase that can be spoken without runtime formatting lives here so
//! the pregenerated audio cache can synthesize the full set at startup.
//! Phrases that embed a caller name or a date are assembled by the helpers
//! at the bottom and synthesized on first use.

use rand::seq::SliceRandom;

// =============================================================================
// Conversation Openers and Closers
// =============================================================================

/// Opening line spoken as soon as the media stream starts.
pub const GREETING: &str =
    "Bonjour, je suis votre assistante virtuelle. Un instant, je vous prie.";

/// Welcome for a caller the CRM could not identify.
pub const WELCOME_UNKNOWN: &str =
    "Merci de votre appel. Comment puis-je vous aider aujourd'hui ?";

/// Prompt spoken after a long silence, before giving up on the call.
pub const REASK: &str = "Êtes-vous toujours là ? Comment puis-je vous aider ?";

/// Farewell spoken before hanging up.
pub const GOODBYE: &str = "Merci pour votre appel. Au revoir.";

// =============================================================================
// Recovery Phrases
// =============================================================================

/// Spoken when a provider call failed and no better answer exists.
pub const TECHNICAL_ERROR: &str =
    "Je rencontre un problème technique. Pouvez-vous répéter, s'il vous plaît ?";

/// Spoken when a transcript came back empty or unusable.
pub const DID_NOT_HEAR: &str =
    "Je ne vous ai pas bien entendu. Pouvez-vous répéter, s'il vous plaît ?";

// =============================================================================
// Calendar Flow
// =============================================================================

/// Asked when the caller wants us to work around their schedule.
pub const ASK_AVAILABILITY: &str =
    "Quelles sont vos disponibilités ? Indiquez-moi vos jours et créneaux préférés.";

/// Refusal when the requested moment is already booked.
pub const SLOT_TAKEN_TRY_ANOTHER: &str =
    "Je ne suis pas disponible à ce moment-là. Pouvez-vous proposer un autre créneau ?";

/// Default counter-proposal when the calendar is free.
pub const CANNED_SLOT_PROPOSAL: &str =
    "Je vous propose demain matin à 10 heures. Est-ce que cela vous convient ?";

/// Spoken when the booking call failed after retries.
pub const COULD_NOT_BOOK: &str =
    "Je n'ai pas réussi à enregistrer ce rendez-vous. Pouvez-vous proposer un autre créneau ?";

/// Spoken when no date could be extracted from the utterance.
pub const DATE_NOT_UNDERSTOOD: &str =
    "Je n'ai pas compris la date souhaitée. Pouvez-vous la préciser ?";

/// Spoken when the proposal window holds no free interval at all.
pub const NO_FREE_SLOTS: &str =
    "Je n'ai aucun créneau disponible sur cette période. Un conseiller vous rappellera.";

pub const MODIFICATION_NOT_SUPPORTED: &str =
    "Je ne peux pas modifier un rendez-vous existant. Un conseiller va vous recontacter pour cela.";

pub const CANCELLATION_NOT_SUPPORTED: &str =
    "Je ne peux pas annuler un rendez-vous existant. Un conseiller va vous recontacter pour cela.";

// Refusals matching each slot validation outcome.
pub const SLOT_IN_PAST: &str =
    "Ce créneau est déjà passé. Pouvez-vous proposer une date à venir ?";
pub const SLOT_WEEKEND: &str =
    "Nous ne prenons pas de rendez-vous le week-end. Pouvez-vous proposer un jour en semaine ?";
pub const SLOT_TOO_FAR: &str =
    "Ce créneau est trop éloigné. Pouvez-vous proposer une date plus proche ?";
pub const SLOT_OUTSIDE_HOURS: &str =
    "Ce créneau est en dehors de nos horaires d'ouverture. Pouvez-vous proposer un autre horaire ?";

// =============================================================================
// Lead Capture
// =============================================================================

/// Spoken once the caller's details were recorded as a lead.
pub const LEAD_RECORDED: &str =
    "C'est noté, un conseiller va vous recontacter rapidement. Puis-je faire autre chose pour vous ?";

/// Asked when the caller wants a follow-up but gave no usable contact detail.
pub const LEAD_NEED_CONTACT: &str =
    "Pouvez-vous me laisser un numéro de téléphone ou une adresse e-mail pour vous recontacter ?";

// =============================================================================
// Acknowledgements
// =============================================================================

/// Short fillers spoken right after an utterance is captured, before the
/// agents produce the real answer.
pub const ACKNOWLEDGEMENTS: &[&str] = &[
    "D'accord.",
    "Très bien.",
    "Entendu.",
    "Un instant, s'il vous plaît.",
];

/// Pick one acknowledgement at random.
pub fn random_acknowledgement() -> &'static str {
    ACKNOWLEDGEMENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(ACKNOWLEDGEMENTS[0])
}

// =============================================================================
// Transcript Filtering
// =============================================================================

/// Transcripts Whisper is known to hallucinate on silence or line noise.
const STT_WATERMARKS: &[&str] = &[
    "sous-titres réalisés par la communauté d'amara.org",
    "sous-titres réalisés para la communauté d'amara.org",
    "sous-titrage société radio-canada",
    "sous-titrage st' 501",
    "merci d'avoir regardé cette vidéo",
    "merci d'avoir regardé",
    "n'hésitez pas à vous abonner",
    "abonnez-vous",
];

/// Transcripts shorter than this are treated as noise.
pub const MIN_TRANSCRIPT_CHARS: usize = 2;

/// Whether an STT transcript should be discarded instead of routed.
pub fn is_unusable_transcript(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_TRANSCRIPT_CHARS {
        return true;
    }
    let lowered = trimmed.to_lowercase();
    STT_WATERMARKS.iter().any(|mark| lowered.contains(mark))
}

// =============================================================================
// Formatted Phrases
// =============================================================================

/// Welcome for an identified caller.
pub fn welcome_known(name: &str) -> String {
    format!("Bonjour {name}, ravie de vous entendre. Comment puis-je vous aider aujourd'hui ?")
}

/// Confirmation question read back before booking.
pub fn confirm_readback(date_description: &str) -> String {
    format!("Vous souhaitez un rendez-vous {date_description}. Pouvez-vous me le confirmer ?")
}

/// Spoken once the calendar backend accepted the appointment.
pub fn booking_confirmed(date_description: &str) -> String {
    format!("C'est noté, votre rendez-vous est confirmé pour {date_description}. Merci et à bientôt.")
}

/// Slot proposal sentence assembled from spoken free intervals.
pub fn propose_slots(slots: &[String]) -> String {
    format!(
        "Voici mes prochaines disponibilités : {}. Lequel de ces créneaux vous conviendrait ?",
        slots.join(", ")
    )
}

/// Every phrase known ahead of time, used to warm the audio cache at startup.
pub fn pregenerated_catalog() -> Vec<String> {
    let mut catalog: Vec<String> = [
        GREETING,
        WELCOME_UNKNOWN,
        REASK,
        GOODBYE,
        TECHNICAL_ERROR,
        DID_NOT_HEAR,
        ASK_AVAILABILITY,
        SLOT_TAKEN_TRY_ANOTHER,
        CANNED_SLOT_PROPOSAL,
        COULD_NOT_BOOK,
        DATE_NOT_UNDERSTOOD,
        NO_FREE_SLOTS,
        MODIFICATION_NOT_SUPPORTED,
        CANCELLATION_NOT_SUPPORTED,
        SLOT_IN_PAST,
        SLOT_WEEKEND,
        SLOT_TOO_FAR,
        SLOT_OUTSIDE_HOURS,
        LEAD_RECORDED,
        LEAD_NEED_CONTACT,
    ]
    .iter()
    .map(|text| text.to_string())
    .collect();

    catalog.extend(ACKNOWLEDGEMENTS.iter().map(|text| text.to_string()));
    catalog
}
