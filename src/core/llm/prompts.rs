//! Prompt construction and completion parsing for the conversation logic.
//!
//! Every LLM use in the callbot is a closed classification or extraction
//! task: route an utterance, pick a calendar intent, or pull a datetime out
//! of free speech. The prompts pin the output format down and the parsers
//! here stay deliberately forgiving, falling back to the safest label when
//! the completion drifts from the requested format.
//!
//! Prompt text is French because the bot converses in French; the machine
//! labels for top-level routing stay in English so they survive quoting and
//! casing changes in completions.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use super::ChatMessage;

// =============================================================================
// Top-Level Routing
// =============================================================================

/// Category assigned to an utterance by the top-level router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingLabel {
    /// The caller wants to book, confirm, move, or cancel an appointment.
    ScheduleAppointment,
    /// The caller asks about training courses.
    TrainingCourseQuery,
    /// Anything else.
    Others,
}

impl RoutingLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingLabel::ScheduleAppointment => "schedule_calendar_appointment",
            RoutingLabel::TrainingCourseQuery => "training_course_query",
            RoutingLabel::Others => "others",
        }
    }

    /// Parse a completion into a label. Unrecognized output maps to
    /// [`RoutingLabel::Others`].
    pub fn parse(raw: &str) -> Self {
        let lower = raw.trim().to_lowercase();
        if lower.contains("schedule_calendar_appointment")
            || (lower.contains("schedule") && lower.contains("appointment"))
        {
            RoutingLabel::ScheduleAppointment
        } else if lower.contains("training_course") {
            RoutingLabel::TrainingCourseQuery
        } else {
            RoutingLabel::Others
        }
    }
}

impl fmt::Display for RoutingLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the routing classification request messages.
pub fn routing_messages(user_text: &str) -> Vec<ChatMessage> {
    let system = "Tu es le classifieur d'intentions d'un assistant téléphonique pour un \
organisme de formation professionnelle. Classe le message de l'appelant dans exactement une \
des catégories suivantes :\n\
- schedule_calendar_appointment : l'appelant veut prendre, confirmer, déplacer ou annuler un \
rendez-vous, ou parle de créneaux et de disponibilités\n\
- training_course_query : l'appelant pose une question sur les formations, leur contenu, leur \
durée, leur prix ou leur financement\n\
- others : tout le reste, y compris les salutations et les demandes hors sujet\n\
Réponds uniquement par le nom de la catégorie, sans ponctuation ni explication.";

    vec![ChatMessage::system(system), ChatMessage::user(user_text)]
}

// =============================================================================
// Calendar Intents
// =============================================================================

/// Closed set of calendar conversation intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarIntent {
    /// The caller wants slot suggestions.
    PropositionCreneaux,
    /// The caller asks whether a specific time is free.
    DemandeDisponibilites,
    /// The caller proposes a date and time themselves.
    PropositionRendezVous,
    /// The caller asks for a recap before committing.
    DemandeConfirmation,
    /// The caller just gave their final agreement.
    RendezVousConfirme,
    /// The caller wants to move an existing appointment.
    DemandeModification,
    /// The caller wants to cancel an existing appointment.
    DemandeAnnulation,
}

impl CalendarIntent {
    /// Canonical French label, as used in the classification prompt.
    pub fn label(&self) -> &'static str {
        match self {
            CalendarIntent::PropositionCreneaux => "Proposition de créneaux",
            CalendarIntent::DemandeDisponibilites => "Demande des disponibilités",
            CalendarIntent::PropositionRendezVous => "Proposition de rendez-vous",
            CalendarIntent::DemandeConfirmation => "Demande de confirmation du rendez-vous",
            CalendarIntent::RendezVousConfirme => "Rendez-vous confirmé",
            CalendarIntent::DemandeModification => "Demande de modification",
            CalendarIntent::DemandeAnnulation => "Demande d'annulation",
        }
    }

    /// Parse a completion into an intent. Unrecognized output maps to
    /// [`CalendarIntent::PropositionCreneaux`], which keeps the conversation
    /// moving by offering slots.
    pub fn parse(raw: &str) -> Self {
        let normalized = strip_accents(&raw.trim().to_lowercase());
        if normalized.contains("demande de confirmation") {
            CalendarIntent::DemandeConfirmation
        } else if normalized.contains("confirme") {
            CalendarIntent::RendezVousConfirme
        } else if normalized.contains("modification") {
            CalendarIntent::DemandeModification
        } else if normalized.contains("annulation") {
            CalendarIntent::DemandeAnnulation
        } else if normalized.contains("disponibilite") {
            CalendarIntent::DemandeDisponibilites
        } else if normalized.contains("proposition de rendez-vous") {
            CalendarIntent::PropositionRendezVous
        } else {
            CalendarIntent::PropositionCreneaux
        }
    }
}

impl fmt::Display for CalendarIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Build the calendar intent classification request messages.
///
/// `current_date` is a human-readable French date and `owner_name` the
/// advisor whose calendar is being discussed; both anchor the model.
pub fn calendar_intent_messages(
    user_text: &str,
    current_date: &str,
    owner_name: &str,
) -> Vec<ChatMessage> {
    let system = format!(
        "Tu analyses le message d'un appelant au sujet d'un rendez-vous téléphonique avec \
{owner_name}. Nous sommes le {current_date}. Classe le message dans exactement une des \
catégories suivantes :\n\
- Proposition de créneaux : l'appelant veut qu'on lui propose des créneaux\n\
- Demande des disponibilités : l'appelant demande si un horaire précis est libre\n\
- Proposition de rendez-vous : l'appelant propose lui-même une date et une heure\n\
- Demande de confirmation du rendez-vous : l'appelant demande un récapitulatif avant de valider\n\
- Rendez-vous confirmé : l'appelant vient de donner son accord définitif\n\
- Demande de modification : l'appelant veut déplacer un rendez-vous déjà pris\n\
- Demande d'annulation : l'appelant veut annuler un rendez-vous déjà pris\n\
Réponds uniquement par le libellé exact de la catégorie."
    );

    vec![ChatMessage::system(system), ChatMessage::user(user_text)]
}

// =============================================================================
// Datetime Extraction
// =============================================================================

/// Sentinel the extraction prompt requests when no datetime is present.
pub const NOT_FOUND: &str = "not-found";

/// Build the datetime extraction request messages.
///
/// `now_description` carries the current date, weekday, and time so the
/// model can resolve relative expressions like "demain" or "mardi prochain".
/// `history` is the formatted conversation so far; the date being confirmed
/// is often in an earlier turn ("mardi à 10 heures" ... "oui, je confirme").
pub fn datetime_extraction_messages(
    user_text: &str,
    now_description: &str,
    history: &str,
) -> Vec<ChatMessage> {
    let system = format!(
        "Tu extrais la date et l'heure de rendez-vous mentionnées dans le message d'un \
appelant. Nous sommes {now_description}. Résous les expressions relatives comme « demain », \
« après-demain » ou « mardi prochain » par rapport à cette date. Si le dernier message ne \
contient pas la date mais y fait référence, retrouve-la dans l'historique de la conversation. \
Réponds uniquement au format YYYY-MM-DDTHH:MM:SSZ, sans aucun autre texte. Si ni le message \
ni l'historique ne contiennent de date ou d'heure exploitables, réponds exactement {NOT_FOUND}."
    );

    let user = if history.trim().is_empty() {
        format!("Message de l'appelant : {user_text}")
    } else {
        format!(
            "Historique de la conversation :\n{history}\n\nMessage de l'appelant : {user_text}"
        )
    };

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

static DATETIME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4}-\d{2}-\d{2})[T ](\d{2}:\d{2})(?::(\d{2}))?").unwrap()
});

/// Parse the completion of a datetime extraction request.
///
/// Accepts the requested `YYYY-MM-DDTHH:MM:SSZ` shape as well as close
/// variants (space separator, missing seconds) and ignores any prose around
/// the timestamp. Returns `None` for the not-found sentinel or anything
/// unparseable.
pub fn parse_extracted_datetime(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.to_lowercase().contains(NOT_FOUND) {
        return None;
    }

    let caps = DATETIME_PATTERN.captures(trimmed)?;
    let date = caps.get(1)?.as_str();
    let time = caps.get(2)?.as_str();
    let seconds = caps.get(3).map_or("00", |m| m.as_str());

    NaiveDateTime::parse_from_str(&format!("{date} {time}:{seconds}"), "%Y-%m-%d %H:%M:%S").ok()
}

/// Replace common French diacritics so label matching survives completions
/// typed without accents.
fn strip_accents(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}
