//! Calendar appointment agent.
//!
//! Resolves appointment utterances into slot proposals, confirmations, and
//! bookings against the calendar backend. The LLM is consulted at most
//! twice per turn, once to pick an intent and once to extract a datetime;
//! both parsers fall back conservatively, so a drifting completion degrades
//! into a slot proposal rather than an error.

pub mod slots;
pub mod validator;

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use super::{AgentDeps, CallContext, ConversationState, SpeakSink, speak};
use crate::agents::phrases;
use crate::core::llm::ChatRequest;
use crate::core::llm::prompts::{
    CalendarIntent, calendar_intent_messages, datetime_extraction_messages,
    parse_extracted_datetime,
};

use self::slots::{FreeInterval, busy_from_records, free_intervals, spoken_datetime, spoken_now};
use self::validator::{SlotVerdict, validate};

/// Days after tomorrow still searched when proposing slots.
const PROPOSAL_WINDOW_DAYS: i64 = 2;
/// Upper bound on proposals read out loud in one turn.
const MAX_PROPOSED_SLOTS: usize = 3;
/// Booking retry policy against the calendar backend.
const BOOKING_MAX_RETRIES: u32 = 3;
const BOOKING_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Subject recorded on appointments booked by the bot.
const APPOINTMENT_SUBJECT: &str = "Rendez-vous téléphonique";

/// Run one calendar turn for `input`.
pub(super) async fn handle_calendar_turn(
    deps: &AgentDeps,
    ctx: &CallContext,
    state: &mut ConversationState,
    sink: &dyn SpeakSink,
    input: &str,
) {
    let intent = classify_intent(deps, ctx, input).await;
    debug!(intent = %intent, "calendar intent classified");

    match intent {
        CalendarIntent::PropositionCreneaux => propose_free_slots(deps, ctx, state, sink).await,
        CalendarIntent::DemandeDisponibilites => {
            speak(state, sink, phrases::ASK_AVAILABILITY).await;
        }
        CalendarIntent::PropositionRendezVous => {
            answer_counter_proposal(deps, ctx, state, sink).await;
        }
        CalendarIntent::DemandeConfirmation => {
            read_back_for_confirmation(deps, ctx, state, sink, input).await;
        }
        CalendarIntent::RendezVousConfirme => {
            book_confirmed_slot(deps, ctx, state, sink, input).await;
        }
        CalendarIntent::DemandeModification => {
            speak(state, sink, phrases::MODIFICATION_NOT_SUPPORTED).await;
        }
        CalendarIntent::DemandeAnnulation => {
            speak(state, sink, phrases::CANCELLATION_NOT_SUPPORTED).await;
        }
    }
}

async fn classify_intent(deps: &AgentDeps, ctx: &CallContext, input: &str) -> CalendarIntent {
    let local_now = ctx.now.with_timezone(&deps.business_hours.timezone).naive_local();
    let messages = calendar_intent_messages(input, &spoken_now(local_now), &deps.owner_name);
    let request = ChatRequest::new(messages).with_max_tokens(24);

    match deps.llm.complete(request).await {
        Ok(completion) => CalendarIntent::parse(&completion),
        Err(e) => {
            warn!(error = %e, "intent classification failed, defaulting to slot proposal");
            CalendarIntent::PropositionCreneaux
        }
    }
}

/// Extract the appointment instant out of the utterance and the history.
///
/// The model answers with a bare wall-clock timestamp; it is interpreted in
/// the scheduling timezone, then carried as UTC like every other instant.
async fn extract_instant(
    deps: &AgentDeps,
    ctx: &CallContext,
    state: &ConversationState,
    input: &str,
) -> Option<DateTime<Utc>> {
    let tz = deps.business_hours.timezone;
    let local_now = ctx.now.with_timezone(&tz);
    let now_description = format!(
        "{} ({})",
        spoken_now(local_now.naive_local()),
        local_now.format("%Y-%m-%dT%H:%M:%S")
    );

    let messages =
        datetime_extraction_messages(input, &now_description, &state.formatted_history());
    let request = ChatRequest::new(messages).with_max_tokens(32);

    let completion = match deps.llm.complete(request).await {
        Ok(completion) => completion,
        Err(e) => {
            warn!(error = %e, "datetime extraction failed");
            return None;
        }
    };

    let naive = parse_extracted_datetime(&completion)?;
    match tz.from_local_datetime(&naive).earliest() {
        Some(local) => Some(local.with_timezone(&Utc)),
        None => {
            warn!(%naive, "extracted datetime falls in a DST gap");
            None
        }
    }
}

/// Offer up to three free intervals in the days after tomorrow.
async fn propose_free_slots(
    deps: &AgentDeps,
    ctx: &CallContext,
    state: &mut ConversationState,
    sink: &dyn SpeakSink,
) {
    let tz = deps.business_hours.timezone;
    let today = ctx.now.with_timezone(&tz).date_naive();
    let Some(window_start) = today.succ_opt() else {
        speak(state, sink, phrases::NO_FREE_SLOTS).await;
        return;
    };
    let window_end = window_start + ChronoDuration::days(PROPOSAL_WINDOW_DAYS);

    let Some((start_iso, end_iso)) = day_window_utc(window_start, window_end, tz) else {
        speak(state, sink, phrases::TECHNICAL_ERROR).await;
        return;
    };

    let records = match deps
        .calendar
        .get_scheduled_appointments(&start_iso, &end_iso, &ctx.owner_id)
        .await
    {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "could not fetch busy slots");
            speak(state, sink, phrases::TECHNICAL_ERROR).await;
            return;
        }
    };

    let busy = busy_from_records(&records);
    let free = free_intervals(&busy, window_start, window_end, false, &deps.business_hours);
    if free.is_empty() {
        speak(state, sink, phrases::NO_FREE_SLOTS).await;
        return;
    }

    let spoken_slots: Vec<String> = free
        .iter()
        .take(MAX_PROPOSED_SLOTS)
        .map(FreeInterval::spoken_french)
        .collect();
    speak(state, sink, &phrases::propose_slots(&spoken_slots)).await;
}

/// Answer a caller-proposed time by checking today's calendar.
///
/// A listing failure reads as busy: promising a slot the calendar could not
/// confirm is worse than asking for another one.
async fn answer_counter_proposal(
    deps: &AgentDeps,
    ctx: &CallContext,
    state: &mut ConversationState,
    sink: &dyn SpeakSink,
) {
    let tz = deps.business_hours.timezone;
    let today = ctx.now.with_timezone(&tz).date_naive();
    let Some((start_iso, end_iso)) = day_window_utc(today, today, tz) else {
        speak(state, sink, phrases::TECHNICAL_ERROR).await;
        return;
    };

    match deps
        .calendar
        .get_scheduled_appointments(&start_iso, &end_iso, &ctx.owner_id)
        .await
    {
        Ok(records) if records.is_empty() => {
            speak(state, sink, phrases::CANNED_SLOT_PROPOSAL).await;
        }
        Ok(_) => speak(state, sink, phrases::SLOT_TAKEN_TRY_ANOTHER).await,
        Err(e) => {
            warn!(error = %e, "could not check today's calendar, answering as busy");
            speak(state, sink, phrases::SLOT_TAKEN_TRY_ANOTHER).await;
        }
    }
}

/// Read the requested slot back and ask for a final confirmation.
async fn read_back_for_confirmation(
    deps: &AgentDeps,
    ctx: &CallContext,
    state: &mut ConversationState,
    sink: &dyn SpeakSink,
    input: &str,
) {
    let Some(instant) = extract_instant(deps, ctx, state, input).await else {
        speak(state, sink, phrases::DATE_NOT_UNDERSTOOD).await;
        return;
    };

    match validate(Some(instant), ctx.now, &deps.business_hours) {
        SlotVerdict::Valid => {
            let local = instant.with_timezone(&deps.business_hours.timezone).naive_local();
            speak(state, sink, &phrases::confirm_readback(&spoken_datetime(local))).await;
        }
        verdict => speak(state, sink, verdict_refusal(verdict)).await,
    }
}

/// Book the slot the caller just agreed to.
///
/// The instant is re-extracted from the utterance and the history rather
/// than trusted from a previous turn, then validated again right before
/// writing to the calendar.
async fn book_confirmed_slot(
    deps: &AgentDeps,
    ctx: &CallContext,
    state: &mut ConversationState,
    sink: &dyn SpeakSink,
    input: &str,
) {
    let Some(instant) = extract_instant(deps, ctx, state, input).await else {
        speak(state, sink, phrases::DATE_NOT_UNDERSTOOD).await;
        return;
    };

    let verdict = validate(Some(instant), ctx.now, &deps.business_hours);
    if !verdict.is_valid() {
        speak(state, sink, verdict_refusal(verdict)).await;
        return;
    }

    let start_iso = instant.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let duration_minutes = deps.business_hours.appointment_duration_minutes;
    let appointment = crate::core::crm::NewAppointment {
        subject: APPOINTMENT_SUBJECT.to_string(),
        start_datetime_iso: start_iso.clone(),
        duration_minutes,
        description: format!(
            "Rendez-vous pris par l'assistante vocale pour le numéro {}.",
            state.caller_phone
        ),
        owner_id: ctx.owner_id.clone(),
        who_id: ctx.who_id.clone(),
    };

    let mut event_id = deps
        .calendar
        .schedule_new_appointment(&appointment, BOOKING_MAX_RETRIES, BOOKING_RETRY_DELAY)
        .await;

    if event_id.is_none() {
        // The create call can time out after the event was written; look
        // for it before telling the caller the booking failed.
        event_id = deps
            .calendar
            .verify_appointment_existence(None, Some(APPOINTMENT_SUBJECT), &start_iso, duration_minutes)
            .await;
    }

    match event_id {
        Some(id) => {
            debug!(event_id = %id, "appointment booked");
            state.appointment_created = Some(id);
            let local = instant.with_timezone(&deps.business_hours.timezone).naive_local();
            speak(state, sink, &phrases::booking_confirmed(&spoken_datetime(local))).await;
        }
        None => speak(state, sink, phrases::COULD_NOT_BOOK).await,
    }
}

fn verdict_refusal(verdict: SlotVerdict) -> &'static str {
    match verdict {
        SlotVerdict::InPast => phrases::SLOT_IN_PAST,
        SlotVerdict::Weekend => phrases::SLOT_WEEKEND,
        SlotVerdict::TooFarFuture => phrases::SLOT_TOO_FAR,
        SlotVerdict::OutsideHours | SlotVerdict::Valid => phrases::SLOT_OUTSIDE_HOURS,
    }
}

/// UTC bounds of the local days `[first, last]`, as Z-suffixed strings.
fn day_window_utc(first: NaiveDate, last: NaiveDate, tz: Tz) -> Option<(String, String)> {
    let start = tz
        .from_local_datetime(&first.and_hms_opt(0, 0, 0)?)
        .earliest()?;
    let end = tz
        .from_local_datetime(&last.succ_opt()?.and_hms_opt(0, 0, 0)?)
        .earliest()?;
    Some((
        start
            .with_timezone(&Utc)
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string(),
        end.with_timezone(&Utc)
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string(),
    ))
}
