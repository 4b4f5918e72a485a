//! Appointment validation against the business-hours rules.

use chrono::{DateTime, Datelike, Utc};

use crate::config::BusinessHoursConfig;

/// Outcome of checking one proposed appointment start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotVerdict {
    Valid,
    OutsideHours,
    Weekend,
    InPast,
    TooFarFuture,
}

impl SlotVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, SlotVerdict::Valid)
    }
}

/// Classify a proposed appointment start.
///
/// `instant` is `None` when date extraction failed upstream; that maps to
/// [`SlotVerdict::OutsideHours`] so callers without a dedicated message for
/// the extraction miss still answer with a refusal. The checks run in a
/// fixed order: past, horizon, weekday, then opening hours.
pub fn validate(
    instant: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &BusinessHoursConfig,
) -> SlotVerdict {
    let Some(instant) = instant else {
        return SlotVerdict::OutsideHours;
    };

    let local = instant.with_timezone(&config.timezone);
    let local_now = now.with_timezone(&config.timezone);

    if local <= local_now {
        return SlotVerdict::InPast;
    }

    let days_ahead = (local.date_naive() - local_now.date_naive()).num_days();
    if days_ahead > config.max_days_ahead {
        return SlotVerdict::TooFarFuture;
    }

    if !config.is_allowed_weekday(local.weekday()) {
        return SlotVerdict::Weekend;
    }

    if config.slot_containing(local.time()).is_none() {
        return SlotVerdict::OutsideHours;
    }

    SlotVerdict::Valid
}
