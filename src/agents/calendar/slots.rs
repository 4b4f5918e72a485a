//! Free-interval computation over the business-hours windows.
//!
//! Walks every allowed day in a date window, subtracts the busy intervals
//! reported by the calendar backend from each opening slot, and renders the
//! remainders both in a compact machine form and in the long French form the
//! bot reads out loud.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use tracing::warn;

use crate::config::BusinessHoursConfig;
use crate::core::crm::AppointmentRecord;

const WEEKDAYS_FR: [&str; 7] = [
    "lundi", "mardi", "mercredi", "jeudi", "vendredi", "samedi", "dimanche",
];

const MONTHS_FR: [&str; 12] = [
    "janvier",
    "février",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "août",
    "septembre",
    "octobre",
    "novembre",
    "décembre",
];

/// One bookable stretch inside a single day's opening slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeInterval {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl FreeInterval {
    /// Compact `YYYY-MM-DD HH:MM-HH:MM` form.
    pub fn compact(&self) -> String {
        format!(
            "{} {}-{}",
            self.date.format("%Y-%m-%d"),
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }

    /// Long French form, e.g. "le mardi 21 janvier entre 9 heures et 12 heures".
    pub fn spoken_french(&self) -> String {
        format!(
            "{} entre {} et {}",
            spoken_date(self.date),
            spoken_time(self.start),
            spoken_time(self.end)
        )
    }
}

/// Compute the free intervals left by `busy` inside the opening slots of
/// every allowed day in `[window_start, window_end]`.
///
/// With `adjust_end_time` set, each slot close is pulled back by the
/// configured appointment duration so that every returned interval can still
/// host a full appointment starting at any point inside it. Results keep
/// day order, then slot order within a day.
pub fn free_intervals(
    busy: &[(DateTime<Utc>, DateTime<Utc>)],
    window_start: NaiveDate,
    window_end: NaiveDate,
    adjust_end_time: bool,
    config: &BusinessHoursConfig,
) -> Vec<FreeInterval> {
    let tz = config.timezone;
    let mut localized: Vec<_> = busy
        .iter()
        .filter(|(start, end)| end > start)
        .map(|(start, end)| (start.with_timezone(&tz), end.with_timezone(&tz)))
        .collect();
    localized.sort_by_key(|(start, _)| *start);

    let appointment_span = Duration::minutes(i64::from(config.appointment_duration_minutes));

    let mut intervals = Vec::new();
    let mut day = window_start;
    while day <= window_end {
        if config.is_allowed_weekday(day.weekday()) {
            for slot in &config.time_slots {
                let close = if adjust_end_time {
                    let span = slot.close.signed_duration_since(slot.open);
                    if appointment_span >= span {
                        continue;
                    }
                    slot.close - appointment_span
                } else {
                    slot.close
                };

                // DST gaps make a local wall-clock time unrepresentable;
                // skip the slot for that day rather than guess.
                let Some(open_dt) = tz.from_local_datetime(&day.and_time(slot.open)).earliest()
                else {
                    continue;
                };
                let Some(close_dt) = tz.from_local_datetime(&day.and_time(close)).earliest()
                else {
                    continue;
                };

                let mut cursor = open_dt;
                for (busy_start, busy_end) in localized
                    .iter()
                    .filter(|(start, end)| *start < close_dt && *end > open_dt)
                {
                    if *busy_start > cursor {
                        intervals.push(FreeInterval {
                            date: day,
                            start: cursor.time(),
                            end: busy_start.time(),
                        });
                    }
                    if *busy_end > cursor {
                        cursor = *busy_end;
                    }
                }
                if cursor < close_dt {
                    intervals.push(FreeInterval {
                        date: day,
                        start: cursor.time(),
                        end: close_dt.time(),
                    });
                }
            }
        }

        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    let mut seen = HashSet::new();
    intervals.retain(|interval| seen.insert(interval.compact()));
    intervals
}

/// Parse the busy intervals out of calendar appointment records.
///
/// Records with a missing or malformed datetime are skipped with a warning;
/// a half-readable calendar still yields usable proposals.
pub fn busy_from_records(records: &[AppointmentRecord]) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    records
        .iter()
        .filter_map(|record| {
            let start = DateTime::parse_from_rfc3339(&record.start_datetime);
            let end = DateTime::parse_from_rfc3339(&record.end_datetime);
            match (start, end) {
                (Ok(start), Ok(end)) => Some((start.with_timezone(&Utc), end.with_timezone(&Utc))),
                _ => {
                    warn!(
                        start = %record.start_datetime,
                        end = %record.end_datetime,
                        "skipping appointment record with unparseable datetimes"
                    );
                    None
                }
            }
        })
        .collect()
}

// =============================================================================
// French Date Wording
// =============================================================================

pub fn french_weekday(date: NaiveDate) -> &'static str {
    WEEKDAYS_FR[date.weekday().num_days_from_monday() as usize]
}

pub fn french_month(date: NaiveDate) -> &'static str {
    MONTHS_FR[date.month0() as usize]
}

fn spoken_day_number(date: NaiveDate) -> String {
    if date.day() == 1 {
        "1er".to_string()
    } else {
        date.day().to_string()
    }
}

/// "le mardi 21 janvier"
pub fn spoken_date(date: NaiveDate) -> String {
    format!(
        "le {} {} {}",
        french_weekday(date),
        spoken_day_number(date),
        french_month(date)
    )
}

/// "9 heures" or "9 heures 30"
pub fn spoken_time(time: NaiveTime) -> String {
    let unit = if time.hour() == 1 { "heure" } else { "heures" };
    if time.minute() == 0 {
        format!("{} {unit}", time.hour())
    } else {
        format!("{} {unit} {:02}", time.hour(), time.minute())
    }
}

/// "le mardi 21 janvier à 9 heures 30"
pub fn spoken_datetime(datetime: NaiveDateTime) -> String {
    format!("{} à {}", spoken_date(datetime.date()), spoken_time(datetime.time()))
}

/// "le mardi 21 janvier 2025, il est 9 heures 30"
///
/// Prompt-facing variant carrying the year so the model can resolve
/// relative dates across a year boundary.
pub fn spoken_now(datetime: NaiveDateTime) -> String {
    format!(
        "le {} {} {} {}, il est {}",
        french_weekday(datetime.date()),
        spoken_day_number(datetime.date()),
        french_month(datetime.date()),
        datetime.date().year(),
        spoken_time(datetime.time())
    )
}
