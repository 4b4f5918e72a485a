//! Business-hours scheduling rules
//!
//! Resolution order: YAML file values first, then environment variable
//! overrides (`BUSINESS_HOURS_SLOTS`, `BUSINESS_WEEKDAYS`,
//! `BUSINESS_TIMEZONE`), then built-in defaults. A malformed value never
//! aborts startup; the affected key falls back to the previous layer and a
//! warning is logged.

use std::collections::BTreeSet;

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::yaml::AppointmentsYaml;

/// Environment override for the slot list, e.g. "09:00-12:00,13:00-16:00".
pub const ENV_BUSINESS_HOURS_SLOTS: &str = "BUSINESS_HOURS_SLOTS";
/// Environment override for allowed weekdays, comma-separated 0..6.
pub const ENV_BUSINESS_WEEKDAYS: &str = "BUSINESS_WEEKDAYS";
/// Environment override for the scheduling timezone, an IANA zone name.
pub const ENV_BUSINESS_TIMEZONE: &str = "BUSINESS_TIMEZONE";

/// Lunch break used when materializing legacy start/end working hours.
const LUNCH_BREAK_START: (u32, u32) = (12, 0);
const LUNCH_BREAK_END: (u32, u32) = (13, 0);

/// One `(open, close)` availability window within a day, open inclusive,
/// close exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotWindow {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl SlotWindow {
    /// Whether an instant's local time falls inside this window.
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.open <= time && time < self.close
    }
}

/// Scheduling rules every appointment decision is evaluated against.
///
/// Loaded once at startup and shared read-only across calls.
#[derive(Debug, Clone, PartialEq)]
pub struct BusinessHoursConfig {
    /// Availability windows, sorted ascending and non-overlapping.
    pub time_slots: Vec<SlotWindow>,
    /// Allowed weekday indices, 0 = Monday .. 6 = Sunday.
    pub allowed_weekdays: BTreeSet<u8>,
    /// Latest bookable day, in whole days from today.
    pub max_days_ahead: i64,
    /// Appointment length in minutes.
    pub appointment_duration_minutes: u32,
    /// Zone all scheduling decisions are evaluated in.
    pub timezone: Tz,
}

impl Default for BusinessHoursConfig {
    fn default() -> Self {
        Self {
            time_slots: vec![
                SlotWindow {
                    open: hm(9, 0),
                    close: hm(12, 0),
                },
                SlotWindow {
                    open: hm(13, 0),
                    close: hm(16, 0),
                },
            ],
            allowed_weekdays: (0..5).collect(),
            max_days_ahead: 30,
            appointment_duration_minutes: 60,
            timezone: chrono_tz::Europe::Paris,
        }
    }
}

impl BusinessHoursConfig {
    /// Resolve the effective rules from YAML and environment overrides.
    pub fn resolve(yaml: Option<&AppointmentsYaml>) -> Self {
        let mut config = Self::default();

        if let Some(appointments) = yaml {
            config.apply_yaml(appointments);
        }
        config.apply_env_overrides();
        config
    }

    fn apply_yaml(&mut self, appointments: &AppointmentsYaml) {
        if let Some(duration) = appointments.duration_minutes {
            if duration > 0 {
                self.appointment_duration_minutes = duration;
            } else {
                warn!("ignoring appointments.duration_minutes of 0");
            }
        }

        if let Some(days) = appointments.max_days_ahead {
            if days > 0 {
                self.max_days_ahead = days;
            } else {
                warn!(days, "ignoring non-positive appointments.max_days_ahead");
            }
        }

        if !appointments.allowed_weekdays.is_empty() {
            match weekday_set(&appointments.allowed_weekdays) {
                Some(set) => self.allowed_weekdays = set,
                None => warn!(
                    "ignoring appointments.allowed_weekdays with out-of-range entries"
                ),
            }
        }

        if let Some(tz_name) = &appointments.timezone {
            match tz_name.parse::<Tz>() {
                Ok(tz) => self.timezone = tz,
                Err(_) => warn!(zone = %tz_name, "ignoring unknown appointments.timezone"),
            }
        }

        if let Some(hours) = &appointments.working_hours {
            if !hours.time_slots.is_empty() {
                match parse_slot_list(&hours.time_slots.join(",")) {
                    Some(slots) => self.time_slots = slots,
                    None => warn!("ignoring malformed appointments.working_hours.time_slots"),
                }
            } else if let (Some(start), Some(end)) = (&hours.start, &hours.end) {
                match legacy_slots(start, end) {
                    Some(slots) => self.time_slots = slots,
                    None => warn!(
                        start = %start,
                        end = %end,
                        "ignoring malformed legacy working hours"
                    ),
                }
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var(ENV_BUSINESS_HOURS_SLOTS) {
            match parse_slot_list(&raw) {
                Some(slots) => self.time_slots = slots,
                None => warn!(value = %raw, "ignoring malformed {ENV_BUSINESS_HOURS_SLOTS}"),
            }
        }

        if let Ok(raw) = std::env::var(ENV_BUSINESS_WEEKDAYS) {
            match parse_weekday_list(&raw) {
                Some(set) => self.allowed_weekdays = set,
                None => warn!(value = %raw, "ignoring malformed {ENV_BUSINESS_WEEKDAYS}"),
            }
        }

        if let Ok(raw) = std::env::var(ENV_BUSINESS_TIMEZONE) {
            match raw.parse::<Tz>() {
                Ok(tz) => self.timezone = tz,
                Err(_) => warn!(value = %raw, "ignoring unknown {ENV_BUSINESS_TIMEZONE}"),
            }
        }
    }

    /// Whether a chrono weekday is bookable.
    pub fn is_allowed_weekday(&self, weekday: chrono::Weekday) -> bool {
        self.allowed_weekdays
            .contains(&(weekday.num_days_from_monday() as u8))
    }

    /// The configured window containing a local time, if any.
    pub fn slot_containing(&self, time: NaiveTime) -> Option<&SlotWindow> {
        self.time_slots.iter().find(|slot| slot.contains(time))
    }
}

/// Build a NaiveTime from literal hour/minute values.
fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

/// Parse "HH:MM-HH:MM[,HH:MM-HH:MM]*" into sorted, non-overlapping windows.
fn parse_slot_list(raw: &str) -> Option<Vec<SlotWindow>> {
    let mut slots = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (open_raw, close_raw) = part.split_once('-')?;
        let open = parse_time(open_raw)?;
        let close = parse_time(close_raw)?;
        if open >= close {
            return None;
        }
        slots.push(SlotWindow { open, close });
    }
    if slots.is_empty() {
        return None;
    }

    slots.sort_by_key(|slot| slot.open);
    for pair in slots.windows(2) {
        if pair[1].open < pair[0].close {
            return None;
        }
    }
    Some(slots)
}

/// Parse "0,1,2" style weekday indices, 0 = Monday .. 6 = Sunday.
fn parse_weekday_list(raw: &str) -> Option<BTreeSet<u8>> {
    let mut days = BTreeSet::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let day: u8 = part.parse().ok()?;
        if day > 6 {
            return None;
        }
        days.insert(day);
    }
    if days.is_empty() { None } else { Some(days) }
}

fn weekday_set(days: &[u8]) -> Option<BTreeSet<u8>> {
    if days.is_empty() || days.iter().any(|day| *day > 6) {
        return None;
    }
    Some(days.iter().copied().collect())
}

/// Materialize legacy start/end working hours as two windows split over the
/// lunch break.
fn legacy_slots(start: &str, end: &str) -> Option<Vec<SlotWindow>> {
    let start = parse_time(start)?;
    let end = parse_time(end)?;
    if start >= end {
        return None;
    }

    let lunch_start = hm(LUNCH_BREAK_START.0, LUNCH_BREAK_START.1);
    let lunch_end = hm(LUNCH_BREAK_END.0, LUNCH_BREAK_END.1);

    let mut slots = Vec::new();
    let morning_close = end.min(lunch_start);
    if start < morning_close {
        slots.push(SlotWindow {
            open: start,
            close: morning_close,
        });
    }
    let afternoon_open = start.max(lunch_end);
    if afternoon_open < end {
        slots.push(SlotWindow {
            open: afternoon_open,
            close: end,
        });
    }

    if slots.is_empty() { None } else { Some(slots) }
}
