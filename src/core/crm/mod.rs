//! CRM integration: calendar, caller directory, and lead capture.
//!
//! Two traits cover the CRM surface. [`CalendarClient`] is everything the
//! appointment flow needs (busy slots, booking, verification, deletion) and
//! [`DirectoryClient`] identifies callers by phone number and records new
//! leads. Both are implemented by [`RestCrmClient`].
//!
//! Booking and verification return `Option` rather than `Result`: a failed
//! booking is a conversational outcome (the bot offers another slot), not an
//! error to propagate. Failures are logged inside the client. Listing calls
//! keep `Result` because the slot proposal logic must distinguish "no busy
//! slots" from "could not ask".

pub mod rest;

pub use rest::RestCrmClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Errors produced by the CRM client.
#[derive(Debug, Error)]
pub enum CrmError {
    /// The client configuration is invalid or incomplete.
    #[error("CRM configuration error: {0}")]
    ConfigurationError(String),

    /// The request could not be sent or the response could not be read.
    #[error("CRM network error: {0}")]
    NetworkError(String),

    /// The CRM returned an error response.
    #[error("CRM API error: {0}")]
    ApiError(String),

    /// The CRM response did not match the expected shape.
    #[error("CRM invalid response: {0}")]
    InvalidResponse(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// CRM client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CrmConfig {
    /// Base URL of the CRM REST API, without a trailing slash.
    pub base_url: String,

    /// Bearer token.
    pub api_token: String,
}

// =============================================================================
// Records
// =============================================================================

/// A calendar event as returned by the CRM. Field names follow the CRM's
/// PascalCase convention on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppointmentRecord {
    #[serde(rename = "Id", default)]
    pub id: Option<String>,
    #[serde(rename = "StartDateTime")]
    pub start_datetime: String,
    #[serde(rename = "EndDateTime")]
    pub end_datetime: String,
    #[serde(rename = "Subject", default)]
    pub subject: Option<String>,
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
    #[serde(rename = "Location", default)]
    pub location: Option<String>,
    #[serde(rename = "OwnerId", default)]
    pub owner_id: Option<String>,
    #[serde(rename = "WhatId", default)]
    pub what_id: Option<String>,
    #[serde(rename = "WhoId", default)]
    pub who_id: Option<String>,
}

/// Details for one appointment to create.
#[derive(Debug, Clone, Default)]
pub struct NewAppointment {
    pub subject: String,
    /// RFC3339 UTC, ending in `Z`.
    pub start_datetime_iso: String,
    pub duration_minutes: u32,
    pub description: String,
    pub owner_id: String,
    /// Contact to attach, when the caller was identified.
    pub who_id: Option<String>,
}

/// A contact as returned by the CRM directory.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ContactRecord {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "FirstName", default)]
    pub first_name: Option<String>,
    #[serde(rename = "LastName", default)]
    pub last_name: Option<String>,
    #[serde(rename = "Email", default)]
    pub email: Option<String>,
    #[serde(rename = "Phone", default)]
    pub phone: Option<String>,
}

/// An account linked to a contact.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AccountRecord {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
}

/// A lead as returned by the CRM.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LeadRecord {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "FirstName", default)]
    pub first_name: Option<String>,
    #[serde(rename = "LastName", default)]
    pub last_name: Option<String>,
    #[serde(rename = "Company", default)]
    pub company: Option<String>,
    #[serde(rename = "Status", default)]
    pub status: Option<String>,
}

/// Details for one lead to create.
#[derive(Debug, Clone, Default)]
pub struct NewLead {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub description: Option<String>,
}

/// Everything known about a caller after directory lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallerProfile {
    pub contact: Option<ContactRecord>,
    pub accounts: Vec<AccountRecord>,
    pub leads: Vec<LeadRecord>,
}

impl CallerProfile {
    /// Name to greet the caller with, when the directory knows one.
    pub fn display_name(&self) -> Option<String> {
        let contact = self.contact.as_ref()?;
        match (&contact.first_name, &contact.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => None,
        }
    }

    /// Contact id for attaching appointments, when identified.
    pub fn who_id(&self) -> Option<String> {
        self.contact.as_ref().map(|c| c.id.clone())
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Calendar operations used by the appointment flow.
#[async_trait]
pub trait CalendarClient: Send + Sync {
    /// Create an appointment, retrying transient failures.
    ///
    /// Returns the created event id, or `None` after `max_retries` attempts
    /// spaced by `retry_delay`.
    async fn schedule_new_appointment(
        &self,
        appointment: &NewAppointment,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Option<String>;

    /// Fetch the owner's appointments overlapping `[start_iso, end_iso]`.
    async fn get_scheduled_appointments(
        &self,
        start_iso: &str,
        end_iso: &str,
        owner_id: &str,
    ) -> Result<Vec<AppointmentRecord>, CrmError>;

    /// Confirm an appointment actually exists after booking.
    ///
    /// When `event_id` is known, it is checked directly; otherwise the slot
    /// window is searched for a matching subject. Returns the confirmed
    /// event id, or `None` when nothing matches.
    async fn verify_appointment_existence(
        &self,
        event_id: Option<&str>,
        expected_subject: Option<&str>,
        start_iso: &str,
        duration_minutes: u32,
    ) -> Option<String>;

    /// Delete an event. Returns whether the CRM acknowledged the deletion.
    async fn delete_event_by_id(&self, event_id: &str) -> bool;
}

/// Caller directory operations.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Look up everything the CRM knows about a phone number. Results are
    /// cached for a short time because a call probes the same number more
    /// than once.
    async fn identify_caller(&self, phone: &str) -> Result<CallerProfile, CrmError>;

    /// Record a new lead. Returns its id, or `None` when the CRM refused.
    async fn create_lead(&self, lead: &NewLead) -> Option<String>;
}

// =============================================================================
// Unconfigured Fallback
// =============================================================================

/// Stand-in client used when no CRM base URL or token is configured.
///
/// Lookups continue anonymously, availability checks fail like an outage
/// (the scheduling flow answers with the spoken error phrase), and bookings
/// are refused. The Q&A side of the bot is unaffected.
pub struct UnconfiguredCrm;

#[async_trait]
impl CalendarClient for UnconfiguredCrm {
    async fn schedule_new_appointment(
        &self,
        _appointment: &NewAppointment,
        _max_retries: u32,
        _retry_delay: Duration,
    ) -> Option<String> {
        None
    }

    async fn get_scheduled_appointments(
        &self,
        _start_iso: &str,
        _end_iso: &str,
        _owner_id: &str,
    ) -> Result<Vec<AppointmentRecord>, CrmError> {
        Err(CrmError::ConfigurationError(
            "CRM backend is not configured".to_string(),
        ))
    }

    async fn verify_appointment_existence(
        &self,
        _event_id: Option<&str>,
        _expected_subject: Option<&str>,
        _start_iso: &str,
        _duration_minutes: u32,
    ) -> Option<String> {
        None
    }

    async fn delete_event_by_id(&self, _event_id: &str) -> bool {
        false
    }
}

#[async_trait]
impl DirectoryClient for UnconfiguredCrm {
    async fn identify_caller(&self, _phone: &str) -> Result<CallerProfile, CrmError> {
        Err(CrmError::ConfigurationError(
            "CRM backend is not configured".to_string(),
        ))
    }

    async fn create_lead(&self, _lead: &NewLead) -> Option<String> {
        None
    }
}
