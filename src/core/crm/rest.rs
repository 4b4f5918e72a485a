//! REST client for the CRM.
//!
//! # Endpoints
//!
//! - `GET  {base}/events?start_datetime=&end_datetime=[&owner_id=]`
//! - `GET  {base}/events/{id}`
//! - `POST {base}/events`
//! - `DELETE {base}/events/{id}`
//! - `GET  {base}/contacts?phone=`
//! - `GET  {base}/contacts/{id}/accounts`
//! - `GET  {base}/leads?phone=`
//! - `POST {base}/leads`
//!
//! List responses are wrapped in a `{"records": [...]}` envelope. All
//! datetimes on the wire are RFC3339 UTC strings ending in `Z`.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use moka::future::Cache;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    AccountRecord, AppointmentRecord, CalendarClient, CallerProfile, ContactRecord, CrmConfig,
    CrmError, DirectoryClient, LeadRecord, NewAppointment, NewLead,
};

/// End-to-end timeout for one CRM request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a caller identity lookup stays valid.
const IDENTITY_CACHE_TTL: Duration = Duration::from_secs(300);

/// Maximum phone numbers held in the identity cache.
const IDENTITY_CACHE_CAPACITY: u64 = 256;

/// Wire format for datetimes sent to the CRM.
const DATETIME_FMT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Deserialize)]
struct RecordsEnvelope<T> {
    records: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

/// REST client implementing [`CalendarClient`] and [`DirectoryClient`].
#[derive(Debug)]
pub struct RestCrmClient {
    config: CrmConfig,
    http_client: reqwest::Client,
    identity_cache: Cache<String, CallerProfile>,
}

/// Compute the RFC3339 end of a slot from its start and duration.
fn end_from_start(start_iso: &str, duration_minutes: u32) -> Option<String> {
    let start = DateTime::parse_from_rfc3339(start_iso).ok()?;
    let end = start.with_timezone(&Utc) + ChronoDuration::minutes(i64::from(duration_minutes));
    Some(end.format(DATETIME_FMT).to_string())
}

impl RestCrmClient {
    /// Create a new client. Fails when the base URL or token is missing.
    pub fn new(config: CrmConfig) -> Result<Self, CrmError> {
        if config.base_url.trim().is_empty() {
            return Err(CrmError::ConfigurationError(
                "CRM base URL is required".to_string(),
            ));
        }
        if config.api_token.trim().is_empty() {
            return Err(CrmError::ConfigurationError(
                "CRM API token is required".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                CrmError::ConfigurationError(format!("Failed to build HTTP client: {e}"))
            })?;

        let identity_cache = Cache::builder()
            .max_capacity(IDENTITY_CACHE_CAPACITY)
            .time_to_live(IDENTITY_CACHE_TTL)
            .build();

        Ok(Self {
            config,
            http_client,
            identity_cache,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get_records<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, CrmError> {
        let response = self
            .http_client
            .get(self.endpoint(path))
            .bearer_auth(&self.config.api_token)
            .query(query)
            .send()
            .await
            .map_err(|e| CrmError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CrmError::NetworkError(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(CrmError::ApiError(format!(
                "CRM returned {status}: {text}"
            )));
        }

        let envelope: RecordsEnvelope<T> = serde_json::from_str(&text)
            .map_err(|e| CrmError::InvalidResponse(format!("Unexpected body: {e}")))?;
        Ok(envelope.records)
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<String, CrmError> {
        let response = self
            .http_client
            .post(self.endpoint(path))
            .bearer_auth(&self.config.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CrmError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CrmError::NetworkError(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(CrmError::ApiError(format!(
                "CRM returned {status}: {text}"
            )));
        }

        let created: CreateResponse = serde_json::from_str(&text)
            .map_err(|e| CrmError::InvalidResponse(format!("Unexpected body: {e}")))?;
        Ok(created.id)
    }

    async fn fetch_event(&self, event_id: &str) -> Result<Option<AppointmentRecord>, CrmError> {
        let response = self
            .http_client
            .get(self.endpoint(&format!("events/{event_id}")))
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(|e| CrmError::NetworkError(format!("Request failed: {e}")))?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CrmError::NetworkError(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(CrmError::ApiError(format!(
                "CRM returned {status}: {text}"
            )));
        }

        let record: AppointmentRecord = serde_json::from_str(&text)
            .map_err(|e| CrmError::InvalidResponse(format!("Unexpected body: {e}")))?;
        Ok(Some(record))
    }

    async fn post_event(&self, appointment: &NewAppointment) -> Result<String, CrmError> {
        let end = end_from_start(&appointment.start_datetime_iso, appointment.duration_minutes)
            .ok_or_else(|| {
                CrmError::ConfigurationError(format!(
                    "Invalid appointment start datetime: {}",
                    appointment.start_datetime_iso
                ))
            })?;

        let mut body = json!({
            "Subject": appointment.subject,
            "StartDateTime": appointment.start_datetime_iso,
            "EndDateTime": end,
            "Description": appointment.description,
            "OwnerId": appointment.owner_id,
        });
        if let Some(who_id) = &appointment.who_id {
            body["WhoId"] = json!(who_id);
        }

        self.post_json("events", body).await
    }
}

#[async_trait]
impl CalendarClient for RestCrmClient {
    async fn schedule_new_appointment(
        &self,
        appointment: &NewAppointment,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Option<String> {
        let attempts = max_retries.max(1);
        for attempt in 1..=attempts {
            match self.post_event(appointment).await {
                Ok(event_id) => {
                    debug!(event_id = %event_id, "Appointment created");
                    return Some(event_id);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        attempts,
                        error = %e,
                        start = %appointment.start_datetime_iso,
                        "Appointment creation failed"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        }
        None
    }

    async fn get_scheduled_appointments(
        &self,
        start_iso: &str,
        end_iso: &str,
        owner_id: &str,
    ) -> Result<Vec<AppointmentRecord>, CrmError> {
        self.get_records(
            "events",
            &[
                ("start_datetime", start_iso),
                ("end_datetime", end_iso),
                ("owner_id", owner_id),
            ],
        )
        .await
    }

    async fn verify_appointment_existence(
        &self,
        event_id: Option<&str>,
        expected_subject: Option<&str>,
        start_iso: &str,
        duration_minutes: u32,
    ) -> Option<String> {
        if let Some(id) = event_id {
            return match self.fetch_event(id).await {
                Ok(Some(record)) if record.start_datetime == start_iso => Some(id.to_string()),
                Ok(Some(record)) => {
                    warn!(
                        event_id = id,
                        expected = start_iso,
                        actual = %record.start_datetime,
                        "Appointment start does not match, treating as unverified"
                    );
                    None
                }
                Ok(None) => {
                    warn!(event_id = id, "Appointment disappeared after booking");
                    None
                }
                Err(e) => {
                    warn!(event_id = id, error = %e, "Appointment verification failed");
                    None
                }
            };
        }

        let end_iso = end_from_start(start_iso, duration_minutes)?;
        let records: Vec<AppointmentRecord> = match self
            .get_records(
                "events",
                &[("start_datetime", start_iso), ("end_datetime", &end_iso)],
            )
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Appointment window search failed");
                return None;
            }
        };

        records
            .into_iter()
            .find(|r| {
                r.start_datetime == start_iso
                    && expected_subject.is_none_or(|subject| r.subject.as_deref() == Some(subject))
            })
            .and_then(|r| r.id)
    }

    async fn delete_event_by_id(&self, event_id: &str) -> bool {
        let response = self
            .http_client
            .delete(self.endpoint(&format!("events/{event_id}")))
            .bearer_auth(&self.config.api_token)
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => true,
            Ok(r) => {
                warn!(event_id, status = %r.status(), "Event deletion refused");
                false
            }
            Err(e) => {
                warn!(event_id, error = %e, "Event deletion failed");
                false
            }
        }
    }
}

#[async_trait]
impl DirectoryClient for RestCrmClient {
    async fn identify_caller(&self, phone: &str) -> Result<CallerProfile, CrmError> {
        if let Some(profile) = self.identity_cache.get(phone).await {
            debug!(phone, "Caller identity served from cache");
            return Ok(profile);
        }

        let contacts: Vec<ContactRecord> =
            self.get_records("contacts", &[("phone", phone)]).await?;
        let contact = contacts.into_iter().next();

        let accounts = match &contact {
            Some(c) => {
                self.get_records::<AccountRecord>(&format!("contacts/{}/accounts", c.id), &[])
                    .await?
            }
            None => Vec::new(),
        };

        let leads: Vec<LeadRecord> = self.get_records("leads", &[("phone", phone)]).await?;

        let profile = CallerProfile {
            contact,
            accounts,
            leads,
        };
        self.identity_cache
            .insert(phone.to_string(), profile.clone())
            .await;

        debug!(
            phone,
            identified = profile.contact.is_some(),
            accounts = profile.accounts.len(),
            leads = profile.leads.len(),
            "Caller identity resolved"
        );

        Ok(profile)
    }

    async fn create_lead(&self, lead: &NewLead) -> Option<String> {
        let mut body = json!({ "Phone": lead.phone });
        if let Some(v) = &lead.first_name {
            body["FirstName"] = json!(v);
        }
        if let Some(v) = &lead.last_name {
            body["LastName"] = json!(v);
        }
        if let Some(v) = &lead.email {
            body["Email"] = json!(v);
        }
        if let Some(v) = &lead.company {
            body["Company"] = json!(v);
        }
        if let Some(v) = &lead.description {
            body["Description"] = json!(v);
        }

        match self.post_json("leads", body).await {
            Ok(id) => {
                debug!(lead_id = %id, "Lead created");
                Some(id)
            }
            Err(e) => {
                warn!(error = %e, "Lead creation failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RestCrmClient {
        RestCrmClient::new(CrmConfig {
            base_url: "http://crm.local/api".to_string(),
            api_token: "token".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_new_requires_base_url_and_token() {
        let err = RestCrmClient::new(CrmConfig::default()).unwrap_err();
        assert!(matches!(err, CrmError::ConfigurationError(_)));

        let err = RestCrmClient::new(CrmConfig {
            base_url: "http://crm.local".to_string(),
            api_token: String::new(),
        })
        .unwrap_err();
        assert!(matches!(err, CrmError::ConfigurationError(_)));
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let client = RestCrmClient::new(CrmConfig {
            base_url: "http://crm.local/api/".to_string(),
            api_token: "token".to_string(),
        })
        .unwrap();
        assert_eq!(client.endpoint("events"), "http://crm.local/api/events");
    }

    #[test]
    fn test_end_from_start() {
        assert_eq!(
            end_from_start("2025-01-21T09:00:00Z", 60).unwrap(),
            "2025-01-21T10:00:00Z"
        );
        assert_eq!(
            end_from_start("2025-01-21T23:30:00Z", 60).unwrap(),
            "2025-01-22T00:30:00Z"
        );
    }

    #[test]
    fn test_end_from_start_rejects_garbage() {
        assert!(end_from_start("pas une date", 60).is_none());
        assert!(end_from_start("", 30).is_none());
    }

    #[test]
    fn test_records_envelope_parsing() {
        let json = r#"{"records": [
            {"Id": "e1", "StartDateTime": "2025-01-21T09:00:00Z", "EndDateTime": "2025-01-21T10:00:00Z"}
        ]}"#;
        let envelope: RecordsEnvelope<AppointmentRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.records.len(), 1);
        assert_eq!(envelope.records[0].id.as_deref(), Some("e1"));
    }

    #[test]
    fn test_create_response_parsing() {
        let created: CreateResponse = serde_json::from_str(r#"{"id": "evt-9"}"#).unwrap();
        assert_eq!(created.id, "evt-9");
    }

    #[test]
    fn test_client_constructs() {
        let _ = client();
    }
}
