//! Integration tests for the CRM REST client
//!
//! These tests verify:
//! - Caller identification (contacts, linked accounts, leads) and its cache
//! - Appointment booking with retry, verification, and deletion
//! - Lead capture
//!
//! No test here talks to a real CRM; every endpoint is a wiremock server.

use std::time::Duration;

use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use callbot::core::crm::{
    CalendarClient, CrmConfig, DirectoryClient, NewAppointment, NewLead, RestCrmClient,
};

/// Build a client pointed at a mock server
fn mock_client(server: &MockServer) -> RestCrmClient {
    RestCrmClient::new(CrmConfig {
        base_url: format!("{}/api", server.uri()),
        api_token: "crm-token".to_string(),
    })
    .unwrap()
}

fn records(items: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "records": items })
}

// =============================================================================
// Caller Identification
// =============================================================================

/// Test identifying a known caller with a linked account
#[tokio::test]
async fn test_identify_known_caller() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/contacts"))
        .and(query_param("phone", "+33612345678"))
        .respond_with(ResponseTemplate::new(200).set_body_json(records(serde_json::json!([
            {"Id": "c1", "FirstName": "Marie", "LastName": "Durand", "Phone": "+33612345678"}
        ]))))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/contacts/c1/accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(records(serde_json::json!([
            {"Id": "a1", "Name": "Durand SARL"}
        ]))))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/leads"))
        .and(query_param("phone", "+33612345678"))
        .respond_with(ResponseTemplate::new(200).set_body_json(records(serde_json::json!([]))))
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    let profile = crm.identify_caller("+33612345678").await.unwrap();

    assert_eq!(profile.display_name().as_deref(), Some("Marie Durand"));
    assert_eq!(profile.who_id().as_deref(), Some("c1"));
    assert_eq!(profile.accounts.len(), 1);
    assert_eq!(profile.accounts[0].name.as_deref(), Some("Durand SARL"));
    assert!(profile.leads.is_empty());
}

/// Test that a second lookup for the same number is served from the cache
#[tokio::test]
async fn test_identity_lookups_are_cached() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/contacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(records(serde_json::json!([
            {"Id": "c1", "FirstName": "Marie"}
        ]))))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/contacts/c1/accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(records(serde_json::json!([]))))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/leads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(records(serde_json::json!([]))))
        .expect(1)
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    let first = crm.identify_caller("+33612345678").await.unwrap();
    let second = crm.identify_caller("+33612345678").await.unwrap();

    assert_eq!(first, second);
}

/// Test that an unknown caller resolves to an anonymous profile
///
/// No contact means the accounts endpoint must not be queried at all.
#[tokio::test]
async fn test_unknown_caller_yields_anonymous_profile() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/contacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(records(serde_json::json!([]))))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/leads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(records(serde_json::json!([]))))
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    let profile = crm.identify_caller("+33700000000").await.unwrap();

    assert!(profile.contact.is_none());
    assert!(profile.display_name().is_none());
    assert!(profile.who_id().is_none());
}

/// Test that a CRM outage during identification surfaces as an error
#[tokio::test]
async fn test_identify_caller_propagates_api_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/contacts"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    assert!(crm.identify_caller("+33612345678").await.is_err());
}

// =============================================================================
// Appointment Booking
// =============================================================================

fn monday_morning_appointment() -> NewAppointment {
    NewAppointment {
        subject: "Rendez-vous conseiller".to_string(),
        start_datetime_iso: "2026-03-02T09:00:00Z".to_string(),
        duration_minutes: 60,
        description: "Pris par le standard automatique".to_string(),
        owner_id: "OWNER-1".to_string(),
        who_id: Some("c1".to_string()),
    }
}

/// Test the created event carries the computed end time and the contact link
#[tokio::test]
async fn test_schedule_appointment_posts_full_event() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/events"))
        .and(body_json(serde_json::json!({
            "Subject": "Rendez-vous conseiller",
            "StartDateTime": "2026-03-02T09:00:00Z",
            "EndDateTime": "2026-03-02T10:00:00Z",
            "Description": "Pris par le standard automatique",
            "OwnerId": "OWNER-1",
            "WhoId": "c1"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "evt-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    let event_id = crm
        .schedule_new_appointment(&monday_morning_appointment(), 1, Duration::ZERO)
        .await;

    assert_eq!(event_id.as_deref(), Some("evt-1"));
}

/// Test that transient booking failures are retried until one succeeds
#[tokio::test]
async fn test_schedule_retries_transient_failures() {
    let server = MockServer::start().await;

    // First two attempts fail, the third lands
    Mock::given(method("POST"))
        .and(path("/api/events"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "evt-2"})))
        .expect(1)
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    let event_id = crm
        .schedule_new_appointment(&monday_morning_appointment(), 3, Duration::ZERO)
        .await;

    assert_eq!(event_id.as_deref(), Some("evt-2"));
}

/// Test that booking gives up after the retry budget
#[tokio::test]
async fn test_schedule_gives_up_after_max_retries() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/events"))
        .respond_with(ResponseTemplate::new(500).set_body_string("still down"))
        .expect(2)
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    let event_id = crm
        .schedule_new_appointment(&monday_morning_appointment(), 2, Duration::ZERO)
        .await;

    assert!(event_id.is_none());
}

/// Test listing the owner's busy slots for a window
#[tokio::test]
async fn test_get_scheduled_appointments() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/events"))
        .and(query_param("start_datetime", "2026-03-02T08:00:00Z"))
        .and(query_param("end_datetime", "2026-03-02T17:00:00Z"))
        .and(query_param("owner_id", "OWNER-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(records(serde_json::json!([
            {"Id": "e1", "StartDateTime": "2026-03-02T09:00:00Z", "EndDateTime": "2026-03-02T10:00:00Z"},
            {"Id": "e2", "StartDateTime": "2026-03-02T14:00:00Z", "EndDateTime": "2026-03-02T15:00:00Z"}
        ]))))
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    let busy = crm
        .get_scheduled_appointments("2026-03-02T08:00:00Z", "2026-03-02T17:00:00Z", "OWNER-1")
        .await
        .unwrap();

    assert_eq!(busy.len(), 2);
    assert_eq!(busy[0].start_datetime, "2026-03-02T09:00:00Z");
}

// =============================================================================
// Appointment Verification
// =============================================================================

/// Test verification by id when the stored event matches
#[tokio::test]
async fn test_verify_by_id_confirms_matching_event() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/events/evt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Id": "evt-1",
            "StartDateTime": "2026-03-02T09:00:00Z",
            "EndDateTime": "2026-03-02T10:00:00Z",
            "Subject": "Rendez-vous conseiller"
        })))
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    let verified = crm
        .verify_appointment_existence(Some("evt-1"), None, "2026-03-02T09:00:00Z", 60)
        .await;

    assert_eq!(verified.as_deref(), Some("evt-1"));
}

/// Test that a stored event with a different start is treated as unverified
#[tokio::test]
async fn test_verify_by_id_rejects_moved_event() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/events/evt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Id": "evt-1",
            "StartDateTime": "2026-03-02T11:00:00Z",
            "EndDateTime": "2026-03-02T12:00:00Z"
        })))
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    let verified = crm
        .verify_appointment_existence(Some("evt-1"), None, "2026-03-02T09:00:00Z", 60)
        .await;

    assert!(verified.is_none());
}

/// Test that an event which disappeared after booking is unverified
#[tokio::test]
async fn test_verify_by_id_handles_disappeared_event() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/events/evt-1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    let verified = crm
        .verify_appointment_existence(Some("evt-1"), None, "2026-03-02T09:00:00Z", 60)
        .await;

    assert!(verified.is_none());
}

/// Test verification without an id searches the slot window by subject
#[tokio::test]
async fn test_verify_without_id_searches_window() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/events"))
        .and(query_param("start_datetime", "2026-03-02T09:00:00Z"))
        .and(query_param("end_datetime", "2026-03-02T10:00:00Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(records(serde_json::json!([
            {"Id": "other", "StartDateTime": "2026-03-02T09:30:00Z", "EndDateTime": "2026-03-02T10:00:00Z",
             "Subject": "Rendez-vous conseiller"},
            {"Id": "evt-3", "StartDateTime": "2026-03-02T09:00:00Z", "EndDateTime": "2026-03-02T10:00:00Z",
             "Subject": "Rendez-vous conseiller"}
        ]))))
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    let verified = crm
        .verify_appointment_existence(
            None,
            Some("Rendez-vous conseiller"),
            "2026-03-02T09:00:00Z",
            60,
        )
        .await;

    assert_eq!(verified.as_deref(), Some("evt-3"));
}

// =============================================================================
// Appointment Deletion
// =============================================================================

/// Test that an acknowledged deletion reports true
#[tokio::test]
async fn test_delete_event_acknowledged() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/events/evt-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    assert!(crm.delete_event_by_id("evt-1").await);
}

/// Test that a refused deletion reports false
#[tokio::test]
async fn test_delete_event_refused() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/events/evt-1"))
        .respond_with(ResponseTemplate::new(409).set_body_string("locked"))
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    assert!(!crm.delete_event_by_id("evt-1").await);
}

// =============================================================================
// Lead Capture
// =============================================================================

/// Test creating a lead sends only the known fields
#[tokio::test]
async fn test_create_lead_posts_known_fields() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/leads"))
        .and(body_json(serde_json::json!({
            "Phone": "+33700000000",
            "FirstName": "Paul",
            "Description": "Souhaite être rappelé"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "lead-7"})))
        .expect(1)
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    let lead_id = crm
        .create_lead(&NewLead {
            first_name: Some("Paul".to_string()),
            phone: "+33700000000".to_string(),
            description: Some("Souhaite être rappelé".to_string()),
            ..Default::default()
        })
        .await;

    assert_eq!(lead_id.as_deref(), Some("lead-7"));
}

/// Test that a refused lead creation yields None
#[tokio::test]
async fn test_create_lead_refused() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/leads"))
        .respond_with(ResponseTemplate::new(400).set_body_string("missing company"))
        .mount(&server)
        .await;

    let crm = mock_client(&server);
    let lead_id = crm
        .create_lead(&NewLead {
            phone: "+33700000000".to_string(),
            ..Default::default()
        })
        .await;

    assert!(lead_id.is_none());
}
