//! Call control over the telephony provider's REST API.
//!
//! Closing the media WebSocket ends the stream but not the phone call
//! itself; the caller would sit in silence until they hang up. The
//! [`CallControl`] trait completes the call on the provider side so hangups
//! are clean. When no provider credentials are configured the no-op
//! implementation is used and only the transport closes.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Twilio REST API base. The account SID and call SID are path segments.
pub const TWILIO_API_URL: &str = "https://api.twilio.com/2010-04-01";

/// End-to-end timeout for one call-control request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Errors
// =============================================================================

/// Errors produced by call control.
#[derive(Debug, Error)]
pub enum TelephonyError {
    /// The client configuration is invalid or incomplete.
    #[error("telephony configuration error: {0}")]
    ConfigurationError(String),

    /// The request could not be sent or the response could not be read.
    #[error("telephony network error: {0}")]
    NetworkError(String),

    /// The provider returned an error response.
    #[error("telephony API error: {0}")]
    ApiError(String),
}

// =============================================================================
// Trait
// =============================================================================

/// Provider-side call termination.
#[async_trait]
pub trait CallControl: Send + Sync {
    /// Complete the call identified by `call_sid`.
    async fn end_call(&self, call_sid: &str) -> Result<(), TelephonyError>;
}

// =============================================================================
// Twilio
// =============================================================================

/// Call control against the Twilio Calls API.
#[derive(Debug)]
pub struct TwilioCallControl {
    account_sid: String,
    auth_token: String,
    http_client: reqwest::Client,
    base_url: String,
}

impl TwilioCallControl {
    /// Create a new client. Fails when credentials are missing.
    pub fn new(account_sid: String, auth_token: String) -> Result<Self, TelephonyError> {
        Self::with_base_url(account_sid, auth_token, TWILIO_API_URL.to_string())
    }

    /// Create a client against a non-default API base (used by tests).
    pub fn with_base_url(
        account_sid: String,
        auth_token: String,
        base_url: String,
    ) -> Result<Self, TelephonyError> {
        if account_sid.trim().is_empty() || auth_token.trim().is_empty() {
            return Err(TelephonyError::ConfigurationError(
                "Twilio account SID and auth token are required".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                TelephonyError::ConfigurationError(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            account_sid,
            auth_token,
            http_client,
            base_url,
        })
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/Accounts/{}/Calls/{call_sid}.json",
            self.base_url.trim_end_matches('/'),
            self.account_sid
        )
    }
}

#[async_trait]
impl CallControl for TwilioCallControl {
    async fn end_call(&self, call_sid: &str) -> Result<(), TelephonyError> {
        let response = self
            .http_client
            .post(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await
            .map_err(|e| TelephonyError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TelephonyError::ApiError(format!(
                "Twilio returned {status}: {text}"
            )));
        }

        info!(call_sid, "Call completed via Twilio");
        Ok(())
    }
}

// =============================================================================
// No-op
// =============================================================================

/// Call control that only logs. Used when no provider is configured.
pub struct NoopCallControl;

#[async_trait]
impl CallControl for NoopCallControl {
    async fn end_call(&self, call_sid: &str) -> Result<(), TelephonyError> {
        info!(call_sid, "No call control configured, relying on transport close");
        Ok(())
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Build call control from optional credentials.
pub fn create_call_control(
    account_sid: Option<&str>,
    auth_token: Option<&str>,
) -> Arc<dyn CallControl> {
    match (account_sid, auth_token) {
        (Some(sid), Some(token)) if !sid.is_empty() && !token.is_empty() => {
            match TwilioCallControl::new(sid.to_string(), token.to_string()) {
                Ok(control) => Arc::new(control),
                Err(e) => {
                    warn!(error = %e, "Falling back to no-op call control");
                    Arc::new(NoopCallControl)
                }
            }
        }
        _ => {
            warn!("Twilio credentials absent, hangups will only close the transport");
            Arc::new(NoopCallControl)
        }
    }
}
