//! Push notification delivery.
//!
//! `FcmPush` talks to the Firebase Cloud Messaging HTTP v1 API:
//!   https://fcm.googleapis.com/v1/projects/{project}/messages:send
//!
//! The bearer token is a short-lived OAuth access token minted outside the
//! bridge (for example `gcloud auth print-access-token`) and passed in via
//! `FCM_ACCESS_TOKEN`. Every call is bounded by the client timeout so a hung
//! request cannot hold the notification gate closed.

use crate::config::PushCredentials;
use crate::model::Notification;
use serde::Deserialize;
use std::time::Duration;

const FCM_BASE_URL: &str = "https://fcm.googleapis.com/v1/projects";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum PushError {
    /// Building the HTTP client failed
    Client(String),
    /// Request never got a response (connect failure, timeout, ...)
    Transport(String),
    /// Provider answered with a non-success status
    Rejected { status: u16, body: String },
}

impl std::fmt::Display for PushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::Client(msg) => write!(f, "failed to build push client: {}", msg),
            PushError::Transport(msg) => write!(f, "push request failed: {}", msg),
            PushError::Rejected { status, body } => {
                write!(f, "push provider rejected message (HTTP {}): {}", status, body)
            }
        }
    }
}

impl std::error::Error for PushError {}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Delivers one notification to one device token.
///
/// Returns a provider message identifier on success.
pub trait PushDelivery: Send + Sync {
    fn send(&self, notification: &Notification, token: &str) -> Result<String, PushError>;
}

// ---------------------------------------------------------------------------
// Firebase Cloud Messaging
// ---------------------------------------------------------------------------

pub struct FcmPush {
    http: reqwest::blocking::Client,
    send_url: String,
    access_token: String,
}

#[derive(Deserialize)]
struct FcmSendResponse {
    name: String,
}

impl FcmPush {
    pub fn new(credentials: &PushCredentials, timeout: Duration) -> Result<Self, PushError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::Client(e.to_string()))?;

        Ok(Self {
            http,
            send_url: build_send_url(&credentials.project_id),
            access_token: credentials.access_token.clone(),
        })
    }
}

/// Builds the FCM v1 send URL for a project.
pub fn build_send_url(project_id: &str) -> String {
    format!("{}/{}/messages:send", FCM_BASE_URL, urlencoding::encode(project_id))
}

/// Builds the FCM v1 message body.
pub fn build_message(notification: &Notification, token: &str) -> serde_json::Value {
    serde_json::json!({
        "message": {
            "token": token,
            "notification": {
                "title": notification.title,
                "body": notification.body,
            }
        }
    })
}

impl PushDelivery for FcmPush {
    fn send(&self, notification: &Notification, token: &str) -> Result<String, PushError> {
        let response = self
            .http
            .post(&self.send_url)
            .bearer_auth(&self.access_token)
            .json(&build_message(notification, token))
            .send()
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(PushError::Rejected { status: status.as_u16(), body });
        }

        // FCM answers `{"name": "projects/<id>/messages/<message-id>"}`
        let parsed: FcmSendResponse = response
            .json()
            .map_err(|e| PushError::Transport(format!("unreadable response: {}", e)))?;

        Ok(parsed.name)
    }
}

// ---------------------------------------------------------------------------
// Log-only fallback
// ---------------------------------------------------------------------------

/// Used when no push credentials are configured: the alert is written to
/// the log and counted as delivered.
pub struct LogOnlyPush;

impl PushDelivery for LogOnlyPush {
    fn send(&self, notification: &Notification, token: &str) -> Result<String, PushError> {
        log::warn!(
            "push not configured; would send \"{}: {}\" to token {}",
            notification.title,
            notification.body,
            token
        );
        Ok("log-only".to_string())
    }
}
