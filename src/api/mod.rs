//! Phone-banking backend client
//!
//! Wraps the three endpoints this crate talks to: capability tokens, audio
//! uploads and contact dispositions. Each endpoint sits behind a small
//! trait so the session and the disposition flow can be driven by fakes.

mod contacts;
mod credential;
mod upload;

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;

use crate::settings::PhoneSettings;

pub use contacts::{ContactRecord, DispositionSink, HttpDispositionSink};
pub use credential::{CredentialSource, HttpCredentialSource};
pub use upload::{AudioStore, HttpAudioStore, UploadedAudio};

/// Errors that can occur talking to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No bearer token configured
    MissingAuthToken,
    /// Network/HTTP error
    NetworkError(String),
    /// Backend returned a non-success status
    ApiError { status: u16, message: String },
    /// Failed to parse the response body
    ParseError(String),
    /// Token endpoint answered without a token
    EmptyCredential,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::MissingAuthToken => write!(
                f,
                "Auth token not configured. Set PHONEBANK_AUTH_TOKEN environment variable."
            ),
            ApiError::NetworkError(e) => write!(f, "Network error: {}", e),
            ApiError::ApiError { status, message } => {
                write!(f, "API error ({}): {}", status, message)
            }
            ApiError::ParseError(e) => write!(f, "Failed to parse API response: {}", e),
            ApiError::EmptyCredential => write!(f, "Token endpoint returned no token"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Error payloads the backend is known to send.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

const SESSION_EXPIRED: &str = "Your session has expired. Please log in again.";

/// Shared HTTP client bound to one backend and one bearer token.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::NetworkError(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn from_settings(
        settings: &PhoneSettings,
        auth_token: Option<String>,
    ) -> Result<Self, ApiError> {
        Self::new(
            settings.api_base_url.clone(),
            auth_token,
            Duration::from_secs(settings.http_timeout_secs),
        )
    }

    pub fn has_auth_token(&self) -> bool {
        self.auth_token.is_some()
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let token = self
            .auth_token
            .as_deref()
            .ok_or(ApiError::MissingAuthToken)?;
        Ok(request.header("Authorization", format!("Bearer {}", token)))
    }

    pub(crate) fn get(&self, path: &str) -> Result<RequestBuilder, ApiError> {
        self.authorized(self.http.get(self.url(path)))
    }

    pub(crate) fn post(&self, path: &str) -> Result<RequestBuilder, ApiError> {
        self.authorized(self.http.post(self.url(path)))
    }
}

/// Send a request and turn non-success statuses into `ApiError::ApiError`.
pub(crate) async fn send(request: RequestBuilder) -> Result<Response, ApiError> {
    let response = request
        .send()
        .await
        .map_err(|e| ApiError::NetworkError(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(status.as_u16(), &body);
    log::warn!("Backend request failed ({}): {}", status, message);
    Err(ApiError::ApiError {
        status: status.as_u16(),
        message,
    })
}

fn error_message(status: u16, body: &str) -> String {
    if status == 401 {
        return SESSION_EXPIRED.to_string();
    }

    let parsed = serde_json::from_str::<ErrorBody>(body).unwrap_or_default();
    match parsed.message.or(parsed.error) {
        Some(message) if !message.is_empty() => message,
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => format!("request failed with status {}", status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_json_fields() {
        assert_eq!(error_message(400, r#"{"message":"bad voter"}"#), "bad voter");
        assert_eq!(error_message(500, r#"{"error":"boom"}"#), "boom");
        assert_eq!(error_message(502, "upstream down"), "upstream down");
        assert_eq!(error_message(503, ""), "request failed with status 503");
    }

    #[test]
    fn unauthorized_is_session_expired() {
        assert_eq!(error_message(401, r#"{"message":"nope"}"#), SESSION_EXPIRED);
    }

    #[test]
    fn url_joins_paths() {
        let client =
            ApiClient::new("http://localhost:5000/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.url("/api/phonecontacts"),
            "http://localhost:5000/api/phonecontacts"
        );
        assert_eq!(client.url("api/x"), "http://localhost:5000/api/x");
    }

    #[test]
    fn missing_token_is_reported_before_sending() {
        let client =
            ApiClient::new("http://localhost:5000", Some("  ".to_string()), Duration::from_secs(5))
                .unwrap();
        assert!(!client.has_auth_token());
        assert_eq!(
            client.get("/api/browser-call/token").err(),
            Some(ApiError::MissingAuthToken)
        );
    }
}
