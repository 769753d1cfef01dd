//! Errors surfaced by the call session manager.

use serde::Serialize;

/// Errors returned by `PhoneSession` operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhoneError {
    /// Capability token could not be obtained
    CredentialFetch(String),
    /// The SDK reported a registration failure
    Registration(String),
    /// The telephony SDK is not usable in this runtime
    FallbackUnavailable(String),
    /// The device is not registered and idle
    DeviceNotReady,
    /// Another call is already active on this device
    AlreadyInCall,
    /// The SDK refused or failed the call attempt
    CallInitiation(String),
    /// Reconnect is only available from Offline or Error
    ReconnectNotAllowed,
    /// The voter id can't be turned into a routing key
    InvalidRoutingId(String),
    /// The session loop has shut down
    SessionClosed,
}

impl std::fmt::Display for PhoneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhoneError::CredentialFetch(e) => {
                write!(f, "Failed to get phone credential: {}", e)
            }
            PhoneError::Registration(e) => write!(f, "Phone registration failed: {}", e),
            PhoneError::FallbackUnavailable(e) => write!(
                f,
                "Browser calling is not available ({}). Use the standard calling feature.",
                e
            ),
            PhoneError::DeviceNotReady => write!(f, "Phone system not ready"),
            PhoneError::AlreadyInCall => write!(f, "A call is already in progress"),
            PhoneError::CallInitiation(e) => write!(f, "Failed to connect call: {}", e),
            PhoneError::ReconnectNotAllowed => {
                write!(f, "Reconnect is only possible while offline or in error")
            }
            PhoneError::InvalidRoutingId(id) => write!(f, "Invalid voter id: {:?}", id),
            PhoneError::SessionClosed => write!(f, "Phone session has been closed"),
        }
    }
}

impl std::error::Error for PhoneError {}

/// Failure categories shown to the volunteer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    CredentialFetch,
    Registration,
    FallbackUnavailable,
    Connectivity,
    CallInitiation,
}

impl FailureKind {
    /// Whether the UI should offer a retry affordance.
    pub fn retryable(&self) -> bool {
        !matches!(self, FailureKind::FallbackUnavailable)
    }
}
