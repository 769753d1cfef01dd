//! Telephony SDK boundary
//!
//! The third-party voice SDK is modelled as a small set of traits. The
//! effect runner is the only caller; SDK callbacks are delivered as
//! `DeviceEvent` / `CallEvent` values over channels handed to the SDK at
//! construction time.

mod fallback;

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

pub use fallback::{TelephonyCapability, UnavailableSdk};

/// Edge location used when the settings don't name one.
pub const DEFAULT_EDGE: &str = "ashburn";

const ROUTING_PREFIX: &str = "voter:";
const LEGACY_ROUTING_PREFIX: &str = "voter_";

/// Errors reported across the SDK boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyError {
    /// The SDK cannot be used in this runtime
    Unavailable(String),
    /// The remote side or the SDK refused the call attempt
    Rejected(String),
    /// Any other SDK-reported failure
    Sdk(String),
}

impl fmt::Display for TelephonyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelephonyError::Unavailable(e) => write!(f, "Telephony SDK unavailable: {}", e),
            TelephonyError::Rejected(e) => write!(f, "Call rejected: {}", e),
            TelephonyError::Sdk(e) => write!(f, "Telephony error: {}", e),
        }
    }
}

impl std::error::Error for TelephonyError {}

/// Short-lived capability token authorizing registration and outbound calls.
///
/// The token is moved into the client that uses it. It has no `Display` and
/// its `Debug` output is redacted so it can't end up in logs.
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Opaque routing key for a voter. The server resolves it to a dialable
/// number; the client never handles the number itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingId(String);

impl RoutingId {
    /// Build the routing key for a voter id.
    pub fn for_voter(voter_id: &str) -> Option<Self> {
        let id = voter_id.trim();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Self(format!("{}{}", ROUTING_PREFIX, id)))
    }

    /// Parse a routing key, accepting the legacy `voter_<id>` form.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(id) = raw.strip_prefix(ROUTING_PREFIX) {
            Self::for_voter(id)
        } else if let Some(id) = raw.strip_prefix(LEGACY_ROUTING_PREFIX) {
            Self::for_voter(id)
        } else {
            None
        }
    }

    /// Accept either a routing key or a bare voter id. Input carrying a
    /// routing prefix must parse as a key and is never wrapped again.
    pub fn resolve(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.starts_with(ROUTING_PREFIX) || trimmed.starts_with(LEGACY_ROUTING_PREFIX) {
            Self::parse(trimmed)
        } else {
            Self::for_voter(trimmed)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn voter_id(&self) -> &str {
        &self.0[ROUTING_PREFIX.len()..]
    }
}

impl fmt::Display for RoutingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options passed to the SDK when constructing a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub edge: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            edge: DEFAULT_EDGE.to_string(),
        }
    }
}

/// Parameters for an outbound call.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub to: RoutingId,
}

impl ConnectParams {
    /// Parameters as sent to the signaling backend.
    pub fn to_params(&self) -> Vec<(String, String)> {
        vec![("To".to_string(), self.to.as_str().to_string())]
    }
}

/// Device-level callbacks from the SDK.
pub enum DeviceEvent {
    Registered,
    Unregistered,
    Error(TelephonyError),
    Incoming(Box<dyn IncomingCall>),
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEvent::Registered => f.write_str("Registered"),
            DeviceEvent::Unregistered => f.write_str("Unregistered"),
            DeviceEvent::Error(e) => write!(f, "Error({})", e),
            DeviceEvent::Incoming(_) => f.write_str("Incoming"),
        }
    }
}

/// Call-level callbacks from the SDK.
#[derive(Debug, Clone)]
pub enum CallEvent {
    Accept,
    Disconnect,
    Cancel,
    Reject,
    Error(TelephonyError),
}

/// Entry point of the telephony SDK.
pub trait TelephonySdk: Send + Sync {
    /// Check that the SDK can actually run here (audio stack, transport...).
    fn probe(&self) -> Result<(), TelephonyError> {
        Ok(())
    }

    /// Construct a client. Device callbacks are delivered on `events`.
    fn create_client(
        &self,
        credential: Credential,
        options: &ClientOptions,
        events: mpsc::Sender<DeviceEvent>,
    ) -> Result<Arc<dyn TelephonyClient>, TelephonyError>;
}

/// A constructed (not necessarily registered) telephony client.
#[async_trait::async_trait]
pub trait TelephonyClient: Send + Sync {
    /// Start registration. Completion is reported with `DeviceEvent::Registered`.
    async fn register(&self) -> Result<(), TelephonyError>;

    /// Place an outbound call. Call callbacks are delivered on `events`.
    async fn connect(
        &self,
        params: ConnectParams,
        events: mpsc::Sender<CallEvent>,
    ) -> Result<Arc<dyn CallHandle>, TelephonyError>;

    /// Release the client and its signaling connection.
    fn destroy(&self);
}

/// Handle to an outbound call.
pub trait CallHandle: Send + Sync {
    fn mute(&self, muted: bool);
    fn disconnect(&self);
}

/// An inbound call offered by the SDK. This subsystem never accepts them.
pub trait IncomingCall: Send {
    fn reject(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_id_uses_colon_form() {
        let id = RoutingId::for_voter("42").unwrap();
        assert_eq!(id.as_str(), "voter:42");
        assert_eq!(id.voter_id(), "42");
    }

    #[test]
    fn routing_id_normalizes_legacy_form() {
        assert_eq!(RoutingId::parse("voter_7").unwrap().as_str(), "voter:7");
        assert_eq!(RoutingId::parse("voter:7").unwrap().as_str(), "voter:7");
        assert!(RoutingId::parse("+15551234567").is_none());
        assert!(RoutingId::parse("voter:").is_none());
    }

    #[test]
    fn routing_id_rejects_blank_or_spaced_ids() {
        assert!(RoutingId::for_voter("  ").is_none());
        assert!(RoutingId::for_voter("4 2").is_none());
    }

    #[test]
    fn resolve_never_rewraps_a_prefixed_key() {
        assert_eq!(RoutingId::resolve("42").unwrap().as_str(), "voter:42");
        assert_eq!(RoutingId::resolve("voter_42").unwrap().as_str(), "voter:42");
        assert_eq!(RoutingId::resolve(" voter:42 ").unwrap().as_str(), "voter:42");
        assert!(RoutingId::resolve("voter:").is_none());
        assert!(RoutingId::resolve("voter_").is_none());
    }

    #[test]
    fn connect_params_send_single_to_param() {
        let params = ConnectParams {
            to: RoutingId::for_voter("9").unwrap(),
        };
        assert_eq!(
            params.to_params(),
            vec![("To".to_string(), "voter:9".to_string())]
        );
    }

    #[test]
    fn credential_debug_is_redacted() {
        let cred = Credential::new("secret-token");
        let dbg = format!("{:?}", cred);
        assert!(!dbg.contains("secret"));
        assert_eq!(cred.expose(), "secret-token");
    }
}
