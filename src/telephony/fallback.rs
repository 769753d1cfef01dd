//! SDK availability detection
//!
//! The SDK is resolved once at load time. When it can't be used, an inert
//! stand-in is installed so downstream code keeps a valid `TelephonySdk`,
//! and the capability's `is_available()` flag tells the state machine to
//! refuse every operation with `FallbackUnavailable`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{ClientOptions, Credential, DeviceEvent, TelephonyClient, TelephonyError, TelephonySdk};

/// Injected telephony capability with an explicit availability flag.
#[derive(Clone)]
pub struct TelephonyCapability {
    sdk: Arc<dyn TelephonySdk>,
    unavailable_reason: Option<String>,
}

impl TelephonyCapability {
    /// Resolve the SDK through `loader`. Loader errors and panics both
    /// downgrade to the unavailable stand-in.
    pub fn detect<F>(loader: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn TelephonySdk>, TelephonyError>,
    {
        let loaded = match catch_unwind(AssertUnwindSafe(loader)) {
            Ok(result) => result,
            Err(_) => Err(TelephonyError::Unavailable(
                "SDK loader panicked".to_string(),
            )),
        };

        match loaded.and_then(|sdk| sdk.probe().map(|_| sdk)) {
            Ok(sdk) => {
                log::info!("Telephony SDK available");
                Self::available(sdk)
            }
            Err(e) => {
                log::warn!("Telephony SDK not available, browser calling disabled: {}", e);
                Self::unavailable(e.to_string())
            }
        }
    }

    pub fn available(sdk: Arc<dyn TelephonySdk>) -> Self {
        Self {
            sdk,
            unavailable_reason: None,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            sdk: Arc::new(UnavailableSdk {
                reason: reason.clone(),
            }),
            unavailable_reason: Some(reason),
        }
    }

    pub fn is_available(&self) -> bool {
        self.unavailable_reason.is_none()
    }

    /// Why the SDK is unavailable, if it is.
    pub fn reason(&self) -> Option<&str> {
        self.unavailable_reason.as_deref()
    }

    pub fn sdk(&self) -> Arc<dyn TelephonySdk> {
        self.sdk.clone()
    }
}

/// Stand-in SDK used when the real one can't be loaded.
pub struct UnavailableSdk {
    reason: String,
}

impl TelephonySdk for UnavailableSdk {
    fn probe(&self) -> Result<(), TelephonyError> {
        Err(TelephonyError::Unavailable(self.reason.clone()))
    }

    fn create_client(
        &self,
        _credential: Credential,
        _options: &ClientOptions,
        _events: mpsc::Sender<DeviceEvent>,
    ) -> Result<Arc<dyn TelephonyClient>, TelephonyError> {
        Err(TelephonyError::Unavailable(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ProbeFails;

    impl TelephonySdk for ProbeFails {
        fn probe(&self) -> Result<(), TelephonyError> {
            Err(TelephonyError::Unavailable("no audio output".to_string()))
        }

        fn create_client(
            &self,
            _credential: Credential,
            _options: &ClientOptions,
            _events: mpsc::Sender<DeviceEvent>,
        ) -> Result<Arc<dyn TelephonyClient>, TelephonyError> {
            unreachable!("probe failed")
        }
    }

    #[test]
    fn loader_error_downgrades_to_unavailable() {
        let cap = TelephonyCapability::detect(|| {
            Err(TelephonyError::Unavailable("module not found".to_string()))
        });
        assert!(!cap.is_available());
        assert!(cap.reason().unwrap().contains("module not found"));
    }

    #[test]
    fn loader_panic_downgrades_to_unavailable() {
        let cap = TelephonyCapability::detect(|| panic!("boom"));
        assert!(!cap.is_available());
    }

    #[test]
    fn failed_probe_downgrades_to_unavailable() {
        let cap = TelephonyCapability::detect(|| Ok(Arc::new(ProbeFails) as Arc<dyn TelephonySdk>));
        assert!(!cap.is_available());
        assert!(cap.reason().unwrap().contains("no audio output"));
    }

    #[test]
    fn stand_in_refuses_client_construction() {
        let cap = TelephonyCapability::unavailable("not installed");
        let (tx, _rx) = mpsc::channel(1);
        let result = cap
            .sdk()
            .create_client(Credential::new("t"), &ClientOptions::default(), tx);
        assert!(matches!(result, Err(TelephonyError::Unavailable(_))));
    }
}
