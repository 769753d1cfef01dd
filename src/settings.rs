use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::telephony::DEFAULT_EDGE;

const APP_DIR_NAME: &str = "phonebank-voice";
const SETTINGS_FILE_NAME: &str = "settings.json";

const API_URL_ENV: &str = "PHONEBANK_API_URL";
const AUTH_TOKEN_ENV: &str = "PHONEBANK_AUTH_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneSettings {
    /// Backend origin, e.g. `https://phonebank.example.org`.
    pub api_base_url: String,

    /// Capability token endpoint. The older `/api/phonebanking/v2/token`
    /// endpoint hands out the same kind of token.
    pub credential_path: String,

    pub audio_upload_path: String,

    pub disposition_path: String,

    /// Signaling edge the client connects to.
    pub edge: String,

    /// Calls still ringing after this many seconds are hung up. 0 disables.
    pub ring_timeout_secs: u64,

    pub http_timeout_secs: u64,
}

impl Default for PhoneSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000".to_string(),
            credential_path: "/api/browser-call/token".to_string(),
            audio_upload_path: "/api/phonecontacts/upload-audio".to_string(),
            disposition_path: "/api/phonecontacts".to_string(),
            edge: DEFAULT_EDGE.to_string(),
            ring_timeout_secs: 60,
            http_timeout_secs: 30,
        }
    }
}

impl PhoneSettings {
    pub fn ring_timeout(&self) -> Option<Duration> {
        (self.ring_timeout_secs > 0).then(|| Duration::from_secs(self.ring_timeout_secs))
    }

    /// Apply environment overrides (`PHONEBANK_API_URL`).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
        self
    }
}

/// Bearer token for the backend, from `PHONEBANK_AUTH_TOKEN`.
pub fn auth_token_from_env() -> Option<String> {
    std::env::var(AUTH_TOKEN_ENV)
        .ok()
        .filter(|t| !t.trim().is_empty())
}

/// `<config dir>/phonebank-voice/settings.json`
pub fn settings_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir().ok_or("Could not determine config directory")?;
    Ok(dir.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
}

/// Load settings, falling back to defaults when the file is missing or unreadable.
pub fn load_settings(path: &Path) -> PhoneSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<PhoneSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                PhoneSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => PhoneSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            PhoneSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &PhoneSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write to a sibling temp file, then rename over the target.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // Windows rename fails if the destination exists.
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(format!("Remove existing settings file {:?}: {}", path, e));
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("settings.json"));
        assert_eq!(settings, PhoneSettings::default());
        assert_eq!(settings.ring_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = PhoneSettings {
            api_base_url: "https://phonebank.test".to_string(),
            ring_timeout_secs: 0,
            ..Default::default()
        };
        save_settings(&path, &settings).unwrap();

        let loaded = load_settings(&path);
        assert_eq!(loaded, settings);
        assert_eq!(loaded.ring_timeout(), None);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"edge":"dublin"}"#).unwrap();

        let loaded = load_settings(&path);
        assert_eq!(loaded.edge, "dublin");
        assert_eq!(loaded.credential_path, "/api/browser-call/token");
    }

    #[test]
    fn malformed_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(load_settings(&path), PhoneSettings::default());
    }
}
