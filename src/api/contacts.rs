//! Contact disposition submission

use std::sync::Arc;

use serde::Serialize;

use super::{send, ApiClient, ApiError};
use crate::disposition::{ContactStatus, SupportLevel};

/// Body of `POST /api/phonecontacts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    pub voter_id: String,
    pub status: ContactStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voter_support: Option<SupportLevel>,
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_duration_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_duration_seconds: Option<u64>,
}

/// Receiver of completed dispositions.
#[async_trait::async_trait]
pub trait DispositionSink: Send + Sync {
    async fn submit(&self, record: &ContactRecord) -> Result<(), ApiError>;
}

pub struct HttpDispositionSink {
    client: Arc<ApiClient>,
    path: String,
}

impl HttpDispositionSink {
    pub fn new(client: Arc<ApiClient>, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }
}

#[async_trait::async_trait]
impl DispositionSink for HttpDispositionSink {
    async fn submit(&self, record: &ContactRecord) -> Result<(), ApiError> {
        send(self.client.post(&self.path)?.json(record)).await?;
        log::info!(
            "Disposition recorded for voter {}: {:?}",
            record.voter_id,
            record.status
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_camel_case_and_skips_empty_fields() {
        let record = ContactRecord {
            voter_id: "42".to_string(),
            status: ContactStatus::NoAnswer,
            voter_support: None,
            notes: String::new(),
            audio_file_url: None,
            audio_duration_seconds: None,
            call_duration_seconds: Some(0),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["voterId"], "42");
        assert_eq!(json["status"], "NoAnswer");
        assert_eq!(json["callDurationSeconds"], 0);
        assert!(json.get("voterSupport").is_none());
        assert!(json.get("audioFileUrl").is_none());
    }

    #[test]
    fn support_level_uses_lowercase_wire_form() {
        let record = ContactRecord {
            voter_id: "7".to_string(),
            status: ContactStatus::Reached,
            voter_support: Some(SupportLevel::LeanYes),
            notes: "friendly".to_string(),
            audio_file_url: Some("https://cdn/x.wav".to_string()),
            audio_duration_seconds: Some(12),
            call_duration_seconds: Some(95),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["voterSupport"], "leaningyes");
        assert_eq!(json["audioFileUrl"], "https://cdn/x.wav");
        assert_eq!(json["audioDurationSeconds"], 12);
    }
}
