//! Call recording upload

use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{send, ApiClient, ApiError};
use crate::audio::CapturedAudio;

const UPLOAD_FIELD: &str = "audioFile";
const UPLOAD_FILE_NAME: &str = "phone-recording.wav";
const UPLOAD_MIME: &str = "audio/wav";

/// Where a stored recording ended up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedAudio {
    #[serde(alias = "AudioUrl")]
    pub audio_url: String,
    #[serde(default, alias = "FileName")]
    pub file_name: Option<String>,
}

/// Durable storage for captured recordings.
#[async_trait::async_trait]
pub trait AudioStore: Send + Sync {
    async fn upload(&self, audio: &CapturedAudio) -> Result<UploadedAudio, ApiError>;
}

/// Multipart `POST {base}{path}` with the WAV in the `audioFile` field.
pub struct HttpAudioStore {
    client: Arc<ApiClient>,
    path: String,
}

impl HttpAudioStore {
    pub fn new(client: Arc<ApiClient>, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }
}

#[async_trait::async_trait]
impl AudioStore for HttpAudioStore {
    async fn upload(&self, audio: &CapturedAudio) -> Result<UploadedAudio, ApiError> {
        log::info!(
            "Uploading recording {} ({} bytes, {}s)",
            audio.id,
            audio.bytes.len(),
            audio.duration_secs
        );

        let part = Part::bytes(audio.bytes.clone())
            .file_name(UPLOAD_FILE_NAME)
            .mime_str(UPLOAD_MIME)
            .map_err(|e| ApiError::ParseError(e.to_string()))?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        let response = send(self.client.post(&self.path)?.multipart(form)).await?;
        let uploaded: UploadedAudio = response
            .json()
            .await
            .map_err(|e| ApiError::ParseError(e.to_string()))?;

        if uploaded.audio_url.trim().is_empty() {
            return Err(ApiError::ParseError(
                "upload response has no audioUrl".to_string(),
            ));
        }

        log::info!("Recording {} stored at {}", audio.id, uploaded.audio_url);
        Ok(uploaded)
    }
}
