//! At-most-once recording upload

use std::sync::Arc;

use uuid::Uuid;

use crate::api::{ApiError, AudioStore};
use crate::audio::CapturedAudio;

/// Uploads a captured recording, remembering the URL of the last success so
/// a retried submission doesn't store the same blob twice.
pub struct DispositionUploader {
    store: Arc<dyn AudioStore>,
    uploaded: Option<(Uuid, String)>,
}

impl DispositionUploader {
    pub fn new(store: Arc<dyn AudioStore>) -> Self {
        Self {
            store,
            uploaded: None,
        }
    }

    /// URL previously returned for `recording_id`, if any.
    pub fn cached_url(&self, recording_id: Uuid) -> Option<&str> {
        match &self.uploaded {
            Some((id, url)) if *id == recording_id => Some(url),
            _ => None,
        }
    }

    /// Store the recording and return its URL. Failures are not cached.
    pub async fn upload(&mut self, audio: &CapturedAudio) -> Result<String, ApiError> {
        if let Some(url) = self.cached_url(audio.id) {
            log::debug!("Recording {} already uploaded, reusing URL", audio.id);
            return Ok(url.to_string());
        }

        let stored = self.store.upload(audio).await?;
        self.uploaded = Some((audio.id, stored.audio_url.clone()));
        Ok(stored.audio_url)
    }
}
