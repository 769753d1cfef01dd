use std::sync::Arc;

use super::{ContactStatus, DispositionError, DispositionForm, DispositionUploader};
use crate::api::{AudioStore, ContactRecord, DispositionSink};
use crate::audio::{AudioCapture, CaptureStatus, CapturedAudio, MicrophoneSource};
use crate::state_machine::CallSummary;

/// One disposition entry for one voter: optional recording plus the form.
///
/// Upload and submission take `&mut self`, so a second submit can't start
/// while the first is still in flight.
pub struct DispositionSession {
    voter_id: String,
    capture: AudioCapture,
    uploader: DispositionUploader,
    sink: Arc<dyn DispositionSink>,
    call_duration_secs: Option<u64>,
}

impl DispositionSession {
    pub fn new(
        voter_id: impl Into<String>,
        microphone: Arc<dyn MicrophoneSource>,
        store: Arc<dyn AudioStore>,
        sink: Arc<dyn DispositionSink>,
    ) -> Self {
        Self {
            voter_id: voter_id.into(),
            capture: AudioCapture::new(microphone),
            uploader: DispositionUploader::new(store),
            sink,
            call_duration_secs: None,
        }
    }

    pub fn voter_id(&self) -> &str {
        &self.voter_id
    }

    pub fn recording_status(&self) -> CaptureStatus {
        self.capture.status()
    }

    pub fn capture(&self) -> &AudioCapture {
        &self.capture
    }

    pub async fn start_recording(&mut self) -> Result<(), DispositionError> {
        Ok(self.capture.start().await?)
    }

    pub fn stop_recording(&mut self) -> Result<&CapturedAudio, DispositionError> {
        Ok(self.capture.stop()?)
    }

    pub fn delete_recording(&mut self) -> Result<(), DispositionError> {
        Ok(self.capture.delete()?)
    }

    pub fn set_call_duration(&mut self, secs: u64) {
        self.call_duration_secs = Some(secs);
    }

    /// Take the call duration from a completion notification for this voter.
    pub fn apply_call_summary(&mut self, summary: &CallSummary) -> bool {
        let voter_ref = summary
            .target
            .strip_prefix("voter:")
            .unwrap_or(&summary.target);
        if voter_ref != self.voter_id {
            return false;
        }
        self.set_call_duration(summary.duration_secs);
        true
    }

    /// Upload the recording (once) and submit the disposition.
    ///
    /// An upload failure aborts before anything is submitted and leaves the
    /// recording in place for a retry. A submission failure after a
    /// successful upload keeps the URL, so the retry doesn't upload again.
    pub async fn submit(
        &mut self,
        form: &DispositionForm,
    ) -> Result<ContactRecord, DispositionError> {
        let voter_support = form.validated_support()?;
        if self.capture.status() == CaptureStatus::Recording {
            return Err(DispositionError::RecordingInProgress);
        }

        let previous_url = self.capture.uploaded_url().map(str::to_string);
        let audio = match previous_url {
            Some(url) => Some((url, self.audio_duration())),
            None => match self.capture.captured() {
                Some(captured) => {
                    let url = self
                        .uploader
                        .upload(captured)
                        .await
                        .map_err(DispositionError::Upload)?;
                    let duration = captured.duration_secs;
                    self.capture.mark_uploaded(url.clone())?;
                    Some((url, Some(duration)))
                }
                None => None,
            },
        };

        let (audio_file_url, audio_duration_seconds) = match audio {
            Some((url, duration)) => (Some(url), duration),
            None => (None, None),
        };

        let record = ContactRecord {
            voter_id: self.voter_id.clone(),
            status: form.status,
            voter_support,
            notes: form.notes.clone(),
            audio_file_url,
            audio_duration_seconds,
            call_duration_seconds: self.call_duration_secs,
        };

        self.sink
            .submit(&record)
            .await
            .map_err(DispositionError::Submission)?;

        if record.status == ContactStatus::DoNotCall {
            log::info!("Voter {} marked do-not-call", self.voter_id);
        }
        Ok(record)
    }

    /// Close the entry without submitting. Releases the microphone if live.
    pub fn dismiss(mut self) {
        if self.capture.status() != CaptureStatus::Uploaded {
            let _ = self.capture.delete();
        }
        log::debug!("Disposition for voter {} dismissed", self.voter_id);
    }

    fn audio_duration(&self) -> Option<u64> {
        self.capture.captured().map(|a| a.duration_secs)
    }
}
