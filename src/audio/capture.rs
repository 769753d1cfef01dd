//! Recording lifecycle for one disposition entry
//!
//! Idle -> Recording -> Captured -> Uploaded. A capture may be discarded or
//! re-recorded any number of times until it is uploaded; after that it is
//! locked and only referenced by URL.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use super::{encode_wav, AudioFormat, MicrophoneSource, MicrophoneTrack, RecordingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureStatus {
    Idle,
    Recording,
    Captured,
    Uploaded,
}

/// An encoded recording, ready for upload.
#[derive(Debug, Clone)]
pub struct CapturedAudio {
    /// Fresh per capture; used to recognise a blob that was already uploaded
    pub id: Uuid,
    pub bytes: Vec<u8>,
    pub duration_secs: u64,
    pub format: AudioFormat,
    pub recorded_at: DateTime<Utc>,
}

struct ActiveRecording {
    track: Box<dyn MicrophoneTrack>,
    started_at: Instant,
    recorded_at: DateTime<Utc>,
}

enum Slot {
    Idle,
    Recording(ActiveRecording),
    Captured(CapturedAudio),
    Uploaded { audio: CapturedAudio, url: String },
}

pub struct AudioCapture {
    source: Arc<dyn MicrophoneSource>,
    slot: Slot,
    last_error: Option<RecordingError>,
}

impl AudioCapture {
    pub fn new(source: Arc<dyn MicrophoneSource>) -> Self {
        Self {
            source,
            slot: Slot::Idle,
            last_error: None,
        }
    }

    pub fn status(&self) -> CaptureStatus {
        match self.slot {
            Slot::Idle => CaptureStatus::Idle,
            Slot::Recording(_) => CaptureStatus::Recording,
            Slot::Captured(_) => CaptureStatus::Captured,
            Slot::Uploaded { .. } => CaptureStatus::Uploaded,
        }
    }

    /// Most recent microphone or encoding failure, cleared by a successful start.
    pub fn last_error(&self) -> Option<&RecordingError> {
        self.last_error.as_ref()
    }

    /// The encoded recording, whether or not it has been uploaded.
    pub fn captured(&self) -> Option<&CapturedAudio> {
        match &self.slot {
            Slot::Captured(audio) | Slot::Uploaded { audio, .. } => Some(audio),
            _ => None,
        }
    }

    pub fn uploaded_url(&self) -> Option<&str> {
        match &self.slot {
            Slot::Uploaded { url, .. } => Some(url),
            _ => None,
        }
    }

    pub fn is_mic_live(&self) -> bool {
        match &self.slot {
            Slot::Recording(active) => active.track.is_live(),
            _ => false,
        }
    }

    /// Acquire the microphone and start buffering.
    ///
    /// Starting over a captured recording discards it. On failure the
    /// previous state is kept and the error is also stored in `last_error`.
    pub async fn start(&mut self) -> Result<(), RecordingError> {
        match self.slot {
            Slot::Recording(_) => return Err(RecordingError::AlreadyRecording),
            Slot::Uploaded { .. } => return Err(RecordingError::Locked),
            Slot::Idle | Slot::Captured(_) => {}
        }

        let track = match self.source.acquire().await {
            Ok(track) => track,
            Err(e) => {
                log::warn!("Could not start recording: {}", e);
                self.last_error = Some(e.clone());
                return Err(e);
            }
        };

        if let Slot::Captured(previous) = &self.slot {
            log::debug!("Discarding recording {} for a new take", previous.id);
        }
        self.slot = Slot::Recording(ActiveRecording {
            track,
            started_at: Instant::now(),
            recorded_at: Utc::now(),
        });
        self.last_error = None;
        log::info!("Recording started");
        Ok(())
    }

    /// Stop recording and encode everything buffered into one WAV object.
    ///
    /// The microphone is released before encoding, so it is freed even if
    /// encoding fails (in which case the capture returns to Idle).
    pub fn stop(&mut self) -> Result<&CapturedAudio, RecordingError> {
        let mut active = match std::mem::replace(&mut self.slot, Slot::Idle) {
            Slot::Recording(active) => active,
            other => {
                self.slot = other;
                return Err(RecordingError::NotRecording);
            }
        };

        // Stop first so samples buffered up to the stream teardown are kept
        active.track.stop();
        let chunks = active.track.drain();
        let format = active.track.format();
        let duration_secs = active.started_at.elapsed().as_secs();
        let recorded_at = active.recorded_at;
        drop(active);

        let bytes = match encode_wav(format, &chunks) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Recording discarded: {}", e);
                self.last_error = Some(e.clone());
                return Err(e);
            }
        };

        let audio = CapturedAudio {
            id: Uuid::new_v4(),
            bytes,
            duration_secs,
            format,
            recorded_at,
        };
        log::info!(
            "Recording {} captured: {}s, {} bytes",
            audio.id,
            audio.duration_secs,
            audio.bytes.len()
        );
        self.slot = Slot::Captured(audio);
        match &self.slot {
            Slot::Captured(audio) => Ok(audio),
            _ => Err(RecordingError::NotRecording),
        }
    }

    /// Discard the recording (stopping the microphone if still live).
    pub fn delete(&mut self) -> Result<(), RecordingError> {
        match std::mem::replace(&mut self.slot, Slot::Idle) {
            uploaded @ Slot::Uploaded { .. } => {
                self.slot = uploaded;
                Err(RecordingError::Locked)
            }
            Slot::Recording(mut active) => {
                active.track.stop();
                log::info!("Recording cancelled");
                Ok(())
            }
            Slot::Captured(audio) => {
                log::info!("Recording {} deleted", audio.id);
                Ok(())
            }
            Slot::Idle => Ok(()),
        }
    }

    /// Freeze the capture once the backend has stored it.
    pub fn mark_uploaded(&mut self, url: String) -> Result<(), RecordingError> {
        match std::mem::replace(&mut self.slot, Slot::Idle) {
            Slot::Captured(audio) => {
                self.slot = Slot::Uploaded { audio, url };
                Ok(())
            }
            Slot::Uploaded { audio, url: existing } => {
                self.slot = Slot::Uploaded {
                    audio,
                    url: existing,
                };
                Err(RecordingError::Locked)
            }
            other => {
                self.slot = other;
                Err(RecordingError::NotRecording)
            }
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if let Slot::Recording(active) = &mut self.slot {
            active.track.stop();
            log::debug!("Recording dropped while live, microphone released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::audio::AudioChunk;

    struct FakeTrack {
        live: Arc<AtomicBool>,
        chunks: Vec<AudioChunk>,
        // Delivered by the stream while it shuts down
        tail: Option<AudioChunk>,
    }

    impl MicrophoneTrack for FakeTrack {
        fn format(&self) -> AudioFormat {
            AudioFormat {
                sample_rate: 8000,
                channels: 1,
            }
        }

        fn drain(&mut self) -> Vec<AudioChunk> {
            std::mem::take(&mut self.chunks)
        }

        fn stop(&mut self) {
            self.live.store(false, Ordering::SeqCst);
            if let Some(tail) = self.tail.take() {
                self.chunks.push(tail);
            }
        }

        fn is_live(&self) -> bool {
            self.live.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct FakeMic {
        deny: bool,
        acquired: AtomicUsize,
        live: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl MicrophoneSource for FakeMic {
        async fn acquire(&self) -> Result<Box<dyn MicrophoneTrack>, RecordingError> {
            if self.deny {
                return Err(RecordingError::PermissionDenied);
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            self.live.store(true, Ordering::SeqCst);
            Ok(Box::new(FakeTrack {
                live: self.live.clone(),
                chunks: vec![vec![0; 80], vec![1; 80]],
                tail: Some(vec![2; 80]),
            }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_stop_captures_duration_and_releases_mic() {
        let mic = Arc::new(FakeMic::default());
        let mut capture = AudioCapture::new(mic.clone());

        capture.start().await.unwrap();
        assert_eq!(capture.status(), CaptureStatus::Recording);
        assert!(capture.is_mic_live());

        tokio::time::advance(Duration::from_secs(4)).await;
        let audio = capture.stop().unwrap();
        assert_eq!(audio.duration_secs, 4);
        assert_eq!(&audio.bytes[..4], b"RIFF");
        assert_eq!(capture.status(), CaptureStatus::Captured);
        assert!(!mic.live.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn samples_flushed_at_stop_are_kept() {
        let mut capture = AudioCapture::new(Arc::new(FakeMic::default()));
        capture.start().await.unwrap();
        let audio = capture.stop().unwrap();

        let reader = hound::WavReader::new(std::io::Cursor::new(audio.bytes.clone())).unwrap();
        assert_eq!(reader.len(), 240);
    }

    #[tokio::test]
    async fn permission_denied_stays_idle() {
        let mic = Arc::new(FakeMic {
            deny: true,
            ..Default::default()
        });
        let mut capture = AudioCapture::new(mic);
        assert_eq!(capture.start().await, Err(RecordingError::PermissionDenied));
        assert_eq!(capture.status(), CaptureStatus::Idle);
        assert_eq!(capture.last_error(), Some(&RecordingError::PermissionDenied));
    }

    #[tokio::test]
    async fn delete_and_rerecord_before_upload() {
        let mic = Arc::new(FakeMic::default());
        let mut capture = AudioCapture::new(mic.clone());

        capture.start().await.unwrap();
        let first = capture.stop().unwrap().id;
        capture.delete().unwrap();
        assert_eq!(capture.status(), CaptureStatus::Idle);
        assert!(capture.captured().is_none());

        capture.start().await.unwrap();
        let second = capture.stop().unwrap().id;
        assert_ne!(first, second);

        // Recording over a capture replaces it
        capture.start().await.unwrap();
        capture.stop().unwrap();
        assert_ne!(capture.captured().unwrap().id, second);
        assert_eq!(mic.acquired.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn uploaded_recording_is_locked() {
        let mut capture = AudioCapture::new(Arc::new(FakeMic::default()));
        capture.start().await.unwrap();
        capture.stop().unwrap();
        capture
            .mark_uploaded("https://cdn/rec.wav".to_string())
            .unwrap();

        assert_eq!(capture.delete(), Err(RecordingError::Locked));
        assert_eq!(capture.start().await, Err(RecordingError::Locked));
        assert_eq!(capture.uploaded_url(), Some("https://cdn/rec.wav"));
        assert!(capture.captured().is_some());
    }

    #[tokio::test]
    async fn stop_without_recording_fails() {
        let mut capture = AudioCapture::new(Arc::new(FakeMic::default()));
        assert!(matches!(capture.stop(), Err(RecordingError::NotRecording)));
    }

    #[tokio::test]
    async fn drop_releases_live_microphone() {
        let mic = Arc::new(FakeMic::default());
        let mut capture = AudioCapture::new(mic.clone());
        capture.start().await.unwrap();
        drop(capture);
        assert!(!mic.live.load(Ordering::SeqCst));
    }
}
