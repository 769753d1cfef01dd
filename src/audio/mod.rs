//! Call recording capture
//!
//! This module handles microphone input capture and in-memory WAV encoding.
//! Uses CPAL for audio capture and hound for WAV encoding.

mod capture;
mod encode;
mod microphone;

pub use capture::{AudioCapture, CaptureStatus, CapturedAudio};
pub use encode::encode_wav;
pub use microphone::CpalMicrophone;

/// Interleaved 16-bit PCM samples as delivered by the microphone.
pub type AudioChunk = Vec<i16>;

/// Errors that can occur during audio capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingError {
    PermissionDenied,
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    EncodeFailed(String),
    AlreadyRecording,
    NotRecording,
    /// The recording has been uploaded and can no longer change
    Locked,
}

impl std::fmt::Display for RecordingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingError::PermissionDenied => write!(
                f,
                "Microphone access denied. Please allow microphone access to record."
            ),
            RecordingError::NoInputDevice => write!(f, "No audio input device found"),
            RecordingError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            RecordingError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            RecordingError::EncodeFailed(e) => write!(f, "Failed to encode recording: {}", e),
            RecordingError::AlreadyRecording => write!(f, "Recording already in progress"),
            RecordingError::NotRecording => write!(f, "Not recording"),
            RecordingError::Locked => write!(f, "Recording has already been uploaded"),
        }
    }
}

impl std::error::Error for RecordingError {}

/// Sample layout of a microphone stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Grants access to a microphone.
#[async_trait::async_trait]
pub trait MicrophoneSource: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn MicrophoneTrack>, RecordingError>;
}

/// A live microphone stream buffering chunks until drained.
pub trait MicrophoneTrack: Send {
    fn format(&self) -> AudioFormat;

    /// Take everything buffered so far.
    fn drain(&mut self) -> Vec<AudioChunk>;

    /// Release the device. Safe to call more than once.
    fn stop(&mut self);

    fn is_live(&self) -> bool;
}
