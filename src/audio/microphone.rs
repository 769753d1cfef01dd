//! Default-device microphone using CPAL
//!
//! The CPAL stream lives on its own thread for its whole life, so the track
//! handed back to callers is `Send` regardless of the host backend. Samples
//! are converted to i16 in the callback and buffered until drained.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use tokio::sync::oneshot;

use super::{AudioChunk, AudioFormat, MicrophoneSource, MicrophoneTrack, RecordingError};

type ChunkBuffer = Arc<Mutex<Vec<AudioChunk>>>;

/// Microphone backed by the host's default input device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }

    /// Name of the default input device, if there is one.
    pub fn default_device_name() -> Option<String> {
        cpal::default_host()
            .default_input_device()
            .and_then(|d| d.name().ok())
    }
}

#[async_trait::async_trait]
impl MicrophoneSource for CpalMicrophone {
    async fn acquire(&self) -> Result<Box<dyn MicrophoneTrack>, RecordingError> {
        let buffer: ChunkBuffer = Arc::new(Mutex::new(Vec::new()));
        let live = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread_buffer = buffer.clone();
        let thread_live = live.clone();
        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || match open_stream(thread_buffer, thread_live.clone()) {
                Ok((stream, format)) => {
                    let _ = ready_tx.send(Ok(format));
                    // Block until stopped or the track is dropped
                    let _ = stop_rx.recv();
                    thread_live.store(false, Ordering::SeqCst);
                    drop(stream);
                    log::info!("Microphone released");
                }
                Err(e) => {
                    thread_live.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| RecordingError::StreamCreationFailed(e.to_string()))?;

        let format = match ready_rx.await {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(RecordingError::StreamCreationFailed(
                    "capture thread exited".to_string(),
                ))
            }
        };

        Ok(Box::new(CpalTrack {
            format,
            buffer,
            live,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }))
    }
}

struct CpalTrack {
    format: AudioFormat,
    buffer: ChunkBuffer,
    live: Arc<AtomicBool>,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneTrack for CpalTrack {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn drain(&mut self) -> Vec<AudioChunk> {
        match self.buffer.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    fn stop(&mut self) {
        self.live.store(false, Ordering::SeqCst);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Microphone capture thread panicked");
            }
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for CpalTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_stream(
    buffer: ChunkBuffer,
    live: Arc<AtomicBool>,
) -> Result<(Stream, AudioFormat), RecordingError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(RecordingError::NoInputDevice)?;

    log::info!("Using audio input device: {:?}", device.name());

    let supported_config = device
        .default_input_config()
        .map_err(map_config_error)?;

    log::info!(
        "Audio config: {} Hz, {} channels, {:?}",
        supported_config.sample_rate().0,
        supported_config.channels(),
        supported_config.sample_format()
    );

    let sample_format = supported_config.sample_format();
    let config: StreamConfig = supported_config.into();
    let format = AudioFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };

    let stream = match sample_format {
        SampleFormat::I16 => build_stream::<i16>(&device, &config, buffer, live),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, buffer, live),
        SampleFormat::F32 => build_stream::<f32>(&device, &config, buffer, live),
        _ => Err(RecordingError::NoSupportedConfig),
    }?;

    stream.play().map_err(|e| {
        RecordingError::StreamCreationFailed(format!("Failed to start stream: {}", e))
    })?;

    Ok((stream, format))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    buffer: ChunkBuffer,
    live: Arc<AtomicBool>,
) -> Result<Stream, RecordingError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !live.load(Ordering::SeqCst) {
                    return;
                }
                let chunk: AudioChunk = data.iter().map(|&s| sample_to_i16(s)).collect();
                if let Ok(mut guard) = buffer.lock() {
                    guard.push(chunk);
                }
            },
            |err| log::error!("Audio stream error: {}", err),
            None,
        )
        .map_err(map_build_error)
}

fn map_config_error(err: cpal::DefaultStreamConfigError) -> RecordingError {
    match err {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => RecordingError::NoInputDevice,
        cpal::DefaultStreamConfigError::BackendSpecific { err } if is_permission_error(&err.description) => {
            RecordingError::PermissionDenied
        }
        _ => RecordingError::NoSupportedConfig,
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> RecordingError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => RecordingError::NoInputDevice,
        cpal::BuildStreamError::BackendSpecific { err } if is_permission_error(&err.description) => {
            RecordingError::PermissionDenied
        }
        other => RecordingError::StreamCreationFailed(other.to_string()),
    }
}

fn is_permission_error(description: &str) -> bool {
    let lower = description.to_lowercase();
    lower.contains("permission") || lower.contains("not authorized") || lower.contains("denied")
}

/// Convert any sample type to i16 for WAV writing.
fn sample_to_i16<T>(sample: T) -> i16
where
    T: cpal::Sample,
    f32: cpal::FromSample<T>,
{
    let f32_sample: f32 = sample.to_sample();
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_and_clamps_samples() {
        assert_eq!(sample_to_i16(0.0f32), 0);
        assert_eq!(sample_to_i16(1.0f32), i16::MAX);
        assert_eq!(sample_to_i16(-2.0f32), -i16::MAX);
    }

    #[test]
    fn permission_errors_are_recognized() {
        assert!(is_permission_error("Permission denied (os error 13)"));
        assert!(is_permission_error("App is not authorized to use the microphone"));
        assert!(!is_permission_error("device busy"));
    }
}
