//! In-memory WAV encoding

use std::io::Cursor;

use hound::{WavSpec, WavWriter};

use super::{AudioChunk, AudioFormat, RecordingError};

/// Encode buffered chunks as a single 16-bit PCM WAV object.
pub fn encode_wav(format: AudioFormat, chunks: &[AudioChunk]) -> Result<Vec<u8>, RecordingError> {
    let spec = WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|e| RecordingError::EncodeFailed(e.to_string()))?;
        for sample in chunks.iter().flatten() {
            writer
                .write_sample(*sample)
                .map_err(|e| RecordingError::EncodeFailed(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| RecordingError::EncodeFailed(e.to_string()))?;
    }

    let bytes = cursor.into_inner();
    log::debug!(
        "Encoded {} chunks into {} bytes of WAV",
        chunks.len(),
        bytes.len()
    );
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_chunks_in_order() {
        let format = AudioFormat {
            sample_rate: 8000,
            channels: 1,
        };
        let bytes = encode_wav(format, &[vec![1, 2], vec![], vec![3]]).unwrap();

        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.spec().bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3]);
    }

    #[test]
    fn empty_recording_is_still_a_valid_file() {
        let format = AudioFormat {
            sample_rate: 48000,
            channels: 2,
        };
        let bytes = encode_wav(format, &[]).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
    }
}
