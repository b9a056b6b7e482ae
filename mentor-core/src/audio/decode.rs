//! PCM16 → playable buffer decoding.

use std::path::Path;

use crate::audio::resample::{RateConverter, DEFAULT_CHUNK};
use crate::buffering::chunk::AudioChunk;
use crate::codec;
use crate::error::{MentorError, Result};

/// Sample rate of synthesized speech and live-session output.
pub const SPEECH_SAMPLE_RATE: u32 = 24_000;

/// Sample rate the live session expects for microphone input.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// A decoded, mono, time-domain sample buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Mono f32 samples in [-1.0, 1.0).
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// A buffer of `secs` seconds of silence.
    pub fn silence(secs: f64, sample_rate: u32) -> Self {
        let len = (secs * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Resample to `sample_rate`. Returns `self` unchanged when rates match.
    pub fn into_rate(self, sample_rate: u32) -> Result<Self> {
        if self.sample_rate == sample_rate {
            return Ok(self);
        }
        let mut converter = RateConverter::new(self.sample_rate, sample_rate, DEFAULT_CHUNK)?;
        let samples = converter.convert_all(&self.samples)?;
        Ok(Self::new(samples, sample_rate))
    }

    /// Write the buffer as a 16-bit mono WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;
        for &s in &self.samples {
            let v = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
            writer.write_sample(v).map_err(wav_error)?;
        }
        writer.finalize().map_err(wav_error)
    }
}

fn wav_error(e: hound::Error) -> MentorError {
    match e {
        hound::Error::IoError(io) => MentorError::Io(io),
        other => MentorError::AudioStream(format!("wav: {other}")),
    }
}

/// Decode little-endian PCM16 bytes into a mono buffer at `sample_rate`.
///
/// # Errors
/// Returns `MentorError::Format` if the byte length is odd.
pub fn decode_pcm(bytes: &[u8], sample_rate: u32) -> Result<PlaybackBuffer> {
    let samples = codec::pcm16_to_samples(bytes)?;
    Ok(PlaybackBuffer::new(samples, sample_rate))
}

/// Decode a base64 PCM16 payload into a mono buffer.
pub fn decode_base64_pcm(text: &str, sample_rate: u32) -> Result<PlaybackBuffer> {
    decode_pcm(&codec::decode(text)?, sample_rate)
}

/// Decode a received chunk at its own sample rate.
pub fn decode_chunk(chunk: &AudioChunk) -> Result<PlaybackBuffer> {
    decode_pcm(&chunk.data, chunk.sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn decoded_length_and_duration() {
        let bytes = vec![0u8; 48_000];
        let buffer = decode_pcm(&bytes, SPEECH_SAMPLE_RATE).unwrap();
        assert_eq!(buffer.len(), 24_000);
        assert_relative_eq!(buffer.duration_secs(), 1.0);
    }

    #[test]
    fn odd_payload_is_rejected() {
        let err = decode_pcm(&[0, 1, 2], SPEECH_SAMPLE_RATE).unwrap_err();
        assert!(matches!(err, MentorError::Format(_)));
    }

    #[test]
    fn base64_payload_decodes_to_normalized_samples() {
        let raw: Vec<u8> = [32767i16, -32768]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let buffer = decode_base64_pcm(&codec::encode(&raw), CAPTURE_SAMPLE_RATE).unwrap();
        assert_eq!(buffer.sample_rate, CAPTURE_SAMPLE_RATE);
        assert_relative_eq!(buffer.samples[0], 0.999_969_5, epsilon = 1e-6);
        assert_eq!(buffer.samples[1], -1.0);
    }

    #[test]
    fn rate_change_keeps_duration() {
        let buffer = PlaybackBuffer::silence(0.5, SPEECH_SAMPLE_RATE);
        let converted = buffer.into_rate(48_000).unwrap();
        assert_eq!(converted.sample_rate, 48_000);
        assert_relative_eq!(converted.duration_secs(), 0.5);
    }

    #[test]
    fn wav_export_writes_every_sample() {
        let path = std::env::temp_dir().join(format!("mentor-wav-{}.wav", std::process::id()));
        let buffer = PlaybackBuffer::new(vec![0.0, 0.5, -0.5, 1.0], SPEECH_SAMPLE_RATE);
        buffer.write_wav(&path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, SPEECH_SAMPLE_RATE);
        assert_eq!(reader.len(), 4);
        let _ = std::fs::remove_file(&path);
    }
}
