//! Typed PCM16 chunk exchanged with the live session.

use crate::codec;

/// A contiguous block of mono little-endian PCM16 bytes at a known sample rate.
///
/// Produced by the capture tap or received from the remote session; consumed
/// immediately and discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Raw PCM16 bytes, two per sample.
    pub data: Vec<u8>,
    /// Sample rate in Hz (16000 for capture, 24000 for synthesized speech).
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>, sample_rate: u32) -> Self {
        Self { data, sample_rate }
    }

    /// Encode normalized `f32` samples into a chunk.
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self::new(codec::samples_to_pcm16(samples), sample_rate)
    }

    /// MIME descriptor understood by the live session, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Base64 transport form of the PCM bytes.
    pub fn to_base64(&self) -> String {
        codec::encode(&self.data)
    }

    /// Number of whole samples in the chunk.
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.sample_count() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
