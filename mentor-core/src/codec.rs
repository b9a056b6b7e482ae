//! Base64 PCM transport codec.
//!
//! Every audio payload crossing the provider boundary is little-endian
//! signed 16-bit mono PCM carried as standard (padded) base64 text.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{MentorError, Result};

/// Full-scale divisor for 16-bit samples.
const PCM16_SCALE: f32 = 32768.0;

/// Encode raw bytes as base64 text.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode base64 text back into raw bytes.
///
/// # Errors
/// Returns `MentorError::Decode` for text that is not valid base64.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(text.trim())?)
}

/// Convert normalized `f32` samples to little-endian PCM16 bytes.
///
/// Input is clamped to [-1.0, 1.0]; `1.0` saturates to `i16::MAX`.
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let scaled = (s.clamp(-1.0, 1.0) * PCM16_SCALE)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.extend_from_slice(&scaled.to_le_bytes());
    }
    out
}

/// Interpret little-endian PCM16 bytes as samples normalized to [-1.0, 1.0).
///
/// # Errors
/// Returns `MentorError::Format` when `bytes.len()` is odd.
pub fn pcm16_to_samples(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(MentorError::Format(format!(
            "PCM16 payload has odd byte length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn base64_round_trip_preserves_bytes() {
        let bytes: Vec<u8> = (0..=255u8).chain([0, 0, 255]).collect();
        let text = encode(&bytes);
        assert_eq!(decode(&text).unwrap(), bytes);
        assert_eq!(decode(&encode(&[])).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn malformed_base64_is_a_decode_error() {
        let err = decode("not*base64!").unwrap_err();
        assert!(matches!(err, MentorError::Decode(_)), "got {err:?}");
    }

    #[test]
    fn transported_pcm_normalizes_extremes() {
        let bytes = pcm(&[32767, -32768, 0, 16384]);
        let samples = pcm16_to_samples(&decode(&encode(&bytes)).unwrap()).unwrap();
        assert_eq!(samples.len(), 4);
        assert!((samples[0] - 0.999_969_5).abs() < 1e-6, "got {}", samples[0]);
        assert_eq!(samples[1], -1.0);
        assert_eq!(samples[2], 0.0);
        assert_eq!(samples[3], 0.5);
    }

    #[test]
    fn odd_length_pcm_is_a_format_error() {
        let err = pcm16_to_samples(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, MentorError::Format(_)), "got {err:?}");
    }

    #[test]
    fn float_conversion_saturates_and_clamps() {
        let bytes = samples_to_pcm16(&[1.0, -1.0, 2.5, -7.0, 0.0]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(values, vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN, 0]);
    }

    #[test]
    fn capture_frame_encodes_two_bytes_per_sample() {
        let frame = vec![0.25f32; 4096];
        assert_eq!(samples_to_pcm16(&frame).len(), 8192);
    }
}
