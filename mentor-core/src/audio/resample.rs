//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Two places need it:
//!
//! - Capture: `cpal` records at the device's native rate (commonly 48 kHz),
//!   the live session only accepts 16 kHz. `RateConverter::process` runs on
//!   the controller's event loop and carries partial blocks between calls.
//! - Playback: speech arrives at 24 kHz, the output device may run at
//!   44.1/48 kHz. `RateConverter::convert_all` converts a whole buffer once,
//!   before it is handed to the renderer.
//!
//! When both rates match, `RateConverter` is a passthrough and no rubato
//! session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{MentorError, Result};

/// Input frames per rubato call.
pub const DEFAULT_CHUNK: usize = 960;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    ratio: f64,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Errors
    /// Returns `MentorError::AudioDevice` if rubato fails to initialise.
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                ratio: 1.0,
            });
        }

        let ratio = to_rate as f64 / from_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| MentorError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        debug!(from_rate, to_rate, chunk_size, max_out, "rate converter created");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
            ratio,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated internally until a full `chunk_size` block is
    /// available for rubato. Any remainder is kept for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Convert a complete buffer in one go, flushing the resampler tail.
    ///
    /// The result is trimmed of the resampler's leading delay and cut to
    /// `round(len * ratio)` samples, so durations survive the conversion.
    pub fn convert_all(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let ratio = self.ratio;
        let Some(ref mut resampler) = self.resampler else {
            return Ok(samples.to_vec());
        };

        let expected = (samples.len() as f64 * ratio).round() as usize;
        let delay = resampler.output_delay();
        let mut out = Vec::with_capacity(expected + delay);

        let mut full_blocks = samples.chunks_exact(self.chunk_size);
        for block in full_blocks.by_ref() {
            let (_, produced) = resampler
                .process_into_buffer(&[block], &mut self.output_buf, None)
                .map_err(|e| MentorError::AudioStream(format!("resample: {e}")))?;
            out.extend_from_slice(&self.output_buf[0][..produced]);
        }

        let tail = full_blocks.remainder();
        if !tail.is_empty() {
            let tail_block: [&[f32]; 1] = [tail];
            let (_, produced) = resampler
                .process_partial_into_buffer(Some(&tail_block[..]), &mut self.output_buf, None)
                .map_err(|e| MentorError::AudioStream(format!("resample: {e}")))?;
            out.extend_from_slice(&self.output_buf[0][..produced]);
        }

        // Push zeros through until the delayed tail has come out.
        while out.len() < expected + delay {
            let (_, produced) = resampler
                .process_partial_into_buffer(None::<&[&[f32]]>, &mut self.output_buf, None)
                .map_err(|e| MentorError::AudioStream(format!("resample: {e}")))?;
            if produced == 0 {
                break;
            }
            out.extend_from_slice(&self.output_buf[0][..produced]);
        }

        resampler.reset();

        let start = delay.min(out.len());
        let mut converted = out.split_off(start);
        converted.resize(expected, 0.0);
        Ok(converted)
    }

    /// Returns `true` when both rates are equal (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Drop any partially accumulated input.
    pub fn clear(&mut self) {
        self.input_buf.clear();
        if let Some(ref mut resampler) = self.resampler {
            resampler.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, DEFAULT_CHUNK).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
        assert_eq!(rc.convert_all(&samples).unwrap(), samples);
    }

    #[test]
    fn capture_48k_to_16k_streams_in_blocks() {
        let mut rc = RateConverter::new(48_000, 16_000, DEFAULT_CHUNK).unwrap();
        assert!(!rc.is_passthrough());

        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
        let out = rc.process(&vec![0.0f32; 500]);
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "output len={} expected≈320",
            out.len()
        );
    }

    #[test]
    fn whole_buffer_conversion_preserves_duration() {
        let mut rc = RateConverter::new(24_000, 48_000, DEFAULT_CHUNK).unwrap();
        let samples: Vec<f32> = (0..24_000)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        let out = rc.convert_all(&samples).unwrap();
        assert_eq!(out.len(), 48_000);

        // Converter is reusable after a flush.
        let again = rc.convert_all(&samples[..1_000]).unwrap();
        assert_eq!(again.len(), 2_000);
    }

    #[test]
    fn clear_drops_partial_input() {
        let mut rc = RateConverter::new(48_000, 16_000, DEFAULT_CHUNK).unwrap();
        rc.process(&vec![0.0f32; 900]);
        rc.clear();
        assert!(rc.process(&vec![0.0f32; 100]).is_empty());
    }
}
