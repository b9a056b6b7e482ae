//! Fixed-size framing tap.
//!
//! Captured audio arrives in whatever block sizes the device and resampler
//! produce. The live session wants uniform frames (4096 samples at 16 kHz,
//! 256 ms each), so partial input is held until a full frame is available.

/// Default capture frame length in samples.
pub const DEFAULT_FRAME_SAMPLES: usize = 4096;

#[derive(Debug, Clone)]
pub struct FrameAccumulator {
    frame_len: usize,
    pending: Vec<f32>,
}

impl FrameAccumulator {
    /// # Panics
    /// Panics if `frame_len` is zero.
    pub fn new(frame_len: usize) -> Self {
        assert!(frame_len > 0, "frame length must be non-zero");
        Self {
            frame_len,
            pending: Vec::with_capacity(frame_len * 2),
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Samples held back waiting for the rest of their frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append samples and hand every completed frame to `on_frame`, in order.
    ///
    /// Returns the number of frames emitted.
    pub fn push<F>(&mut self, samples: &[f32], mut on_frame: F) -> usize
    where
        F: FnMut(&[f32]),
    {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.frame_len;
        for frame in self.pending.chunks_exact(self.frame_len) {
            on_frame(frame);
        }
        self.pending.drain(..complete * self.frame_len);
        complete
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_SAMPLES)
    }
}
