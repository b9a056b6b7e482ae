//! Software mixer behind an [`OutputContext`](super::OutputContext).

use std::sync::{atomic::Ordering, Arc};

use crossbeam_channel::{Receiver, Sender};

use super::{ClockShared, RenderCommand, SourceId};
use crate::audio::decode::PlaybackBuffer;

/// Frames rendered per block by [`Renderer::advance`].
const ADVANCE_BLOCK: usize = 256;

struct Voice {
    id: SourceId,
    buffer: Arc<PlaybackBuffer>,
    start_frame: u64,
    cursor: usize,
}

/// Mixes scheduled sources into interleaved output and advances the clock.
///
/// Owned by exactly one thread: the output device callback, or a test.
pub struct Renderer {
    clock: Arc<ClockShared>,
    commands: Receiver<RenderCommand>,
    ended: Sender<SourceId>,
    voices: Vec<Voice>,
    scratch: Vec<f32>,
}

impl Renderer {
    pub(super) fn new(
        clock: Arc<ClockShared>,
        commands: Receiver<RenderCommand>,
        ended: Sender<SourceId>,
    ) -> Self {
        Self {
            clock,
            commands,
            ended,
            voices: Vec::with_capacity(16),
            scratch: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate
    }

    /// Number of sources currently scheduled or playing.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                RenderCommand::Start {
                    id,
                    buffer,
                    start_frame,
                    offset_frames,
                } => self.voices.push(Voice {
                    id,
                    buffer,
                    start_frame,
                    cursor: offset_frames,
                }),
                RenderCommand::Stop(id) => self.voices.retain(|v| v.id != id),
                RenderCommand::StopAll => self.voices.clear(),
            }
        }
    }

    /// Fill `out` (interleaved, `channels` wide) with the mix of every active
    /// source and advance the clock by `out.len() / channels` frames.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        self.apply_commands();

        let channels = channels.max(1);
        let frames = out.len() / channels;
        let base = self.clock.frames_rendered.load(Ordering::Acquire);
        let block_end = base + frames as u64;

        out.fill(0.0);
        for voice in &mut self.voices {
            if voice.start_frame >= block_end {
                continue;
            }
            let first = voice.start_frame.saturating_sub(base) as usize;
            let remaining = voice.buffer.samples.len().saturating_sub(voice.cursor);
            let n = remaining.min(frames - first);
            let src = &voice.buffer.samples[voice.cursor..voice.cursor + n];
            for (i, &s) in src.iter().enumerate() {
                let at = (first + i) * channels;
                for slot in &mut out[at..at + channels] {
                    *slot += s;
                }
            }
            voice.cursor += n;
        }
        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }

        let ended = &self.ended;
        self.voices.retain(|v| {
            if v.cursor >= v.buffer.samples.len() {
                let _ = ended.send(v.id);
                false
            } else {
                true
            }
        });

        self.clock.frames_rendered.store(block_end, Ordering::Release);
    }

    /// Render and discard `secs` seconds of mono output.
    pub fn advance(&mut self, secs: f64) {
        let mut remaining = (secs * self.clock.sample_rate as f64).round() as usize;
        let mut scratch = std::mem::take(&mut self.scratch);
        while remaining > 0 {
            let n = remaining.min(ADVANCE_BLOCK);
            scratch.resize(n, 0.0);
            self.render(&mut scratch, 1);
            remaining -= n;
        }
        self.scratch = scratch;
    }
}
