//! Gapless streaming playback queue.
//!
//! Each enqueued buffer starts exactly where the previous one ends on the
//! device clock: `start_at = max(next_start_time, now)`. Late arrivals start
//! immediately and push the watermark forward, so a stalled stream resumes
//! without overlap.

use std::collections::BTreeSet;

use tracing::debug;

use crate::audio::decode::PlaybackBuffer;
use crate::error::Result;
use crate::output::{OutputContext, SourceId};

/// Where a chunk landed on the device timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

/// Schedules inbound buffers back-to-back on a shared output context.
#[derive(Debug)]
pub struct StreamingQueue {
    ctx: OutputContext,
    next_start_time: f64,
    active: BTreeSet<SourceId>,
}

impl StreamingQueue {
    pub fn new(ctx: OutputContext) -> Self {
        Self {
            ctx,
            next_start_time: 0.0,
            active: BTreeSet::new(),
        }
    }

    /// Schedule `buffer` right after everything already queued.
    pub fn enqueue(&mut self, buffer: PlaybackBuffer) -> Result<ScheduledChunk> {
        let buffer = self.ctx.prepare(buffer)?;
        let duration = buffer.duration_secs();
        let start_at = self.next_start_time.max(self.ctx.current_time());

        let id = self.ctx.start(&buffer, start_at, 0.0);
        self.next_start_time = start_at + duration;
        self.active.insert(id);

        debug!(%id, start_at, duration, queued = self.active.len(), "chunk enqueued");
        Ok(ScheduledChunk {
            id,
            start_at,
            duration,
        })
    }

    /// Forget a source that finished. Returns `false` for ids this queue does
    /// not own (stale or foreign notifications).
    pub fn handle_ended(&mut self, id: SourceId) -> bool {
        self.active.remove(&id)
    }

    /// Barge-in: silence everything queued and restart the timeline.
    pub fn interrupt(&mut self) {
        if !self.active.is_empty() {
            debug!(stopped = self.active.len(), "queue interrupted");
        }
        for id in std::mem::take(&mut self.active) {
            self.ctx.stop(id);
        }
        self.next_start_time = 0.0;
    }

    /// Unconditional teardown. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.interrupt();
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn is_playing(&self) -> bool {
        !self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode::SPEECH_SAMPLE_RATE;
    use approx::assert_relative_eq;

    fn secs(d: f64) -> PlaybackBuffer {
        PlaybackBuffer::silence(d, SPEECH_SAMPLE_RATE)
    }

    #[test]
    fn chunks_are_scheduled_back_to_back() {
        let (ctx, _renderer) = OutputContext::new(SPEECH_SAMPLE_RATE);
        let mut queue = StreamingQueue::new(ctx);

        let starts: Vec<f64> = [1.0, 0.5, 2.0]
            .into_iter()
            .map(|d| queue.enqueue(secs(d)).unwrap().start_at)
            .collect();

        assert_eq!(starts, vec![0.0, 1.0, 1.5]);
        assert_relative_eq!(queue.next_start_time(), 3.5);
        assert_eq!(queue.active_len(), 3);
    }

    #[test]
    fn late_chunk_starts_now() {
        let (ctx, mut renderer) = OutputContext::new(SPEECH_SAMPLE_RATE);
        let mut queue = StreamingQueue::new(ctx);

        queue.enqueue(secs(0.5)).unwrap();
        renderer.advance(2.0);
        let late = queue.enqueue(secs(0.5)).unwrap();
        assert_relative_eq!(late.start_at, 2.0);
    }

    #[test]
    fn interrupt_clears_and_resets_the_watermark() {
        let (ctx, mut renderer) = OutputContext::new(SPEECH_SAMPLE_RATE);
        let mut queue = StreamingQueue::new(ctx.clone());
        for d in [1.0, 1.0, 1.0] {
            queue.enqueue(secs(d)).unwrap();
        }

        queue.interrupt();
        assert_eq!(queue.active_len(), 0);
        assert_eq!(queue.next_start_time(), 0.0);

        renderer.advance(0.25);
        assert_eq!(renderer.active_voices(), 0);
        let next = queue.enqueue(secs(0.5)).unwrap();
        assert_relative_eq!(next.start_at, 0.25);
        assert!(ctx.drain_ended().is_empty());
    }

    #[test]
    fn ended_ids_are_removed_once() {
        let (ctx, mut renderer) = OutputContext::new(SPEECH_SAMPLE_RATE);
        let mut queue = StreamingQueue::new(ctx.clone());
        let first = queue.enqueue(secs(0.1)).unwrap();
        queue.enqueue(secs(0.1)).unwrap();

        renderer.advance(0.15);
        let ended = ctx.drain_ended();
        assert_eq!(ended, vec![first.id]);
        assert!(queue.handle_ended(first.id));
        assert!(!queue.handle_ended(first.id));
        assert_eq!(queue.active_len(), 1);
    }

    #[test]
    fn stop_is_idempotent() {
        let (ctx, _renderer) = OutputContext::new(SPEECH_SAMPLE_RATE);
        let mut queue = StreamingQueue::new(ctx);
        queue.stop();
        queue.enqueue(secs(0.2)).unwrap();
        queue.stop();
        queue.stop();
        assert!(!queue.is_playing());
    }
}
