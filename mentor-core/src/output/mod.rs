//! Shared audio output context.
//!
//! ## Architecture
//!
//! ```text
//! LessonPlayer / StreamingQueue ──start/stop──► crossbeam Sender<RenderCommand>
//!                                                       │
//!                                         Renderer (owned by the output callback)
//!                                                       │
//!                      frames_rendered (AtomicU64) ◄────┤────► ended: Sender<SourceId>
//! ```
//!
//! The device clock is the number of frames the renderer has produced, so
//! `current_time()` advances exactly as audio leaves the mixer. Control-side
//! code never touches the voice list: it sends commands and later drains
//! natural-completion notifications with `drain_ended()`.
//!
//! The same `Renderer` runs inside a cpal output callback (`device`) or is
//! driven by hand with `Renderer::advance` for offline rendering and tests.

pub mod device;
pub mod renderer;

pub use renderer::Renderer;

use std::fmt;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

use crate::audio::decode::PlaybackBuffer;
use crate::error::Result;

/// Identity of one scheduled playback. Never reused within a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

pub(crate) enum RenderCommand {
    Start {
        id: SourceId,
        buffer: Arc<PlaybackBuffer>,
        start_frame: u64,
        offset_frames: usize,
    },
    Stop(SourceId),
    StopAll,
}

struct ClockShared {
    sample_rate: u32,
    frames_rendered: AtomicU64,
    next_id: AtomicU64,
}

/// Cloneable handle to the output mixer and its clock.
#[derive(Clone)]
pub struct OutputContext {
    clock: Arc<ClockShared>,
    commands: Sender<RenderCommand>,
    ended: Receiver<SourceId>,
}

impl fmt::Debug for OutputContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputContext")
            .field("sample_rate", &self.clock.sample_rate)
            .field("current_time", &self.current_time())
            .finish_non_exhaustive()
    }
}

impl OutputContext {
    /// Create a context running at `sample_rate` and the renderer that feeds it.
    pub fn new(sample_rate: u32) -> (Self, Renderer) {
        let clock = Arc::new(ClockShared {
            sample_rate,
            frames_rendered: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        });
        let (command_tx, command_rx) = unbounded();
        let (ended_tx, ended_rx) = unbounded();

        let context = Self {
            clock: Arc::clone(&clock),
            commands: command_tx,
            ended: ended_rx,
        };
        let renderer = Renderer::new(clock, command_rx, ended_tx);
        (context, renderer)
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate
    }

    /// Device clock in seconds.
    pub fn current_time(&self) -> f64 {
        self.clock.frames_rendered.load(Ordering::Acquire) as f64 / self.clock.sample_rate as f64
    }

    /// Adapt a decoded buffer to this context's sample rate.
    pub fn prepare(&self, buffer: PlaybackBuffer) -> Result<Arc<PlaybackBuffer>> {
        Ok(Arc::new(buffer.into_rate(self.clock.sample_rate)?))
    }

    /// Schedule `buffer` to start at device time `when` (seconds), skipping the
    /// first `offset` seconds of it. A `when` in the past starts immediately.
    ///
    /// The buffer must already be at the context rate (see [`prepare`](Self::prepare)).
    pub fn start(&self, buffer: &Arc<PlaybackBuffer>, when: f64, offset: f64) -> SourceId {
        debug_assert_eq!(buffer.sample_rate, self.clock.sample_rate);
        let id = SourceId(self.clock.next_id.fetch_add(1, Ordering::Relaxed));
        let rate = self.clock.sample_rate as f64;
        let start_frame = (when.max(0.0) * rate).round() as u64;
        let offset_frames = ((offset.max(0.0) * rate).round() as usize).min(buffer.len());

        debug!(%id, when, offset, "source scheduled");
        let _ = self.commands.send(RenderCommand::Start {
            id,
            buffer: Arc::clone(buffer),
            start_frame,
            offset_frames,
        });
        id
    }

    /// Stop one source. Stopping an ended or unknown source is a no-op.
    pub fn stop(&self, id: SourceId) {
        let _ = self.commands.send(RenderCommand::Stop(id));
    }

    /// Stop every source on the context.
    pub fn stop_all(&self) {
        let _ = self.commands.send(RenderCommand::StopAll);
    }

    /// Sources that finished playing naturally since the last call.
    ///
    /// Explicitly stopped sources are not reported.
    pub fn drain_ended(&self) -> Vec<SourceId> {
        self.ended.try_iter().collect()
    }
}
