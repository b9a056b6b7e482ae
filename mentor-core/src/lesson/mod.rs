//! Lesson playback scheduler.
//!
//! Plays one pre-rendered narration buffer on the shared output context and
//! pauses it at precomputed timestamps to ask comprehension questions.
//!
//! ```text
//! Idle ──play──► Talking ──checkpoint──► AwaitingAnswer ──begin_response──► Responding
//!   ▲              │  ▲                                                        │
//!   │            pause│ play                                     finish_response│
//!   │              ▼  │                                                        │
//!   │            Paused                                                        │
//!   └──────── track end, no checkpoints left ◄─────── Talking ◄───────────────┘
//! ```
//!
//! The host calls [`LessonPlayer::tick`] at least every 100 ms and forwards
//! renderer completions to [`LessonPlayer::handle_ended`]. At most one
//! checkpoint fires per tick: checkpoints are never skipped, but one may fire
//! a tick late when two sit closer together than the poll interval.

pub mod script;

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audio::decode::PlaybackBuffer;
use crate::error::{MentorError, Result};
use crate::output::{OutputContext, SourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonState {
    Idle,
    Talking,
    Paused,
    AwaitingAnswer,
    Responding,
}

/// A comprehension question pinned to a time in the narration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub time_secs: f64,
    pub question: String,
}

/// Accumulated offset plus the device time the current source started.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackCursor {
    pub pause_time: f64,
    pub started_at: f64,
}

/// Something the host should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum LessonEvent {
    /// Playback paused on a question; answer it via `begin_response`.
    Checkpoint(Checkpoint),
    /// Track played to the end with no questions left.
    Finished,
    /// Main narration resumed after a response.
    Resumed,
    /// Response finished but the narration and its questions are spent.
    SegmentExhausted,
}

pub struct LessonPlayer {
    ctx: OutputContext,
    buffer: Option<Arc<PlaybackBuffer>>,
    checkpoints: VecDeque<Checkpoint>,
    cursor: PlaybackCursor,
    position: f64,
    state: LessonState,
    source: Option<SourceId>,
    follow_up: Option<SourceId>,
    pending: Option<Checkpoint>,
}

impl LessonPlayer {
    pub fn new(ctx: OutputContext) -> Self {
        Self {
            ctx,
            buffer: None,
            checkpoints: VecDeque::new(),
            cursor: PlaybackCursor::default(),
            position: 0.0,
            state: LessonState::Idle,
            source: None,
            follow_up: None,
            pending: None,
        }
    }

    /// Replace the narration and its checkpoints. Does not start playback.
    ///
    /// `checkpoints` are consumed in the order given; callers sort them.
    pub fn load(&mut self, buffer: PlaybackBuffer, checkpoints: Vec<Checkpoint>) -> Result<()> {
        let buffer = self.ctx.prepare(buffer)?;
        self.stop_sources();
        info!(
            duration = buffer.duration_secs(),
            checkpoints = checkpoints.len(),
            "lesson loaded"
        );
        self.buffer = Some(buffer);
        self.checkpoints = checkpoints.into();
        self.cursor = PlaybackCursor::default();
        self.position = 0.0;
        self.pending = None;
        self.state = LessonState::Idle;
        Ok(())
    }

    /// Start the narration at `from` (or the paused offset).
    ///
    /// # Errors
    /// `InvalidState` with no lesson loaded or while a question is open.
    pub fn play(&mut self, from: Option<f64>) -> Result<()> {
        if matches!(
            self.state,
            LessonState::AwaitingAnswer | LessonState::Responding
        ) {
            return Err(self.invalid("a lesson not waiting on an answer"));
        }
        self.start_main(from)
    }

    fn start_main(&mut self, from: Option<f64>) -> Result<()> {
        let buffer = match &self.buffer {
            Some(buffer) => Arc::clone(buffer),
            None => return Err(self.invalid("a loaded lesson")),
        };
        self.stop_sources();

        let offset = from
            .unwrap_or(self.cursor.pause_time)
            .clamp(0.0, buffer.duration_secs());
        let now = self.ctx.current_time();
        self.cursor = PlaybackCursor {
            pause_time: offset,
            started_at: now,
        };
        self.position = offset;
        self.source = Some(self.ctx.start(&buffer, now, offset));
        self.state = LessonState::Talking;
        debug!(offset, "lesson playing");
        Ok(())
    }

    /// Advance the position and fire at most one checkpoint.
    pub fn tick(&mut self) -> Option<LessonEvent> {
        if self.state != LessonState::Talking {
            return None;
        }
        let position = self.live_position();
        self.position = position;

        if self
            .checkpoints
            .front()
            .is_some_and(|head| position >= head.time_secs)
        {
            let checkpoint = self.checkpoints.pop_front()?;
            return Some(self.hold_on(checkpoint, position));
        }
        if position >= self.duration() {
            return Some(self.reach_end());
        }
        None
    }

    /// Route a natural-completion notification. Ids that are not the current
    /// narration or follow-up are ignored.
    pub fn handle_ended(&mut self, id: SourceId) -> Option<LessonEvent> {
        if self.source == Some(id) {
            self.source = None;
            if self.state == LessonState::Talking {
                return Some(self.reach_end());
            }
            return None;
        }
        if self.follow_up == Some(id) {
            self.follow_up = None;
            if self.state == LessonState::Responding {
                return self.finish_response().ok();
            }
        }
        None
    }

    /// Pause the narration. A no-op unless talking.
    pub fn pause(&mut self) {
        if self.state != LessonState::Talking {
            return;
        }
        let position = self.live_position();
        self.stop_sources();
        self.cursor.pause_time = position;
        self.position = position;
        self.state = LessonState::Paused;
        debug!(position, "lesson paused");
    }

    /// Move to `offset` seconds, clamped to the track.
    pub fn seek(&mut self, offset: f64) -> Result<()> {
        let offset = offset.clamp(0.0, self.duration());
        self.position = offset;
        if self.state == LessonState::Talking {
            self.start_main(Some(offset))
        } else {
            self.cursor.pause_time = offset;
            Ok(())
        }
    }

    /// Take the pending question and move to `Responding`.
    pub fn begin_response(&mut self) -> Result<Checkpoint> {
        if self.state != LessonState::AwaitingAnswer {
            return Err(self.invalid("awaiting_answer"));
        }
        let checkpoint = self
            .pending
            .take()
            .ok_or_else(|| self.invalid("a pending checkpoint"))?;
        self.state = LessonState::Responding;
        Ok(checkpoint)
    }

    /// Play a one-shot follow-up clip. The narration resumes when it ends.
    pub fn play_follow_up(&mut self, clip: PlaybackBuffer) -> Result<SourceId> {
        if self.state != LessonState::Responding {
            return Err(self.invalid("responding"));
        }
        let clip = self.ctx.prepare(clip)?;
        if let Some(previous) = self.follow_up.take() {
            self.ctx.stop(previous);
        }
        let id = self.ctx.start(&clip, self.ctx.current_time(), 0.0);
        debug!(%id, duration = clip.duration_secs(), "follow-up playing");
        self.follow_up = Some(id);
        Ok(id)
    }

    /// Leave `Responding`: resume the narration, or report that this segment
    /// has nothing left to play.
    pub fn finish_response(&mut self) -> Result<LessonEvent> {
        if self.state != LessonState::Responding {
            return Err(self.invalid("responding"));
        }
        if let Some(id) = self.follow_up.take() {
            self.ctx.stop(id);
        }
        if self.checkpoints.is_empty() && self.cursor.pause_time >= self.duration() {
            self.finish_track();
            return Ok(LessonEvent::SegmentExhausted);
        }
        self.start_main(None)?;
        Ok(LessonEvent::Resumed)
    }

    /// Stop playback and reset the cursor. Keeps the loaded lesson.
    pub fn stop(&mut self) {
        if self.state == LessonState::Idle && self.source.is_none() && self.follow_up.is_none() {
            return;
        }
        self.stop_sources();
        self.cursor = PlaybackCursor::default();
        self.position = 0.0;
        self.pending = None;
        self.state = LessonState::Idle;
        info!("lesson stopped");
    }

    /// Stop and drop the loaded lesson.
    pub fn clear(&mut self) {
        self.stop();
        self.buffer = None;
        self.checkpoints.clear();
        self.cursor = PlaybackCursor::default();
        self.position = 0.0;
    }

    pub fn state(&self) -> LessonState {
        self.state
    }

    /// Current position in seconds, live while talking.
    pub fn position(&self) -> f64 {
        if self.state == LessonState::Talking {
            self.live_position()
        } else {
            self.position
        }
    }

    pub fn duration(&self) -> f64 {
        self.buffer.as_ref().map_or(0.0, |b| b.duration_secs())
    }

    pub fn pause_time(&self) -> f64 {
        self.cursor.pause_time
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.cursor
    }

    pub fn pending_question(&self) -> Option<&Checkpoint> {
        self.pending.as_ref()
    }

    pub fn remaining_checkpoints(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_loaded(&self) -> bool {
        self.buffer.is_some()
    }

    /// Any state other than `Idle`.
    pub fn is_active(&self) -> bool {
        self.state != LessonState::Idle
    }

    /// The narration buffer, if loaded.
    pub fn buffer(&self) -> Option<&Arc<PlaybackBuffer>> {
        self.buffer.as_ref()
    }

    fn live_position(&self) -> f64 {
        let elapsed = (self.ctx.current_time() - self.cursor.started_at).max(0.0);
        (self.cursor.pause_time + elapsed).min(self.duration())
    }

    fn hold_on(&mut self, checkpoint: Checkpoint, position: f64) -> LessonEvent {
        self.stop_sources();
        self.cursor.pause_time = position;
        self.position = position;
        self.state = LessonState::AwaitingAnswer;
        info!(at = position, scheduled = checkpoint.time_secs, "checkpoint reached");
        debug!(question = checkpoint.question.as_str(), "awaiting answer");
        self.pending = Some(checkpoint.clone());
        LessonEvent::Checkpoint(checkpoint)
    }

    fn reach_end(&mut self) -> LessonEvent {
        let end = self.duration();
        match self.checkpoints.pop_front() {
            Some(checkpoint) => self.hold_on(checkpoint, end),
            None => {
                self.finish_track();
                info!(duration = end, "lesson finished");
                LessonEvent::Finished
            }
        }
    }

    fn finish_track(&mut self) {
        self.stop_sources();
        self.position = self.duration();
        self.cursor.pause_time = 0.0;
        self.state = LessonState::Idle;
    }

    fn stop_sources(&mut self) {
        if let Some(id) = self.source.take() {
            self.ctx.stop(id);
        }
        if let Some(id) = self.follow_up.take() {
            self.ctx.stop(id);
        }
    }

    fn invalid(&self, expected: &'static str) -> MentorError {
        MentorError::InvalidState {
            expected,
            found: format!("{:?}", self.state),
        }
    }
}
