//! `MentorEngine` — top-level controller.
//!
//! ## Ownership
//!
//! ```text
//!                    ┌──────────── OutputContext (shared clock) ───────────┐
//!                    │                     │                               │
//!              LessonPlayer          StreamingQueue (in LiveSession)   chat narration
//! ```
//!
//! The engine owns every scheduler and the live session, and is driven from
//! one event loop: the host calls [`MentorEngine::tick`] every
//! `tick_interval` and reacts to [`EngineEvent`]s from
//! [`MentorEngine::subscribe`]. Provider requests and call starts are spawned
//! onto the tokio runtime, so every method that issues one must be called
//! from within it.
//!
//! ## Exclusivity
//!
//! Only one pipeline plays at a time. Starting a call stops the lesson and
//! chat narration; starting or resuming a lesson hangs up the call and
//! silences chat narration. A chat reply is only voiced while no lesson is
//! playing or being prepared and no call is up.

mod jobs;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::audio::decode::{decode_chunk, PlaybackBuffer, CAPTURE_SAMPLE_RATE, SPEECH_SAMPLE_RATE};
use crate::audio::Microphone;
use crate::buffering::chunk::AudioChunk;
use crate::buffering::frame::DEFAULT_FRAME_SAMPLES;
use crate::error::{MentorError, Result};
use crate::ipc::events::{EngineEvent, PendingTask};
use crate::lesson::{Checkpoint, LessonEvent, LessonPlayer, LessonState};
use crate::live::{CloseReason, LiveConnector, LiveSession, LiveSetup, LiveState, SessionNotice};
use crate::output::{OutputContext, SourceId};
use crate::provider::{Attachment, ProviderHandle};
use crate::tutor::{prompts, PreparedLesson, Tutor, TutorConfig};

use jobs::JobOutcome;

/// Broadcast channel capacity: events buffered for slow subscribers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `MentorEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rate the output device is opened at (Hz). Default: 24000.
    pub output_sample_rate: u32,
    /// Rate capture frames are sent at (Hz). Default: 16000.
    pub capture_sample_rate: u32,
    /// Samples per capture frame. Default: 4096.
    pub frame_samples: usize,
    /// How often the host should call `tick()`. Default: 50 ms.
    pub tick_interval: Duration,
    /// Upper bound on any single provider request. Default: 45 s.
    pub request_timeout: Duration,
    /// Request a follow-on segment when a lesson runs out. Default: off.
    pub continuation: bool,
    /// Segments per lesson when continuation is on. Default: 3.
    pub max_segments: u32,
    pub voice: String,
    pub text_model: String,
    pub speech_model: String,
    pub live_model: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: SPEECH_SAMPLE_RATE,
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            frame_samples: DEFAULT_FRAME_SAMPLES,
            tick_interval: Duration::from_millis(50),
            request_timeout: Duration::from_secs(45),
            continuation: false,
            max_segments: 3,
            voice: "Kore".into(),
            text_model: "gemini-2.5-flash".into(),
            speech_model: "gemini-2.5-flash-preview-tts".into(),
            live_model: "gemini-2.0-flash-live-001".into(),
        }
    }
}

pub struct MentorEngine {
    config: EngineConfig,
    ctx: OutputContext,
    tutor: Tutor,
    lesson: LessonPlayer,
    live: LiveSession,
    events: broadcast::Sender<EngineEvent>,
    jobs_tx: mpsc::UnboundedSender<JobOutcome>,
    jobs_rx: mpsc::UnboundedReceiver<JobOutcome>,
    in_flight: usize,
    /// Bumped whenever the user abandons the current lesson or call.
    epoch: u64,
    topic: Option<String>,
    segment: u32,
    answered: Vec<(String, String)>,
    /// A lesson request of the current epoch is in flight.
    lesson_pending: bool,
    narration: Option<SourceId>,
    last_narration: Option<Arc<PlaybackBuffer>>,
}

impl MentorEngine {
    pub fn new(
        config: EngineConfig,
        ctx: OutputContext,
        provider: ProviderHandle,
        microphone: Arc<dyn Microphone>,
        connector: Arc<dyn LiveConnector>,
    ) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAP);
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();

        let tutor = Tutor::new(
            provider,
            TutorConfig {
                voice: config.voice.clone(),
                request_timeout: config.request_timeout,
            },
        );
        let setup = LiveSetup {
            model: config.live_model.clone(),
            voice: config.voice.clone(),
            system_instruction: prompts::call_persona(),
        };
        let live = LiveSession::new(ctx.clone(), microphone, connector, setup)
            .with_frame_len(config.frame_samples)
            .with_input_rate(config.capture_sample_rate);

        info!(
            provider = tutor.provider_name(),
            output_rate = ctx.sample_rate(),
            "engine ready"
        );

        Self {
            lesson: LessonPlayer::new(ctx.clone()),
            config,
            ctx,
            tutor,
            live,
            events,
            jobs_tx,
            jobs_rx,
            in_flight: 0,
            epoch: 0,
            topic: None,
            segment: 0,
            answered: Vec::new(),
            lesson_pending: false,
            narration: None,
            last_narration: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // ── chat ────────────────────────────────────────────────────────────

    /// Send a chat message. The reply arrives as `EngineEvent::Message`.
    pub fn send_message(&mut self, text: String, attachment: Option<Attachment>) {
        let tutor = self.tutor.clone();
        self.spawn_job(PendingTask::Reply, async move {
            JobOutcome::Reply(tutor.send(&text, attachment).await)
        });
    }

    // ── lessons ─────────────────────────────────────────────────────────

    /// Abandon any lesson or call and prepare a narrated lesson on `topic`.
    pub fn start_lesson(&mut self, topic: String) {
        self.epoch += 1;
        self.hang_up();
        self.stop_narration();
        self.lesson.clear();
        self.answered.clear();
        self.topic = Some(topic.clone());
        info!("lesson requested");
        debug!(topic = topic.as_str(), "lesson topic");
        self.request_segment(topic, 1);
    }

    fn request_segment(&mut self, topic: String, segment: u32) {
        let tutor = self.tutor.clone();
        let epoch = self.epoch;
        let answered = self.answered.clone();
        self.lesson_pending = true;
        let task = if segment == 1 {
            PendingTask::Lesson
        } else {
            PendingTask::NextSegment
        };
        self.spawn_job(task, async move {
            let result = if segment == 1 {
                tutor.prepare_lesson(&topic).await
            } else {
                tutor.next_segment(&topic, &answered).await
            };
            JobOutcome::Lesson {
                epoch,
                segment,
                result,
            }
        });
    }

    /// Answer the pending checkpoint question.
    ///
    /// # Errors
    /// `InvalidState` when no question is pending.
    pub fn answer(&mut self, text: String) -> Result<()> {
        let checkpoint = self.lesson.begin_response()?;
        self.emit_lesson_state();
        self.answered
            .push((checkpoint.question.clone(), text.clone()));

        let tutor = self.tutor.clone();
        let epoch = self.epoch;
        self.spawn_job(PendingTask::FollowUp, async move {
            let result = tutor.follow_up(&checkpoint.question, &text).await;
            JobOutcome::FollowUp { epoch, result }
        });
        Ok(())
    }

    pub fn pause(&mut self) {
        self.lesson.pause();
        self.emit_lesson_state();
    }

    pub fn resume(&mut self) -> Result<()> {
        self.hang_up();
        self.stop_narration();
        self.lesson.play(None)?;
        self.emit_lesson_state();
        Ok(())
    }

    pub fn seek(&mut self, secs: f64) -> Result<()> {
        self.lesson.seek(secs)?;
        self.emit_lesson_state();
        Ok(())
    }

    /// Stop the lesson and drop any lesson request still in flight.
    pub fn stop_lesson(&mut self) {
        self.epoch += 1;
        self.lesson_pending = false;
        self.lesson.stop();
        self.stop_narration();
        self.emit_lesson_state();
    }

    // ── calls ───────────────────────────────────────────────────────────

    /// Stop any lesson and start opening a live voice call.
    ///
    /// The microphone and transport open in the background; the outcome is
    /// applied by `tick()`. A failure (`Permission` or `Connection`) leaves
    /// the call idle and is reported as `EngineEvent::Error`.
    pub fn start_call(&mut self) {
        self.epoch += 1;
        self.lesson_pending = false;
        if self.lesson.is_active() {
            self.lesson.stop();
            self.emit_lesson_state();
        }
        self.stop_narration();

        let pending = self.live.begin_start();
        self.emit(EngineEvent::CallState {
            state: LiveState::Connecting,
        });
        self.spawn(async move { JobOutcome::Call(pending.open().await) });
    }

    /// End the call, if any.
    pub fn hang_up(&mut self) {
        if !self.live.is_active() {
            return;
        }
        self.live.stop();
        self.emit(EngineEvent::CallClosed {
            reason: CloseReason::Requested,
        });
        self.emit(EngineEvent::CallState {
            state: self.live.state(),
        });
    }

    // ── event loop ──────────────────────────────────────────────────────

    /// Advance every pipeline once. Call every `tick_interval`.
    pub fn tick(&mut self) {
        for id in self.ctx.drain_ended() {
            self.dispatch_ended(id);
        }
        if let Some(event) = self.lesson.tick() {
            self.on_lesson_event(event);
        }
        for notice in self.live.poll() {
            self.on_session_notice(notice);
        }
        while let Ok(job) = self.jobs_rx.try_recv() {
            self.apply(job);
        }
    }

    /// Wait for the next provider result and apply it.
    pub async fn next_job(&mut self) {
        if let Some(job) = self.jobs_rx.recv().await {
            self.apply(job);
        }
    }

    /// Write the most recent narration to a WAV file.
    pub fn save_narration(&self, path: &Path) -> Result<()> {
        let buffer = self
            .last_narration
            .as_ref()
            .ok_or(MentorError::InvalidState {
                expected: "a narration to save",
                found: "none".into(),
            })?;
        buffer.write_wav(path)?;
        info!(path = %path.display(), secs = buffer.duration_secs(), "narration saved");
        Ok(())
    }

    /// Stop everything.
    pub fn shutdown(&mut self) {
        self.epoch += 1;
        self.lesson_pending = false;
        self.live.stop();
        self.lesson.clear();
        self.stop_narration();
        info!("engine shut down");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn lesson(&self) -> &LessonPlayer {
        &self.lesson
    }

    pub fn live(&self) -> &LiveSession {
        &self.live
    }

    pub fn tutor(&self) -> &Tutor {
        &self.tutor
    }

    pub fn pending_question(&self) -> Option<&Checkpoint> {
        self.lesson.pending_question()
    }

    /// Provider requests still outstanding.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    // ── internals ───────────────────────────────────────────────────────

    fn spawn_job<F>(&mut self, task: PendingTask, job: F)
    where
        F: std::future::Future<Output = JobOutcome> + Send + 'static,
    {
        self.emit(EngineEvent::Thinking { task });
        self.spawn(job);
    }

    fn spawn<F>(&mut self, job: F)
    where
        F: std::future::Future<Output = JobOutcome> + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.jobs_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(job.await);
        });
    }

    fn apply(&mut self, job: JobOutcome) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if job.epoch().is_some_and(|e| e != self.epoch) {
            debug!(epoch = self.epoch, "dropping stale provider result");
            return;
        }

        match job {
            JobOutcome::Reply(message) => {
                if let Some(chunk) = &message.audio {
                    if let Err(e) = self.narrate(chunk) {
                        warn!("reply narration unavailable: {e}");
                    }
                }
                self.emit(EngineEvent::Message { message });
            }
            JobOutcome::Lesson {
                segment, result, ..
            } => {
                self.lesson_pending = false;
                match result {
                    Ok(prepared) => {
                        if let Err(e) = self.begin_segment(prepared, segment) {
                            warn!("lesson failed to start: {e}");
                            self.lesson.clear();
                            self.emit_error(&e);
                        }
                    }
                    Err(e) => {
                        warn!("lesson request failed: {e}");
                        self.emit_error(&e);
                    }
                }
            }
            JobOutcome::FollowUp { result, .. } => {
                if self.lesson.state() != LessonState::Responding {
                    return;
                }
                let played = result.and_then(|clip| self.lesson.play_follow_up(clip));
                if let Err(e) = played {
                    // No reaction clip: carry on with the narration.
                    warn!("follow-up unavailable: {e}");
                    self.finish_response();
                }
            }
            JobOutcome::Call(outcome) => match self.live.finish_start(outcome) {
                Some(Ok(())) => self.emit(EngineEvent::CallState {
                    state: self.live.state(),
                }),
                Some(Err(e)) => {
                    warn!("call failed to start: {e}");
                    self.emit(EngineEvent::CallState {
                        state: self.live.state(),
                    });
                    self.emit_error(&e);
                }
                None => debug!("superseded call start dropped"),
            },
        }
    }

    fn begin_segment(&mut self, prepared: PreparedLesson, segment: u32) -> Result<()> {
        self.stop_narration();
        let checkpoints = prepared.checkpoints.len();
        self.lesson.load(prepared.narration, prepared.checkpoints)?;
        self.lesson.play(Some(0.0))?;
        self.segment = segment;
        self.last_narration = self.lesson.buffer().cloned();
        self.emit(EngineEvent::LessonStarted {
            topic: prepared.topic,
            duration_secs: self.lesson.duration(),
            checkpoints,
            segment,
        });
        self.emit_lesson_state();
        Ok(())
    }

    fn finish_response(&mut self) {
        match self.lesson.finish_response() {
            Ok(event) => self.on_lesson_event(event),
            Err(e) => self.emit_error(&e),
        }
    }

    /// Decode a reply narration, keep it for saving, and play it when
    /// neither a lesson (playing or being prepared) nor a call owns the
    /// output.
    fn narrate(&mut self, chunk: &AudioChunk) -> Result<()> {
        let buffer = self.ctx.prepare(decode_chunk(chunk)?)?;
        self.last_narration = Some(Arc::clone(&buffer));
        if self.lesson_pending || self.lesson.is_active() || self.live.is_active() {
            return Ok(());
        }
        self.stop_narration();
        self.narration = Some(self.ctx.start(&buffer, self.ctx.current_time(), 0.0));
        Ok(())
    }

    fn stop_narration(&mut self) {
        if let Some(id) = self.narration.take() {
            self.ctx.stop(id);
        }
    }

    fn dispatch_ended(&mut self, id: SourceId) {
        if self.narration == Some(id) {
            self.narration = None;
            return;
        }
        if let Some(event) = self.lesson.handle_ended(id) {
            self.on_lesson_event(event);
            return;
        }
        if !self.live.handle_ended(id) {
            debug!(%id, "ended source has no owner");
        }
    }

    fn on_lesson_event(&mut self, event: LessonEvent) {
        match event {
            LessonEvent::Checkpoint(checkpoint) => {
                self.emit(EngineEvent::Checkpoint {
                    question: checkpoint.question,
                    time_secs: checkpoint.time_secs,
                });
            }
            LessonEvent::Finished => self.emit(EngineEvent::LessonFinished),
            LessonEvent::Resumed => {}
            LessonEvent::SegmentExhausted => {
                let next = self.segment + 1;
                match self.topic.clone() {
                    Some(topic) if self.config.continuation && next <= self.config.max_segments => {
                        self.request_segment(topic, next);
                    }
                    _ => self.emit(EngineEvent::LessonFinished),
                }
            }
        }
        self.emit_lesson_state();
    }

    fn on_session_notice(&mut self, notice: SessionNotice) {
        match notice {
            SessionNotice::Opened => self.emit(EngineEvent::CallState {
                state: self.live.state(),
            }),
            SessionNotice::Interrupted => self.emit(EngineEvent::CallInterrupted),
            SessionNotice::TurnComplete => {}
            SessionNotice::Closed(reason) => {
                info!(?reason, "call ended");
                self.emit(EngineEvent::CallClosed { reason });
                self.emit(EngineEvent::CallState {
                    state: self.live.state(),
                });
            }
        }
    }

    fn emit_lesson_state(&self) {
        self.emit(EngineEvent::LessonState {
            state: self.lesson.state(),
            position_secs: self.lesson.position(),
        });
    }

    fn emit_error(&self, error: &MentorError) {
        self.emit(EngineEvent::Error {
            message: error.to_string(),
        });
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::CaptureStream;
    use crate::buffering::AudioProducer;
    use crate::live::{LiveEvent, LiveLink};
    use crate::provider::StubProvider;

    struct NoMicrophone;

    impl Microphone for NoMicrophone {
        fn open(&self, _producer: AudioProducer) -> Result<Box<dyn CaptureStream>> {
            Err(MentorError::Permission("no microphone".into()))
        }
    }

    struct NoNetwork;

    impl LiveConnector for NoNetwork {
        fn connect(
            &self,
            _setup: &LiveSetup,
            _events: crossbeam_channel::Sender<LiveEvent>,
        ) -> Result<Box<dyn LiveLink>> {
            Err(MentorError::Connection("offline".into()))
        }
    }

    fn engine(config: EngineConfig) -> (MentorEngine, broadcast::Receiver<EngineEvent>) {
        let (ctx, _renderer) = OutputContext::new(config.output_sample_rate);
        let engine = MentorEngine::new(
            config,
            ctx,
            ProviderHandle::new(StubProvider::new()),
            Arc::new(NoMicrophone),
            Arc::new(NoNetwork),
        );
        let events = engine.subscribe();
        (engine, events)
    }

    fn drain(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn exhausted_segment_requests_the_next_one_when_continuing() {
        let (mut engine, mut events) = engine(EngineConfig {
            continuation: true,
            max_segments: 2,
            ..EngineConfig::default()
        });
        engine.start_lesson("gravity".into());
        engine.next_job().await;
        drain(&mut events);

        engine.on_lesson_event(LessonEvent::SegmentExhausted);
        assert_eq!(engine.in_flight(), 1);
        engine.next_job().await;

        let events = drain(&mut events);
        assert!(events.contains(&EngineEvent::Thinking {
            task: PendingTask::NextSegment
        }));
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::LessonStarted { segment: 2, .. })));

        // Segment budget spent: the lesson ends instead.
        engine.on_lesson_event(LessonEvent::SegmentExhausted);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn exhausted_segment_finishes_without_continuation() {
        let (mut engine, mut events) = engine(EngineConfig::default());
        engine.start_lesson("gravity".into());
        engine.next_job().await;
        drain(&mut events);

        engine.on_lesson_event(LessonEvent::SegmentExhausted);
        assert_eq!(engine.in_flight(), 0);
        assert!(drain(&mut events).contains(&EngineEvent::LessonFinished));
    }

    #[tokio::test]
    async fn starting_a_call_discards_a_pending_lesson() {
        let (mut engine, _events) = engine(EngineConfig::default());
        engine.start_lesson("gravity".into());
        engine.start_call();
        assert_eq!(engine.in_flight(), 2);

        engine.next_job().await;
        engine.next_job().await;
        assert!(!engine.lesson().is_loaded());
        assert_eq!(engine.live().state(), LiveState::Idle);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn chat_narration_waits_for_a_lesson_being_prepared() {
        let (mut engine, _events) = engine(EngineConfig::default());
        engine.start_lesson("gravity".into());
        assert!(engine.lesson_pending);

        engine.send_message("hello".into(), None);
        engine.next_job().await;
        engine.next_job().await;
        assert!(!engine.lesson_pending);
        assert!(engine.narration.is_none());
        assert!(engine.lesson().is_active());
    }

    #[test]
    fn saving_without_narration_is_an_invalid_state() {
        let (engine, _events) = engine(EngineConfig::default());
        let err = engine
            .save_narration(Path::new("unused.wav"))
            .unwrap_err();
        assert!(matches!(err, MentorError::InvalidState { .. }));
    }
}
