//! Live duplex voice session controller.
//!
//! ## Data flow
//!
//! ```text
//! Microphone ──► SPSC ring ──► RateConverter(→16 kHz) ──► FrameAccumulator(4096)
//!                                                               │
//!                                           PCM16 + base64 ──► LiveLink::send
//!
//! LiveConnector events ──► LiveEvent::Audio ──► decode @24 kHz ──► StreamingQueue
//!                      └─► LiveEvent::Interrupted ──► StreamingQueue::interrupt
//! ```
//!
//! [`LiveSession::poll`] runs on the host's event loop. It drains inbound
//! events, then pumps captured audio out through the framing tap. The tap is
//! attached only once the transport reports `Opened`; audio captured while
//! connecting is dropped.

#[cfg(feature = "gemini")]
pub mod gemini;
pub mod transport;

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audio::decode::decode_chunk;
use crate::audio::resample::{RateConverter, DEFAULT_CHUNK};
use crate::audio::{CaptureStream, Microphone};
use crate::buffering::frame::{FrameAccumulator, DEFAULT_FRAME_SAMPLES};
use crate::buffering::{create_capture_ring, AudioConsumer, Consumer, Observer};
use crate::error::{MentorError, Result};
use crate::output::{OutputContext, SourceId};
use crate::playback::StreamingQueue;

pub use transport::{
    LiveConnector, LiveEvent, LiveLink, LiveSetup, MediaFrame, INPUT_SAMPLE_RATE,
    OUTPUT_SAMPLE_RATE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveState {
    Idle,
    Connecting,
    Open,
}

/// Why the last session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CloseReason {
    Requested,
    Remote(Option<String>),
    Error(String),
}

/// What a poll observed, for the host to surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    Opened,
    Interrupted,
    TurnComplete,
    Closed(CloseReason),
}

struct ActiveSession {
    capture: Box<dyn CaptureStream>,
    consumer: AudioConsumer,
    converter: RateConverter,
    link: Box<dyn LiveLink>,
    events: Receiver<LiveEvent>,
    /// Attached on `Opened`.
    framer: Option<FrameAccumulator>,
    scratch: Vec<f32>,
    input_rate: u32,
    frames_sent: u64,
}

/// A session start detached from its controller.
///
/// Produced by [`LiveSession::begin_start`]; [`PendingStart::open`] acquires
/// the microphone and connects without borrowing the controller, so the host
/// loop keeps ticking while the handshake runs.
pub struct PendingStart {
    attempt: u64,
    microphone: Arc<dyn Microphone>,
    connector: Arc<dyn LiveConnector>,
    setup: LiveSetup,
    input_rate: u32,
}

/// Result of [`PendingStart::open`], handed back to [`LiveSession::finish_start`].
pub struct StartOutcome {
    attempt: u64,
    result: Result<ActiveSession>,
}

impl PendingStart {
    pub async fn open(self) -> StartOutcome {
        let attempt = self.attempt;
        StartOutcome {
            attempt,
            result: self.acquire().await,
        }
    }

    async fn acquire(self) -> Result<ActiveSession> {
        let (producer, consumer) = create_capture_ring();
        let microphone = self.microphone;
        let mut capture = tokio::task::spawn_blocking(move || microphone.open(producer))
            .await
            .map_err(|e| MentorError::Permission(format!("microphone open aborted: {e}")))??;

        let converter = match RateConverter::new(
            capture.sample_rate(),
            self.input_rate,
            DEFAULT_CHUNK,
        ) {
            Ok(converter) => converter,
            Err(e) => {
                capture.stop();
                return Err(e);
            }
        };

        let (event_tx, events) = unbounded();
        let connector = self.connector;
        let setup = self.setup;
        let connected = tokio::task::spawn_blocking(move || connector.connect(&setup, event_tx))
            .await
            .map_err(|e| MentorError::Connection(format!("connect aborted: {e}")))
            .and_then(|r| {
                r.map_err(|e| match e {
                    MentorError::Connection(_) => e,
                    other => MentorError::Connection(other.to_string()),
                })
            });

        let link = match connected {
            Ok(link) => link,
            Err(e) => {
                capture.stop();
                return Err(e);
            }
        };

        debug!(capture_rate = capture.sample_rate(), "live transport connected");
        Ok(ActiveSession {
            capture,
            consumer,
            converter,
            link,
            events,
            framer: None,
            scratch: Vec::new(),
            input_rate: self.input_rate,
            frames_sent: 0,
        })
    }
}

pub struct LiveSession {
    microphone: Arc<dyn Microphone>,
    connector: Arc<dyn LiveConnector>,
    setup: LiveSetup,
    frame_len: usize,
    input_rate: u32,
    queue: StreamingQueue,
    state: LiveState,
    last_close: Option<CloseReason>,
    active: Option<ActiveSession>,
    /// Bumped by every start; outcomes of older starts are discarded.
    attempt: u64,
}

impl LiveSession {
    pub fn new(
        ctx: OutputContext,
        microphone: Arc<dyn Microphone>,
        connector: Arc<dyn LiveConnector>,
        setup: LiveSetup,
    ) -> Self {
        Self {
            microphone,
            connector,
            setup,
            frame_len: DEFAULT_FRAME_SAMPLES,
            input_rate: INPUT_SAMPLE_RATE,
            queue: StreamingQueue::new(ctx),
            state: LiveState::Idle,
            last_close: None,
            active: None,
            attempt: 0,
        }
    }

    /// Override the capture frame length (samples at 16 kHz).
    pub fn with_frame_len(mut self, frame_len: usize) -> Self {
        self.frame_len = frame_len.max(1);
        self
    }

    /// Override the rate frames are sent at.
    pub fn with_input_rate(mut self, input_rate: u32) -> Self {
        self.input_rate = input_rate;
        self
    }

    /// Acquire the microphone and open the remote session.
    ///
    /// Any previous session is torn down first. On failure the controller is
    /// back in `Idle` with the error recorded as the close reason.
    ///
    /// # Errors
    /// `Permission` if the microphone cannot be opened, `Connection` if the
    /// transport cannot be established.
    pub async fn start(&mut self) -> Result<()> {
        let outcome = self.begin_start().open().await;
        self.finish_start(outcome)
            .unwrap_or_else(|| Err(MentorError::Connection("call start superseded".into())))
    }

    /// Tear down any previous session, enter `Connecting` and hand back the
    /// work needed to open a new one.
    pub fn begin_start(&mut self) -> PendingStart {
        self.stop();
        self.attempt += 1;
        self.state = LiveState::Connecting;
        info!(model = self.setup.model.as_str(), "live session connecting");
        PendingStart {
            attempt: self.attempt,
            microphone: Arc::clone(&self.microphone),
            connector: Arc::clone(&self.connector),
            setup: self.setup.clone(),
            input_rate: self.input_rate,
        }
    }

    /// Install the result of a [`PendingStart`].
    ///
    /// Returns `None` when the start was superseded by a hang-up or a newer
    /// start; a session it opened is closed on the spot.
    pub fn finish_start(&mut self, outcome: StartOutcome) -> Option<Result<()>> {
        if outcome.attempt != self.attempt || self.state != LiveState::Connecting {
            if let Ok(mut stale) = outcome.result {
                close_session(&mut stale);
            }
            debug!(attempt = outcome.attempt, "discarding superseded call start");
            return None;
        }

        match outcome.result {
            Ok(active) => {
                self.active = Some(active);
                Some(Ok(()))
            }
            Err(e) => {
                warn!("live session failed to start: {e}");
                self.state = LiveState::Idle;
                self.last_close = Some(CloseReason::Error(e.to_string()));
                Some(Err(e))
            }
        }
    }

    /// Drain inbound events and send any complete capture frames.
    pub fn poll(&mut self) -> Vec<SessionNotice> {
        let mut notices = Vec::new();
        let Some(active) = self.active.as_mut() else {
            return notices;
        };

        let mut close: Option<CloseReason> = None;
        for event in active.events.try_iter() {
            match event {
                LiveEvent::Opened => {
                    info!("live session open");
                    self.state = LiveState::Open;
                    active.consumer.clear();
                    active.converter.clear();
                    active.framer = Some(FrameAccumulator::new(self.frame_len));
                    notices.push(SessionNotice::Opened);
                }
                LiveEvent::Audio(chunk) => {
                    let scheduled = decode_chunk(&chunk).and_then(|b| self.queue.enqueue(b));
                    if let Err(e) = scheduled {
                        warn!("dropping inbound audio chunk: {e}");
                    }
                }
                LiveEvent::Interrupted => {
                    debug!("model interrupted");
                    self.queue.interrupt();
                    notices.push(SessionNotice::Interrupted);
                }
                LiveEvent::TurnComplete => notices.push(SessionNotice::TurnComplete),
                LiveEvent::Closed { reason } => {
                    close = Some(CloseReason::Remote(reason));
                    break;
                }
                LiveEvent::Error(message) => {
                    close = Some(CloseReason::Error(message));
                    break;
                }
            }
        }

        if close.is_none() {
            if let Err(e) = pump_capture(active) {
                close = Some(CloseReason::Error(e.to_string()));
            }
        }

        if let Some(reason) = close {
            self.teardown(reason.clone());
            notices.push(SessionNotice::Closed(reason));
        }
        notices
    }

    /// Forward a natural-completion notification to the playback queue.
    pub fn handle_ended(&mut self, id: SourceId) -> bool {
        self.queue.handle_ended(id)
    }

    /// Hang up. Idempotent; safe when never started.
    pub fn stop(&mut self) {
        if self.active.is_none() && self.state == LiveState::Idle {
            self.queue.stop();
            return;
        }
        self.teardown(CloseReason::Requested);
    }

    fn teardown(&mut self, reason: CloseReason) {
        if let Some(mut active) = self.active.take() {
            close_session(&mut active);
            info!(frames_sent = active.frames_sent, ?reason, "live session closed");
        }
        self.queue.stop();
        self.state = LiveState::Idle;
        self.last_close = Some(reason);
    }

    pub fn state(&self) -> LiveState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != LiveState::Idle
    }

    pub fn last_close(&self) -> Option<&CloseReason> {
        self.last_close.as_ref()
    }

    pub fn frames_sent(&self) -> u64 {
        self.active.as_ref().map_or(0, |a| a.frames_sent)
    }

    pub fn queue(&self) -> &StreamingQueue {
        &self.queue
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn close_session(active: &mut ActiveSession) {
    active.capture.stop();
    if let Err(e) = active.link.close() {
        debug!("ignoring close error: {e}");
    }
}

/// Move captured audio through the framing tap and out the link.
fn pump_capture(active: &mut ActiveSession) -> Result<()> {
    let Some(framer) = active.framer.as_mut() else {
        // Not open yet: keep the ring from filling with stale audio.
        active.consumer.clear();
        return Ok(());
    };

    let available = active.consumer.occupied_len();
    if available == 0 {
        return Ok(());
    }
    active.scratch.resize(available, 0.0);
    let n = active.consumer.pop_slice(&mut active.scratch);
    let converted = active.converter.process(&active.scratch[..n]);

    let link = &mut active.link;
    let rate = active.input_rate;
    let mut sent = 0u64;
    let mut failure = None;
    framer.push(&converted, |frame| {
        if failure.is_some() {
            return;
        }
        match link.send(MediaFrame::from_samples(frame, rate)) {
            Ok(()) => sent += 1,
            Err(e) => failure = Some(e),
        }
    });
    active.frames_sent += sent;
    if sent > 0 {
        debug!(sent, total = active.frames_sent, "capture frames sent");
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
