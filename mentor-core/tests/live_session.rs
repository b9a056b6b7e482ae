use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use mentor_core::audio::CaptureStream;
use mentor_core::buffering::{AudioProducer, Producer};
use mentor_core::live::{
    CloseReason, LiveConnector, LiveEvent, LiveLink, LiveSession, LiveSetup, LiveState,
    MediaFrame, SessionNotice,
};
use mentor_core::{codec, AudioChunk, Microphone, OutputContext, Result};

/// Microphone whose producer the test feeds by hand.
#[derive(Default)]
struct HandMicrophone {
    producer: Mutex<Option<AudioProducer>>,
}

impl HandMicrophone {
    fn speak(&self, samples: &[f32]) {
        let mut guard = self.producer.lock();
        let producer = guard.as_mut().expect("microphone not open");
        assert_eq!(producer.push_slice(samples), samples.len());
    }
}

struct HandCapture;

impl CaptureStream for HandCapture {
    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn stop(&mut self) {}
}

impl Microphone for HandMicrophone {
    fn open(&self, producer: AudioProducer) -> Result<Box<dyn CaptureStream>> {
        *self.producer.lock() = Some(producer);
        Ok(Box::new(HandCapture))
    }
}

/// Connector that records outbound frames and exposes the inbound channel.
#[derive(Default)]
struct LoopbackConnector {
    sent: Arc<Mutex<Vec<MediaFrame>>>,
    inbound: Mutex<Option<Sender<LiveEvent>>>,
}

impl LoopbackConnector {
    fn deliver(&self, event: LiveEvent) {
        let guard = self.inbound.lock();
        guard
            .as_ref()
            .expect("not connected")
            .send(event)
            .unwrap();
    }
}

struct RecordingLink(Arc<Mutex<Vec<MediaFrame>>>);

impl LiveLink for RecordingLink {
    fn send(&mut self, frame: MediaFrame) -> Result<()> {
        self.0.lock().push(frame);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl LiveConnector for LoopbackConnector {
    fn connect(&self, _setup: &LiveSetup, events: Sender<LiveEvent>) -> Result<Box<dyn LiveLink>> {
        events.send(LiveEvent::Opened).unwrap();
        *self.inbound.lock() = Some(events);
        Ok(Box::new(RecordingLink(Arc::clone(&self.sent))))
    }
}

fn setup() -> LiveSetup {
    LiveSetup {
        model: "loopback".into(),
        voice: "Kore".into(),
        system_instruction: "Be brief.".into(),
    }
}

async fn open_session() -> (
    LiveSession,
    Arc<HandMicrophone>,
    Arc<LoopbackConnector>,
    mentor_core::Renderer,
) {
    let (ctx, renderer) = OutputContext::new(24_000);
    let mic = Arc::new(HandMicrophone::default());
    let connector = Arc::new(LoopbackConnector::default());
    let mut session = LiveSession::new(
        ctx,
        Arc::clone(&mic) as Arc<dyn Microphone>,
        Arc::clone(&connector) as Arc<dyn LiveConnector>,
        setup(),
    );
    session.start().await.unwrap();
    assert_eq!(session.poll(), vec![SessionNotice::Opened]);
    assert_eq!(session.state(), LiveState::Open);
    (session, mic, connector, renderer)
}

#[tokio::test]
async fn captured_audio_leaves_as_16k_pcm_frames() {
    let (mut session, mic, connector, _renderer) = open_session().await;

    mic.speak(&vec![0.1; 3 * 4096]);
    session.poll();

    let sent = connector.sent.lock().clone();
    assert_eq!(sent.len(), 3);
    assert_eq!(session.frames_sent(), 3);
    for frame in &sent {
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
        assert_eq!(codec::decode(&frame.data).unwrap().len(), 8192);
    }
}

#[tokio::test]
async fn partial_frames_wait_for_more_audio() {
    let (mut session, mic, connector, _renderer) = open_session().await;

    mic.speak(&vec![0.0; 3000]);
    session.poll();
    assert!(connector.sent.lock().is_empty());

    mic.speak(&vec![0.0; 1096]);
    session.poll();
    assert_eq!(connector.sent.lock().len(), 1);
}

#[tokio::test]
async fn model_speech_is_queued_then_cleared_on_barge_in() {
    let (mut session, _mic, connector, mut renderer) = open_session().await;

    let second = AudioChunk::new(vec![0u8; 24_000], 24_000);
    connector.deliver(LiveEvent::Audio(second.clone()));
    connector.deliver(LiveEvent::Audio(second));
    session.poll();
    assert_eq!(session.queue().active_len(), 2);
    assert!((session.queue().next_start_time() - 1.0).abs() < 1e-9);

    renderer.advance(0.25);
    connector.deliver(LiveEvent::Interrupted);
    assert_eq!(session.poll(), vec![SessionNotice::Interrupted]);
    assert!(!session.queue().is_playing());
    assert_eq!(session.state(), LiveState::Open);
}

#[tokio::test]
async fn remote_close_returns_to_idle() {
    let (mut session, _mic, connector, _renderer) = open_session().await;

    connector.deliver(LiveEvent::Closed {
        reason: Some("session expired".into()),
    });
    let notices = session.poll();
    assert_eq!(
        notices,
        vec![SessionNotice::Closed(CloseReason::Remote(Some(
            "session expired".into()
        )))]
    );
    assert_eq!(session.state(), LiveState::Idle);

    // Hanging up afterwards is harmless.
    session.stop();
    assert_eq!(session.state(), LiveState::Idle);
}
