//! Host state: the engine plus the audio output that drives its clock.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mentor_core::live::{LiveEvent, LiveLink, LiveSetup};
use mentor_core::{
    CpalMicrophone, GeminiConfig, GeminiLiveConnector, GeminiProvider, LiveConnector,
    MentorEngine, MentorError, OutputContext, OutputDevice, ProviderHandle, Renderer,
    StubProvider,
};
use tracing::{info, warn};

use crate::settings::AppSettings;

const LIVE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const OFFLINE_STEP: Duration = Duration::from_millis(20);

/// Keeps whichever output is driving the renderer alive.
enum Output {
    Device(OutputDevice),
    Offline(OfflineClock),
}

pub struct AppState {
    pub engine: MentorEngine,
    output: Output,
}

impl AppState {
    pub fn build(settings: &AppSettings) -> anyhow::Result<Self> {
        let config = settings.engine_config();

        let (ctx, output) = match OutputDevice::open(config.output_sample_rate) {
            Ok((ctx, device)) => (ctx, Output::Device(device)),
            Err(e) => {
                warn!("audio output unavailable ({e}); playback will be silent");
                let (ctx, renderer) = OutputContext::new(config.output_sample_rate);
                (ctx, Output::Offline(OfflineClock::start(renderer)?))
            }
        };

        let microphone = Arc::new(CpalMicrophone::new(settings.preferred_input_device.clone()));
        let (provider, connector) = backends(settings);
        let engine = MentorEngine::new(config, ctx, provider, microphone, connector);
        Ok(Self { engine, output })
    }

    pub fn has_audio_device(&self) -> bool {
        matches!(self.output, Output::Device(_))
    }

    pub fn shutdown(&mut self) {
        self.engine.shutdown();
        match &mut self.output {
            Output::Device(device) => device.close(),
            Output::Offline(clock) => clock.stop(),
        }
    }
}

fn backends(settings: &AppSettings) -> (ProviderHandle, Arc<dyn LiveConnector>) {
    match &settings.api_key {
        Some(key) => {
            info!(
                text_model = settings.text_model.as_str(),
                speech_model = settings.speech_model.as_str(),
                "using Gemini provider"
            );
            let provider = GeminiProvider::new(GeminiConfig {
                api_key: key.clone(),
                text_model: settings.text_model.clone(),
                speech_model: settings.speech_model.clone(),
                request_timeout: settings.request_timeout(),
            });
            (
                ProviderHandle::new(provider),
                Arc::new(GeminiLiveConnector::new(key.clone(), LIVE_CONNECT_TIMEOUT)),
            )
        }
        None => {
            warn!("no API key (MENTOR_API_KEY or GEMINI_API_KEY); using the offline stub provider");
            (ProviderHandle::new(StubProvider::new()), Arc::new(NoCalls))
        }
    }
}

/// Connector used without credentials.
struct NoCalls;

impl LiveConnector for NoCalls {
    fn connect(
        &self,
        _setup: &LiveSetup,
        _events: crossbeam_channel::Sender<LiveEvent>,
    ) -> mentor_core::Result<Box<dyn LiveLink>> {
        Err(MentorError::Connection("live calls need an API key".into()))
    }
}

/// Advances a renderer in real time when there is no output device, so
/// lessons and calls still progress.
struct OfflineClock {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl OfflineClock {
    fn start(mut renderer: Renderer) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_thread = Arc::clone(&running);
        let worker = std::thread::Builder::new()
            .name("mentor-offline-clock".into())
            .spawn(move || {
                let mut last = Instant::now();
                while running_for_thread.load(Ordering::Acquire) {
                    std::thread::sleep(OFFLINE_STEP);
                    let now = Instant::now();
                    renderer.advance(now.duration_since(last).as_secs_f64());
                    last = now;
                }
            })?;
        Ok(Self {
            running,
            worker: Some(worker),
        })
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("offline clock thread panicked");
            }
        }
    }
}

impl Drop for OfflineClock {
    fn drop(&mut self) {
        self.stop();
    }
}
