//! Output device: runs a [`Renderer`] inside a cpal output callback.
//!
//! As with capture, `cpal::Stream` is `!Send`, so the stream is created on a
//! dedicated thread that keeps it alive until [`OutputDevice::close`].
//! The context's sample rate is whatever the device accepted; buffers at
//! other rates are converted by `OutputContext::prepare`.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use tracing::{info, warn};

use super::OutputContext;
use crate::error::{MentorError, Result};

/// Keeps the output stream thread alive.
pub struct OutputDevice {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl OutputDevice {
    /// Open the default output device, preferring `preferred_rate`.
    ///
    /// # Errors
    /// `MentorError::AudioDevice` when no output device exists or the stream
    /// cannot be built.
    pub fn open(preferred_rate: u32) -> Result<(OutputContext, OutputDevice)> {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_thread = Arc::clone(&running);
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<OutputContext>>();

        let worker = std::thread::Builder::new()
            .name("mentor-output".into())
            .spawn(move || {
                let stream = match platform::build(preferred_rate) {
                    Ok((stream, context)) => {
                        let _ = open_tx.send(Ok(context));
                        stream
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                while running_for_thread.load(Ordering::Acquire) {
                    std::thread::park_timeout(std::time::Duration::from_millis(100));
                }
                drop(stream);
                info!("output device released");
            })?;

        match open_rx.recv() {
            Ok(Ok(context)) => Ok((
                context,
                OutputDevice {
                    running,
                    worker: Some(worker),
                },
            )),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(MentorError::AudioDevice(
                    "output thread died during open".into(),
                ))
            }
        }
    }

    /// Release the device. Idempotent.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            if worker.join().is_err() {
                warn!("output thread panicked during shutdown");
            }
        }
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "audio-cpal")]
mod platform {
    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        SampleFormat, SampleRate, Stream,
    };
    use tracing::{error, info};

    use crate::error::{MentorError, Result};
    use crate::output::OutputContext;

    pub(super) fn build(preferred_rate: u32) -> Result<(Stream, OutputContext)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| MentorError::AudioDevice("no output device available".into()))?;

        let wanted = SampleRate(preferred_rate);
        let supported = device
            .supported_output_configs()
            .map_err(|e| MentorError::AudioDevice(e.to_string()))?
            .filter(|c| c.min_sample_rate() <= wanted && c.max_sample_rate() >= wanted)
            .min_by_key(|c| c.channels())
            .map(|c| c.with_sample_rate(wanted))
            .map_or_else(
                || {
                    device
                        .default_output_config()
                        .map_err(|e| MentorError::AudioDevice(e.to_string()))
                },
                Ok,
            )?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels().max(1) as usize;
        let config = supported.config();
        info!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate,
            channels,
            "output config selected"
        );

        let (context, mut renderer) = OutputContext::new(sample_rate);
        let err_fn = |err: cpal::StreamError| error!("output stream error: {err}");

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| renderer.render(data, channels),
                err_fn,
                None,
            ),
            SampleFormat::I16 => {
                let mut mix: Vec<f32> = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _info| {
                        mix.resize(data.len(), 0.0);
                        renderer.render(&mut mix, channels);
                        for (dst, &s) in data.iter_mut().zip(mix.iter()) {
                            *dst = (s * i16::MAX as f32) as i16;
                        }
                    },
                    err_fn,
                    None,
                )
            }
            fmt => {
                return Err(MentorError::AudioDevice(format!(
                    "unsupported output sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| MentorError::AudioDevice(e.to_string()))?;

        stream
            .play()
            .map_err(|e| MentorError::AudioStream(e.to_string()))?;

        Ok((stream, context))
    }
}

#[cfg(not(feature = "audio-cpal"))]
mod platform {
    use crate::error::{MentorError, Result};
    use crate::output::OutputContext;

    pub(super) struct Stream;

    pub(super) fn build(_preferred_rate: u32) -> Result<(Stream, OutputContext)> {
        Err(MentorError::AudioDevice(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
