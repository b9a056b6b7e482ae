//! Microphone capture via cpal backend, plus PCM decoding and resampling.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate, block on a mutex, or perform I/O. Samples are
//! mixed down to mono in a buffer sized on the first callback and written
//! into an SPSC ring buffer producer whose `push_slice` is lock-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `CpalMicrophone::open` therefore builds the stream on a dedicated
//! thread that owns it until the capture is stopped; the open result comes
//! back over a oneshot channel.

pub mod decode;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use std::thread::JoinHandle;

use crate::{
    buffering::AudioProducer,
    error::{MentorError, Result},
};

/// Source of microphone samples for a live session.
///
/// Implementations push mono f32 samples into `producer` until the returned
/// stream is stopped.
pub trait Microphone: Send + Sync {
    /// Acquire the microphone.
    ///
    /// # Errors
    /// Returns `MentorError::Permission` when access is denied or no capture
    /// device exists.
    fn open(&self, producer: AudioProducer) -> Result<Box<dyn CaptureStream>>;
}

/// Handle to an active capture.
pub trait CaptureStream: Send {
    /// Actual capture sample rate (Hz).
    fn sample_rate(&self) -> u32;

    /// Stop capturing and release the device. Idempotent.
    fn stop(&mut self);
}

/// Default microphone backed by cpal.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    preferred_device: Option<String>,
}

impl CpalMicrophone {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

/// Capture handle returned by `CpalMicrophone`.
#[cfg(feature = "audio-cpal")]
pub struct MicrophoneCapture {
    /// Shared flag — set to `false` to make the callback no-op and release the stream.
    running: Arc<AtomicBool>,
    sample_rate: u32,
    worker: Option<JoinHandle<()>>,
}

#[cfg(feature = "audio-cpal")]
impl CaptureStream for MicrophoneCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            if worker.join().is_err() {
                tracing::warn!("capture thread panicked during shutdown");
            }
        }
    }
}

#[cfg(feature = "audio-cpal")]
impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "audio-cpal")]
impl Microphone for CpalMicrophone {
    fn open(&self, producer: AudioProducer) -> Result<Box<dyn CaptureStream>> {
        let running = Arc::new(AtomicBool::new(true));
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let preferred = self.preferred_device.clone();
        let running_for_thread = Arc::clone(&running);

        let worker = std::thread::Builder::new()
            .name("mentor-capture".into())
            .spawn(move || {
                let stream = match cpal_input::build(
                    producer,
                    Arc::clone(&running_for_thread),
                    preferred.as_deref(),
                ) {
                    Ok((stream, rate)) => {
                        let _ = open_tx.send(Ok(rate));
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
                // Stream drops here, releasing the device on its own thread.
                drop(stream);
            })?;

        match open_rx.recv() {
            Ok(Ok(sample_rate)) => Ok(Box::new(MicrophoneCapture {
                running,
                sample_rate,
                worker: Some(worker),
            })),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(MentorError::Permission("capture thread died during open".into()))
            }
        }
    }
}

#[cfg(feature = "audio-cpal")]
mod cpal_input {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        SampleFormat, Stream, StreamConfig,
    };
    use tracing::{error, info, warn};

    use crate::buffering::{AudioProducer, Producer};
    use crate::error::{MentorError, Result};

    /// Push a mono-mixed copy of `data` into the ring, converting each sample with `to_f32`.
    fn push_mono<T: Copy>(
        data: &[T],
        channels: usize,
        mix_buf: &mut Vec<f32>,
        producer: &mut AudioProducer,
        to_f32: impl Fn(T) -> f32,
    ) {
        let frames = data.len() / channels;
        if mix_buf.len() < frames {
            mix_buf.resize(frames, 0.0);
        }
        for (f, slot) in mix_buf.iter_mut().take(frames).enumerate() {
            let base = f * channels;
            let mut sum = 0f32;
            for c in 0..channels {
                sum += to_f32(data[base + c]);
            }
            *slot = sum / channels as f32;
        }
        let written = producer.push_slice(&mix_buf[..frames]);
        if written < frames {
            warn!("capture ring full: dropped {} frames", frames - written);
        }
    }

    pub(super) fn build(
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<(Stream, u32)> {
        let host = cpal::default_host();

        let preferred = preferred_device_name.and_then(|wanted| {
            let found = host.input_devices().ok().and_then(|mut devices| {
                devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            });
            if found.is_none() {
                warn!("preferred input device '{wanted}' not found, falling back");
            }
            found
        });

        let device = preferred
            .or_else(|| host.default_input_device())
            .ok_or_else(|| MentorError::Permission("no input device available".into()))?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| MentorError::Permission(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let ch = channels.max(1) as usize;

        info!(sample_rate, channels, "capture config selected");

        let config: StreamConfig = supported.config();
        let err_fn = |err: cpal::StreamError| error!("capture stream error: {err}");

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if running.load(Ordering::Relaxed) {
                            push_mono(data, ch, &mut mix_buf, &mut producer, |s| s);
                        }
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::I16 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if running.load(Ordering::Relaxed) {
                            push_mono(data, ch, &mut mix_buf, &mut producer, |s| {
                                s as f32 / 32768.0
                            });
                        }
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::U8 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[u8], _info| {
                        if running.load(Ordering::Relaxed) {
                            push_mono(data, ch, &mut mix_buf, &mut producer, |s| {
                                (s as f32 - 128.0) / 128.0
                            });
                        }
                    },
                    err_fn,
                    None,
                )
            }
            fmt => {
                return Err(MentorError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| MentorError::Permission(e.to_string()))?;

        stream
            .play()
            .map_err(|e| MentorError::AudioStream(e.to_string()))?;

        Ok((stream, sample_rate))
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl Microphone for CpalMicrophone {
    fn open(&self, _producer: AudioProducer) -> Result<Box<dyn CaptureStream>> {
        Err(MentorError::Permission(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
