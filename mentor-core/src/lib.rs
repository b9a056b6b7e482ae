//! # mentor-core
//!
//! Audio pipeline for a voice tutoring assistant.
//!
//! ## Architecture
//!
//! ```text
//!  chat / lesson requests ──► Tutor ──► GenerativeProvider (spawn_blocking)
//!                                             │
//!                               PCM16 narration + checkpoints
//!                                             │
//!                          LessonPlayer ──────┤
//!                                             ▼
//!  Microphone → SPSC ring → 16 kHz frames → LiveLink ···► StreamingQueue
//!                                             │
//!                               OutputContext (frame clock) → Renderer → cpal
//! ```
//!
//! [`MentorEngine`] owns every scheduler and reports through a
//! `broadcast::Sender<EngineEvent>`. The output callback is zero-alloc once
//! warmed up; decoding and resampling happen on the control side.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod codec;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod lesson;
pub mod live;
pub mod output;
pub mod playback;
pub mod provider;
pub mod tutor;

// Convenience re-exports for downstream crates
pub use audio::decode::{PlaybackBuffer, CAPTURE_SAMPLE_RATE, SPEECH_SAMPLE_RATE};
pub use audio::{CpalMicrophone, Microphone};
pub use buffering::chunk::AudioChunk;
pub use engine::{EngineConfig, MentorEngine};
pub use error::{MentorError, Result};
pub use ipc::events::{EngineEvent, PendingTask};
pub use lesson::{Checkpoint, LessonEvent, LessonPlayer, LessonState};
pub use live::{CloseReason, LiveConnector, LiveSession, LiveState};
pub use output::{device::OutputDevice, OutputContext, Renderer, SourceId};
pub use playback::StreamingQueue;
pub use provider::{Attachment, GenerativeProvider, ProviderHandle, StubProvider};
pub use tutor::{Message, Tutor};

#[cfg(feature = "gemini")]
pub use live::gemini::GeminiLiveConnector;
#[cfg(feature = "gemini")]
pub use provider::{GeminiConfig, GeminiProvider};
