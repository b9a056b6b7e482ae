//! Streaming playback of inbound audio chunks.

pub mod queue;

pub use queue::{ScheduledChunk, StreamingQueue};
