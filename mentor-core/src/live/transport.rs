//! Seam between the session controller and a duplex speech transport.
//!
//! The controller only sees [`LiveConnector`] and [`LiveLink`]; inbound
//! traffic arrives as [`LiveEvent`]s on a channel the connector was handed.
//! Tests substitute an in-memory connector for the network one.

use crossbeam_channel::Sender;
use serde::Serialize;

use crate::buffering::chunk::AudioChunk;
use crate::error::Result;

/// Microphone audio sent to the session.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Speech audio received from the session.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// One base64 PCM frame on its way to the remote session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFrame {
    pub mime_type: String,
    pub data: String,
}

impl MediaFrame {
    pub fn from_chunk(chunk: &AudioChunk) -> Self {
        Self {
            mime_type: chunk.mime_type(),
            data: chunk.to_base64(),
        }
    }

    /// Encode one captured frame of normalized samples.
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self::from_chunk(&AudioChunk::from_samples(samples, sample_rate))
    }
}

/// Inbound session traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Handshake finished; audio may flow.
    Opened,
    /// A chunk of model speech.
    Audio(AudioChunk),
    /// The user spoke over the model.
    Interrupted,
    TurnComplete,
    /// Remote side closed the session.
    Closed { reason: Option<String> },
    /// Transport failure. Terminal.
    Error(String),
}

/// Persona and voice a session is opened with.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
}

/// Outbound half of an open session.
pub trait LiveLink: Send {
    /// Queue one frame for sending. Does not wait for the network.
    fn send(&mut self, frame: MediaFrame) -> Result<()>;

    /// Close the session. Further sends fail.
    fn close(&mut self) -> Result<()>;
}

/// Opens duplex sessions.
pub trait LiveConnector: Send + Sync {
    /// Start a session with `setup`. Blocking; called from a worker thread.
    ///
    /// Every inbound event, including the eventual `Opened`, is delivered on
    /// `events`.
    ///
    /// # Errors
    /// `MentorError::Connection` when the transport cannot be established.
    fn connect(&self, setup: &LiveSetup, events: Sender<LiveEvent>) -> Result<Box<dyn LiveLink>>;
}
