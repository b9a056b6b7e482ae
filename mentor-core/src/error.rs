use thiserror::Error;

/// All errors produced by mentor-core.
#[derive(Debug, Error)]
pub enum MentorError {
    /// Microphone access denied or no capture device available.
    #[error("microphone unavailable: {0}")]
    Permission(String),

    /// Live session could not be opened, written to, or closed.
    #[error("live session connection error: {0}")]
    Connection(String),

    /// Malformed or missing structured JSON, or an odd-length PCM payload.
    #[error("format error: {0}")]
    Format(String),

    /// Any failure surfaced by the generation or synthesis provider.
    #[error("upstream provider error: {0}")]
    Upstream(String),

    #[error("base64 decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("invalid state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MentorError>;
