//! Results of provider requests spawned by the engine.
//!
//! Requests run as tokio tasks so the host's event loop keeps ticking while
//! the provider thinks. Each result comes back tagged with the engine epoch
//! it was issued in; a result from an older epoch (the user stopped the
//! lesson or started a call meanwhile) is dropped. Call starts carry the
//! live session's own attempt counter instead.

use crate::audio::decode::PlaybackBuffer;
use crate::error::Result;
use crate::live::StartOutcome;
use crate::tutor::{Message, PreparedLesson};

pub(crate) enum JobOutcome {
    Reply(Message),
    Lesson {
        epoch: u64,
        segment: u32,
        result: Result<PreparedLesson>,
    },
    FollowUp {
        epoch: u64,
        result: Result<PlaybackBuffer>,
    },
    /// Microphone and transport opened (or not); the session decides
    /// whether the attempt is still current.
    Call(StartOutcome),
}

impl JobOutcome {
    /// Epoch the job was issued in. Replies are never stale.
    pub(crate) fn epoch(&self) -> Option<u64> {
        match self {
            JobOutcome::Reply(_) | JobOutcome::Call(_) => None,
            JobOutcome::Lesson { epoch, .. } | JobOutcome::FollowUp { epoch, .. } => Some(*epoch),
        }
    }
}
