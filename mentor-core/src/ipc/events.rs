//! Engine events broadcast to subscribers.
//!
//! Serialized as internally tagged JSON: `{"type": "checkpoint", ...}`.

use serde::{Deserialize, Serialize};

use crate::lesson::LessonState;
use crate::live::{CloseReason, LiveState};
use crate::tutor::Message;

/// Long-running request kinds a host can show a "thinking" state for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingTask {
    Reply,
    Lesson,
    FollowUp,
    NextSegment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    /// A provider request is in flight.
    Thinking { task: PendingTask },
    /// A tutor reply (or the apology standing in for one).
    Message { message: Message },
    LessonStarted {
        topic: String,
        duration_secs: f64,
        checkpoints: usize,
        segment: u32,
    },
    LessonState {
        state: LessonState,
        position_secs: f64,
    },
    /// Playback paused on a question; the next answer goes to it.
    Checkpoint { question: String, time_secs: f64 },
    LessonFinished,
    CallState { state: LiveState },
    CallInterrupted,
    CallClosed { reason: CloseReason },
    /// A failure at the engine boundary. Components are back in idle.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_event_serializes_with_tag_and_camel_case_fields() {
        let event = EngineEvent::Checkpoint {
            question: "What is 3 × 4?".into(),
            time_secs: 3.0,
        };

        let json = serde_json::to_value(&event).expect("serialize checkpoint event");
        assert_eq!(json["type"], "checkpoint");
        assert_eq!(json["question"], "What is 3 × 4?");
        assert_eq!(json["timeSecs"], 3.0);

        let round_trip: EngineEvent =
            serde_json::from_value(json).expect("deserialize checkpoint event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn lesson_state_uses_snake_case_values() {
        let event = EngineEvent::LessonState {
            state: LessonState::AwaitingAnswer,
            position_secs: 7.0,
        };
        let json = serde_json::to_value(&event).expect("serialize lesson state");
        assert_eq!(json["type"], "lessonState");
        assert_eq!(json["state"], "awaiting_answer");
        assert_eq!(json["positionSecs"], 7.0);
    }

    #[test]
    fn call_closed_carries_the_reason() {
        let event = EngineEvent::CallClosed {
            reason: CloseReason::Remote(Some("going away".into())),
        };
        let json = serde_json::to_value(&event).expect("serialize call closed");
        assert_eq!(json["type"], "callClosed");
        assert_eq!(json["reason"]["kind"], "remote");
        assert_eq!(json["reason"]["detail"], "going away");
    }

    #[test]
    fn unknown_task_names_are_rejected() {
        let err = serde_json::from_str::<PendingTask>(r#""Reply""#);
        assert!(err.is_err(), "expected invalid casing to fail");
    }
}
