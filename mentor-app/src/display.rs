//! Plain-text rendering of engine events for the terminal.

use std::fmt::Write as _;

use mentor_core::lesson::script::StructuredLesson;
use mentor_core::tutor::Author;
use mentor_core::{CloseReason, EngineEvent, LessonState, LiveState, Message, PendingTask};

/// Text to print for `event`, if any.
pub fn render(event: &EngineEvent) -> Option<String> {
    let text = match event {
        EngineEvent::Thinking { task } => match task {
            PendingTask::Reply => "… thinking".to_string(),
            PendingTask::Lesson => "… preparing your lesson".to_string(),
            PendingTask::FollowUp => "… listening to your answer".to_string(),
            PendingTask::NextSegment => "… preparing the next part".to_string(),
        },
        EngineEvent::Message { message } => message_text(message),
        EngineEvent::LessonStarted {
            topic,
            duration_secs,
            checkpoints,
            segment,
        } => format!(
            "▶ lesson \"{topic}\" part {segment}: {duration_secs:.1}s, {checkpoints} question(s)"
        ),
        EngineEvent::LessonState { state, .. } => match state {
            LessonState::Paused => "⏸ paused".to_string(),
            _ => return None,
        },
        EngineEvent::Checkpoint { question, .. } => format!("? {question}"),
        EngineEvent::LessonFinished => "■ lesson finished".to_string(),
        EngineEvent::CallState { state } => match state {
            LiveState::Connecting => "☎ connecting…".to_string(),
            LiveState::Open => "☎ call open, start talking".to_string(),
            LiveState::Idle => return None,
        },
        EngineEvent::CallInterrupted => return None,
        EngineEvent::CallClosed { reason } => match reason {
            CloseReason::Requested => "☎ call ended".to_string(),
            CloseReason::Remote(Some(detail)) => format!("☎ call ended by the tutor: {detail}"),
            CloseReason::Remote(None) => "☎ call ended by the tutor".to_string(),
            CloseReason::Error(detail) => format!("☎ call dropped: {detail}"),
        },
        EngineEvent::Error { message } => format!("! {message}"),
    };
    Some(text)
}

pub fn message_text(message: &Message) -> String {
    let speaker = match message.sender {
        Author::User => "you",
        Author::Tutor => "tutor",
    };
    let mut out = format!("{speaker}: {}", message.text);
    if let Some(lesson) = &message.lesson {
        out.push('\n');
        out.push_str(&lesson_card(lesson));
    }
    out
}

fn lesson_card(lesson: &StructuredLesson) -> String {
    let mut out = String::new();
    if !lesson.lesson_title.is_empty() {
        let _ = writeln!(out, "  ── {} ──", lesson.lesson_title);
    }
    for (i, step) in lesson.lesson_steps.iter().enumerate() {
        let _ = writeln!(out, "  {}. {}", i + 1, step.explanation);
        if !step.check_question.is_empty() {
            let _ = writeln!(out, "     ↳ {}", step.check_question);
        }
    }
    if !lesson.real_life_example.is_empty() {
        let _ = writeln!(out, "  e.g. {}", lesson.real_life_example);
    }
    if !lesson.motivational_quote.is_empty() {
        let _ = writeln!(out, "  “{}”", lesson.motivational_quote);
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentor_core::lesson::script::LessonStep;

    #[test]
    fn checkpoint_is_shown_as_a_question() {
        let event = EngineEvent::Checkpoint {
            question: "What is 7 × 8?".into(),
            time_secs: 4.0,
        };
        assert_eq!(render(&event).as_deref(), Some("? What is 7 × 8?"));
    }

    #[test]
    fn routine_state_changes_are_quiet() {
        let event = EngineEvent::LessonState {
            state: LessonState::Talking,
            position_secs: 1.0,
        };
        assert_eq!(render(&event), None);
        assert_eq!(
            render(&EngineEvent::CallState {
                state: LiveState::Idle
            }),
            None
        );
    }

    #[test]
    fn lesson_card_lists_steps_in_order() {
        let lesson = StructuredLesson {
            lesson_title: "Fractions".into(),
            lesson_steps: vec![
                LessonStep {
                    explanation: "A fraction is a part of a whole.".into(),
                    check_question: "What is half of 8?".into(),
                },
                LessonStep {
                    explanation: "The bottom number counts the parts.".into(),
                    check_question: String::new(),
                },
            ],
            ..StructuredLesson::default()
        };
        let card = lesson_card(&lesson);
        let lines: Vec<&str> = card.lines().collect();
        assert_eq!(lines[0], "  ── Fractions ──");
        assert_eq!(lines[1], "  1. A fraction is a part of a whole.");
        assert_eq!(lines[2], "     ↳ What is half of 8?");
        assert_eq!(lines[3], "  2. The bottom number counts the parts.");
        assert_eq!(lines.len(), 4);
    }
}
