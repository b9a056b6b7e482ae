//! Lesson payloads returned by the provider and their parsers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::Checkpoint;
use crate::error::{MentorError, Result};

/// Separates the conversational reply from the structured lesson JSON.
pub const JSON_SENTINEL: &str = "||--JSON--||";

/// Structured lesson attached to a tutor reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredLesson {
    pub lesson_title: String,
    pub lesson_steps: Vec<LessonStep>,
    pub real_life_example: String,
    pub motivational_quote: String,
    pub voice_script_ssml: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LessonStep {
    pub explanation: String,
    pub check_question: String,
}

/// Narration script with timed comprehension checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractiveScript {
    pub voice_script_ssml: String,
    pub interactive_prompts: Vec<InteractivePrompt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractivePrompt {
    pub time_in_seconds: f64,
    pub question: String,
}

impl InteractiveScript {
    /// Prompts as a checkpoint list sorted ascending by time.
    ///
    /// Negative or non-finite times are pinned to the start of the track.
    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        let mut checkpoints: Vec<Checkpoint> = self
            .interactive_prompts
            .iter()
            .map(|p| Checkpoint {
                time_secs: if p.time_in_seconds.is_finite() {
                    p.time_in_seconds.max(0.0)
                } else {
                    0.0
                },
                question: p.question.clone(),
            })
            .collect();
        checkpoints.sort_by(|a, b| a.time_secs.total_cmp(&b.time_secs));
        checkpoints
    }
}

/// A tutor reply split into its conversational and structured halves.
#[derive(Debug, Clone, PartialEq)]
pub struct TutorReply {
    pub text: String,
    pub lesson: Option<StructuredLesson>,
}

/// Split a raw reply on [`JSON_SENTINEL`].
///
/// No sentinel means a plain conversational reply.
///
/// # Errors
/// `MentorError::Format` when the sentinel is present but the JSON after it
/// does not parse.
pub fn parse_reply(raw: &str) -> Result<TutorReply> {
    match raw.split_once(JSON_SENTINEL) {
        None => Ok(TutorReply {
            text: raw.trim().to_string(),
            lesson: None,
        }),
        Some((text, json)) => {
            let lesson: StructuredLesson = serde_json::from_str(extract_json(json))
                .map_err(|e| MentorError::Format(format!("lesson json: {e}")))?;
            Ok(TutorReply {
                text: text.trim().to_string(),
                lesson: Some(lesson),
            })
        }
    }
}

/// Parse a schema-constrained interactive script.
pub fn parse_interactive_script(raw: &str) -> Result<InteractiveScript> {
    serde_json::from_str(extract_json(raw))
        .map_err(|e| MentorError::Format(format!("interactive script json: {e}")))
}

/// Pull the JSON object out of text that may be wrapped in markdown fences
/// or surrounded by chatter.
pub fn extract_json(raw: &str) -> &str {
    let mut body = raw.trim();
    if let Some(start) = body.find("```") {
        let after = &body[start + 3..];
        // Skip the language tag line (```json).
        let after = after.find('\n').map_or(after, |nl| &after[nl + 1..]);
        body = after.find("```").map_or(after, |end| &after[..end]);
    }
    match (body.find('{'), body.rfind('}')) {
        (Some(open), Some(close)) if open < close => &body[open..=close],
        _ => body.trim(),
    }
}

/// Response schema for [`InteractiveScript`] requests.
pub fn interactive_script_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "voice_script_ssml": { "type": "STRING" },
            "interactive_prompts": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "time_in_seconds": { "type": "NUMBER" },
                        "question": { "type": "STRING" }
                    },
                    "required": ["time_in_seconds", "question"]
                }
            }
        },
        "required": ["voice_script_ssml", "interactive_prompts"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_without_sentinel_is_plain_text() {
        let reply = parse_reply("  Namaste! Kya seekhna hai aaj?  ").unwrap();
        assert_eq!(reply.text, "Namaste! Kya seekhna hai aaj?");
        assert!(reply.lesson.is_none());
    }

    #[test]
    fn reply_with_sentinel_carries_a_lesson() {
        let raw = r#"Chalo, fractions samjhte hain.||--JSON--||{
            "lesson_title": "Fractions",
            "lesson_steps": [{"explanation": "A part of a whole", "check_question": "What is 1/2 of 4?"}],
            "real_life_example": "Sharing a pizza",
            "motivational_quote": "Galti se hi seekhte hain",
            "voice_script_ssml": "<speak>Fractions!</speak>"
        }"#;
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.text, "Chalo, fractions samjhte hain.");
        let lesson = reply.lesson.unwrap();
        assert_eq!(lesson.lesson_title, "Fractions");
        assert_eq!(lesson.lesson_steps.len(), 1);
        assert_eq!(lesson.voice_script_ssml, "<speak>Fractions!</speak>");
    }

    #[test]
    fn malformed_lesson_json_is_a_format_error() {
        let err = parse_reply("hello ||--JSON--|| {not json").unwrap_err();
        assert!(matches!(err, MentorError::Format(_)));
    }

    #[test]
    fn json_is_extracted_from_markdown_fences() {
        let raw = "Here you go:\n```json\n{\"voice_script_ssml\": \"<speak/>\", \"interactive_prompts\": []}\n```\nEnjoy";
        assert_eq!(
            extract_json(raw),
            "{\"voice_script_ssml\": \"<speak/>\", \"interactive_prompts\": []}"
        );
        let script = parse_interactive_script(raw).unwrap();
        assert_eq!(script.voice_script_ssml, "<speak/>");
    }

    #[test]
    fn checkpoints_are_sorted_and_sanitized() {
        let script = InteractiveScript {
            voice_script_ssml: String::new(),
            interactive_prompts: vec![
                InteractivePrompt { time_in_seconds: 7.0, question: "second".into() },
                InteractivePrompt { time_in_seconds: 3.0, question: "first".into() },
                InteractivePrompt { time_in_seconds: -2.0, question: "zeroth".into() },
            ],
        };
        let times: Vec<f64> = script.checkpoints().iter().map(|c| c.time_secs).collect();
        assert_eq!(times, vec![0.0, 3.0, 7.0]);
        assert_eq!(script.checkpoints()[1].question, "first");
    }

    #[test]
    fn schema_names_every_prompt_field() {
        let schema = interactive_script_schema();
        let item = &schema["properties"]["interactive_prompts"]["items"];
        assert_eq!(item["properties"]["time_in_seconds"]["type"], "NUMBER");
        assert_eq!(item["properties"]["question"]["type"], "STRING");
    }
}
