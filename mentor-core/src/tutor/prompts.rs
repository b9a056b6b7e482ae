//! Persona and prompt templates sent to the provider.

use crate::lesson::script::JSON_SENTINEL;

/// First message shown in a new conversation.
pub const GREETING: &str =
    "Namaste! I'm JB AI, your mentor for today. Kuch bhi poochho, we'll figure it out together.";

/// Shown in place of a reply that could not be produced.
pub const APOLOGY: &str = "Arre yaar, something went wrong. Let's try that again, shall we?";

/// Chat persona. Asks for a reply plus a structured lesson after the sentinel.
pub fn chat_persona() -> String {
    format!(
        "You are JB AI, a patient and funny mentor who explains things the way a favourite \
         coaching-class teacher would. Mix Hindi and English naturally (Hinglish), follow the \
         student's language, and keep the tone encouraging.\n\
         \n\
         Teach in small pieces. After each piece ask one short question that checks \
         understanding. Use everyday examples and the occasional light joke. When the student \
         sounds stuck, slow down and encourage them. If they share a file, summarise it first \
         and then teach from it.\n\
         \n\
         Output format: write your conversational reply, then the exact text {JSON_SENTINEL}, \
         then one JSON object and nothing else:\n\
         {{\"lesson_title\": string, \
         \"lesson_steps\": [{{\"explanation\": string, \"check_question\": string}}], \
         \"real_life_example\": string, \"motivational_quote\": string, \
         \"voice_script_ssml\": string}}\n\
         voice_script_ssml is SSML narration of the lesson with natural pauses.\n\
         \n\
         Stay respectful and age-appropriate. For serious personal matters, suggest talking to \
         someone they trust."
    )
}

/// Persona for live voice calls.
pub fn call_persona() -> String {
    "You are JB AI, a warm Hinglish-speaking mentor on a voice call with a student. Keep \
     answers short and conversational, ask one check question at a time, and let the student \
     interrupt you whenever they want."
        .to_string()
}

/// Persona for narrated interactive lessons.
pub fn lesson_persona() -> String {
    "You are JB AI, a mentor recording a short narrated lesson. You write SSML narration and \
     choose moments in it where the listener should stop and answer a question."
        .to_string()
}

pub fn lesson_prompt(topic: &str) -> String {
    format!(
        "Write a narrated lesson about: {topic}\n\
         Keep it under two minutes when spoken. Return voice_script_ssml with the full SSML \
         narration, and interactive_prompts: two or three comprehension questions, each with \
         time_in_seconds giving the approximate point in the narration after which it should \
         be asked."
    )
}

/// Prompt for the next segment of a lesson, given what was already covered.
pub fn continuation_prompt(topic: &str, answered: &[(String, String)]) -> String {
    let mut recap = String::new();
    for (question, answer) in answered {
        recap.push_str(&format!("- Q: {question}\n  A: {answer}\n"));
    }
    if recap.is_empty() {
        recap.push_str("- (no questions answered yet)\n");
    }
    format!(
        "Continue the narrated lesson about: {topic}\n\
         The student has answered so far:\n{recap}\
         Pick up where the last segment ended, build on their answers, and return the next \
         segment in the same format."
    )
}

/// Prompt for a short spoken reaction to a checkpoint answer.
pub fn follow_up_prompt(question: &str, answer: &str) -> String {
    format!(
        "During a narrated lesson you asked: \"{question}\"\n\
         The student answered: \"{answer}\"\n\
         Reply with SSML only: one or two sentences reacting to the answer. Praise what is \
         right, gently correct what is wrong, then say you'll continue."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_persona_names_the_sentinel_and_every_lesson_field() {
        let persona = chat_persona();
        assert!(persona.contains(JSON_SENTINEL));
        for field in [
            "lesson_title",
            "lesson_steps",
            "check_question",
            "real_life_example",
            "motivational_quote",
            "voice_script_ssml",
        ] {
            assert!(persona.contains(field), "missing {field}");
        }
    }

    #[test]
    fn continuation_recaps_answers() {
        let prompt = continuation_prompt(
            "photosynthesis",
            &[("What do plants need?".into(), "sunlight".into())],
        );
        assert!(prompt.contains("photosynthesis"));
        assert!(prompt.contains("A: sunlight"));
    }
}
