//! `StubProvider`: offline backend with deterministic output.
//!
//! Used when no API key is configured and throughout the tests. Replies
//! follow the real wire conventions (sentinel-delimited lesson JSON,
//! schema-shaped interactive scripts, 24 kHz PCM16 speech) so the whole
//! chat, lesson and playback path can be exercised without a network.

use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::json;
use tracing::debug;

use super::{GenerateRequest, GenerativeProvider};
use crate::audio::decode::SPEECH_SAMPLE_RATE;
use crate::codec;
use crate::error::Result;
use crate::lesson::script::JSON_SENTINEL;

/// Seconds of synthesized audio per input character.
const SECS_PER_CHAR: f64 = 0.03;
const MIN_SPEECH_SECS: f64 = 0.5;
const MAX_SPEECH_SECS: f64 = 8.0;

/// Echo-style stub provider.
pub struct StubProvider {
    request_count: AtomicU32,
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            request_count: AtomicU32::new(0),
        }
    }

    /// Requests served so far.
    pub fn request_count(&self) -> u32 {
        self.request_count.load(Ordering::Relaxed)
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerativeProvider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let n = self.request_count.fetch_add(1, Ordering::Relaxed) + 1;
        let topic = request.last_user_text().unwrap_or("this").trim();
        debug!(request = n, schema = request.response_schema.is_some(), "StubProvider::generate");

        if request.response_schema.is_some() {
            let script = json!({
                "voice_script_ssml": format!(
                    "<speak>Chalo, let's learn about {topic}. <break time=\"500ms\"/> \
                     First the basic idea, then a quick example, then one more check.</speak>"
                ),
                "interactive_prompts": [
                    { "time_in_seconds": 2.5, "question": format!("What do you already know about {topic}?") },
                    { "time_in_seconds": 1.0, "question": "Ready to start?" }
                ]
            });
            return Ok(script.to_string());
        }

        let lesson = json!({
            "lesson_title": format!("Stub lesson #{n}"),
            "lesson_steps": [
                { "explanation": format!("You asked about: {topic}"), "check_question": "Samjhe?" }
            ],
            "real_life_example": "Like practising cricket in the nets before a match.",
            "motivational_quote": "Galti sabse hoti hai, seekhna usi ka naam hai.",
            "voice_script_ssml": format!("<speak>You asked about {topic}.</speak>")
        });
        Ok(format!("[stub reply #{n}] {topic}{JSON_SENTINEL}{lesson}"))
    }

    fn synthesize(&self, ssml: &str, _voice: &str) -> Result<Vec<u8>> {
        let secs = (ssml.chars().count() as f64 * SECS_PER_CHAR).clamp(MIN_SPEECH_SECS, MAX_SPEECH_SECS);
        let len = (secs * SPEECH_SAMPLE_RATE as f64).round() as usize;
        let samples: Vec<f32> = (0..len)
            .map(|i| {
                let t = i as f32 / SPEECH_SAMPLE_RATE as f32;
                0.1 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
            })
            .collect();
        debug!(secs, "StubProvider::synthesize");
        Ok(codec::samples_to_pcm16(&samples))
    }
}
