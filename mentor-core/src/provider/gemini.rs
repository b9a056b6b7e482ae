//! Gemini REST backend (`models/{model}:generateContent`).
//!
//! Uses `reqwest::blocking`; every call builds its own client with the
//! configured timeout, so a hung request fails instead of stalling the tutor.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{GenerateRequest, GenerativeProvider, Part};
use crate::codec;
use crate::error::{MentorError, Result};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Longest upstream error body echoed into an error message.
const MAX_ERROR_DETAIL: usize = 300;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub text_model: String,
    pub speech_model: String,
    pub request_timeout: Duration,
}

pub struct GeminiProvider {
    config: GeminiConfig,
    endpoint: String,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            endpoint: API_BASE.to_string(),
        }
    }

    /// Point requests at another `models` endpoint (proxies, local mocks).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn post(&self, model: &str, body: &Value) -> Result<Value> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|e| MentorError::Upstream(format!("client build: {e}")))?;

        // The key goes in a header; reqwest errors are stripped of the URL.
        let url = format!("{}/{model}:generateContent", self.endpoint);
        let response = client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .map_err(|e| MentorError::Upstream(format!("request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            let detail: String = response
                .text()
                .unwrap_or_default()
                .chars()
                .take(MAX_ERROR_DETAIL)
                .collect();
            warn!(%status, model, "provider returned non-success status");
            return Err(MentorError::Upstream(format!("{status}: {detail}")));
        }

        response
            .json::<Value>()
            .map_err(|e| MentorError::Upstream(format!("response json: {}", e.without_url())))
    }
}

impl GenerativeProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let body = request_body(request);
        let payload = self.post(&self.config.text_model, &body)?;
        let text = response_text(&payload)?;
        debug!(chars = text.len(), "generation complete");
        Ok(text)
    }

    fn synthesize(&self, ssml: &str, voice: &str) -> Result<Vec<u8>> {
        let body = json!({
            "contents": [{ "parts": [{ "text": ssml }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": voice }
                    }
                }
            }
        });
        let payload = self.post(&self.config.speech_model, &body)?;
        let audio = response_audio(&payload)?;
        debug!(bytes = audio.len(), voice, "speech synthesized");
        Ok(audio)
    }
}

/// JSON body for a generation request.
pub fn request_body(request: &GenerateRequest) -> Value {
    let contents: Vec<Value> = request
        .contents
        .iter()
        .map(|content| {
            let parts: Vec<Value> = content
                .parts
                .iter()
                .map(|part| match part {
                    Part::Text(text) => json!({ "text": text }),
                    Part::InlineData { mime_type, data } => json!({
                        "inlineData": { "mimeType": mime_type, "data": codec::encode(data) }
                    }),
                })
                .collect();
            json!({ "role": content.role, "parts": parts })
        })
        .collect();

    let mut body = Map::new();
    body.insert("contents".into(), Value::Array(contents));
    if let Some(system) = &request.system_instruction {
        body.insert(
            "systemInstruction".into(),
            json!({ "parts": [{ "text": system }] }),
        );
    }
    if let Some(schema) = &request.response_schema {
        body.insert(
            "generationConfig".into(),
            json!({ "responseMimeType": "application/json", "responseSchema": schema }),
        );
    }
    Value::Object(body)
}

/// Concatenated text of the first candidate.
pub fn response_text(payload: &Value) -> Result<String> {
    let parts = first_candidate_parts(payload)?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        return Err(MentorError::Upstream("response contained no text".into()));
    }
    Ok(text)
}

/// Decoded inline audio of the first candidate.
pub fn response_audio(payload: &Value) -> Result<Vec<u8>> {
    let data = first_candidate_parts(payload)?
        .iter()
        .find_map(|p| p.pointer("/inlineData/data").and_then(Value::as_str))
        .ok_or_else(|| MentorError::Upstream("response contained no audio".into()))?;
    codec::decode(data)
}

fn first_candidate_parts(payload: &Value) -> Result<&Vec<Value>> {
    payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            let reason = payload
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
                .unwrap_or("no candidates");
            MentorError::Upstream(format!("empty response: {reason}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Content;

    #[test]
    fn request_body_carries_persona_parts_and_schema() {
        let request = GenerateRequest::new("be a mentor")
            .with_content(Content::user(vec![
                Part::InlineData {
                    mime_type: "text/plain".into(),
                    data: b"hi".to_vec(),
                },
                Part::Text("summarise".into()),
            ]))
            .with_schema(json!({ "type": "OBJECT" }));

        let body = request_body(&request);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be a mentor");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["data"], "aGk=");
        assert_eq!(body["contents"][0]["parts"][1]["text"], "summarise");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn failed_request_does_not_reveal_the_key() {
        let provider = GeminiProvider::new(GeminiConfig {
            api_key: "SECRETKEY123".into(),
            text_model: "m".into(),
            speech_model: "m".into(),
            request_timeout: Duration::from_millis(500),
        })
        .with_endpoint("http://127.0.0.1:9/v1beta/models");

        let err = provider.generate(&GenerateRequest::default()).unwrap_err();
        assert!(matches!(err, MentorError::Upstream(_)));
        assert!(!err.to_string().contains("SECRETKEY123"), "{err}");
    }

    #[test]
    fn plain_request_has_no_generation_config() {
        let body = request_body(&GenerateRequest::default());
        assert!(body.get("generationConfig").is_none());
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn text_parts_are_joined() {
        let payload = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello " }, { "text": "there" }] } }]
        });
        assert_eq!(response_text(&payload).unwrap(), "Hello there");
    }

    #[test]
    fn blocked_prompt_is_an_upstream_error() {
        let payload = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let err = response_text(&payload).unwrap_err();
        assert!(matches!(err, MentorError::Upstream(ref m) if m.contains("SAFETY")));
    }

    #[test]
    fn audio_is_decoded_from_inline_data() {
        let payload = json!({
            "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAEC" } }
            ] } }]
        });
        assert_eq!(response_audio(&payload).unwrap(), vec![0, 1, 2]);
    }
}
