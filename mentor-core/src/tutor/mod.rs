//! Tutor conversation service.
//!
//! Owns the in-memory conversation history and turns user requests into
//! provider calls. Every provider call runs on the blocking pool and is
//! bounded by the configured request timeout.

pub mod prompts;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audio::decode::{decode_pcm, PlaybackBuffer, SPEECH_SAMPLE_RATE};
use crate::buffering::chunk::AudioChunk;
use crate::error::{MentorError, Result};
use crate::lesson::script::{
    interactive_script_schema, parse_interactive_script, parse_reply, InteractiveScript,
    StructuredLesson,
};
use crate::lesson::Checkpoint;
use crate::provider::{Attachment, Content, GenerateRequest, GenerativeProvider, Part, ProviderHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Tutor,
}

/// One entry in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender: Author,
    pub text: String,
    pub lesson: Option<StructuredLesson>,
    /// Narration of `lesson`, 24 kHz PCM16.
    #[serde(skip)]
    pub audio: Option<AudioChunk>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(id: String, sender: Author, text: impl Into<String>) -> Self {
        Self {
            id,
            sender,
            text: text.into(),
            lesson: None,
            audio: None,
            created_at: Utc::now(),
        }
    }
}

/// A narrated lesson ready to load into the player.
#[derive(Debug, Clone)]
pub struct PreparedLesson {
    pub topic: String,
    pub script: InteractiveScript,
    pub checkpoints: Vec<Checkpoint>,
    pub narration: PlaybackBuffer,
}

#[derive(Debug, Clone)]
pub struct TutorConfig {
    pub voice: String,
    pub request_timeout: Duration,
}

/// Cloneable handle; clones share history and provider.
#[derive(Clone)]
pub struct Tutor {
    provider: ProviderHandle,
    config: TutorConfig,
    history: Arc<Mutex<Vec<Message>>>,
}

impl Tutor {
    /// A tutor whose history starts with the greeting.
    pub fn new(provider: ProviderHandle, config: TutorConfig) -> Self {
        let greeting = Message::new("initial".into(), Author::Tutor, prompts::GREETING);
        Self {
            provider,
            config,
            history: Arc::new(Mutex::new(vec![greeting])),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn history(&self) -> Vec<Message> {
        self.history.lock().clone()
    }

    /// Send a user message and return the tutor's reply.
    ///
    /// Never fails: a reply that cannot be produced is logged and replaced
    /// by an apology.
    pub async fn send(&self, text: &str, attachment: Option<Attachment>) -> Message {
        let user = Message::new(self.next_id(), Author::User, text);
        self.history.lock().push(user);

        let reply = match self.reply(text, attachment).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("reply failed: {e}");
                Message::new(self.next_id(), Author::Tutor, prompts::APOLOGY)
            }
        };
        self.history.lock().push(reply.clone());
        reply
    }

    async fn reply(&self, text: &str, attachment: Option<Attachment>) -> Result<Message> {
        let mut parts = Vec::with_capacity(2);
        if let Some(attachment) = &attachment {
            debug!(
                file = attachment.file_name.as_str(),
                mime = attachment.mime_type.as_str(),
                bytes = attachment.data.len(),
                "attaching file"
            );
            parts.push(attachment.to_part());
        }
        parts.push(Part::Text(text.to_string()));
        let request = GenerateRequest::new(prompts::chat_persona()).with_content(Content::user(parts));

        let raw = self.call("chat", move |p| p.generate(&request)).await?;
        let parsed = parse_reply(&raw)?;

        let mut message = Message::new(self.next_id(), Author::Tutor, parsed.text);
        if let Some(lesson) = parsed.lesson {
            if !lesson.voice_script_ssml.trim().is_empty() {
                let pcm = self.speak(&lesson.voice_script_ssml).await?;
                message.audio = Some(AudioChunk::new(pcm, SPEECH_SAMPLE_RATE));
            }
            message.lesson = Some(lesson);
        }
        Ok(message)
    }

    /// Request, synthesize and decode a narrated interactive lesson.
    pub async fn prepare_lesson(&self, topic: &str) -> Result<PreparedLesson> {
        info!("preparing lesson");
        debug!(topic, "lesson topic");
        self.narrated(topic, prompts::lesson_prompt(topic)).await
    }

    /// Next segment of a continuing lesson.
    pub async fn next_segment(
        &self,
        topic: &str,
        answered: &[(String, String)],
    ) -> Result<PreparedLesson> {
        info!(answered = answered.len(), "preparing next segment");
        debug!(topic, "lesson topic");
        self.narrated(topic, prompts::continuation_prompt(topic, answered))
            .await
    }

    async fn narrated(&self, topic: &str, prompt: String) -> Result<PreparedLesson> {
        let request = GenerateRequest::new(prompts::lesson_persona())
            .with_content(Content::user_text(prompt))
            .with_schema(interactive_script_schema());
        let raw = self.call("lesson", move |p| p.generate(&request)).await?;
        let script = parse_interactive_script(&raw)?;
        if script.voice_script_ssml.trim().is_empty() {
            return Err(MentorError::Format("lesson script has no narration".into()));
        }

        let pcm = self.speak(&script.voice_script_ssml).await?;
        let narration = decode_pcm(&pcm, SPEECH_SAMPLE_RATE)?;
        Ok(PreparedLesson {
            topic: topic.to_string(),
            checkpoints: script.checkpoints(),
            script,
            narration,
        })
    }

    /// Short spoken reaction to a checkpoint answer.
    pub async fn follow_up(&self, question: &str, answer: &str) -> Result<PlaybackBuffer> {
        let request = GenerateRequest::new(prompts::lesson_persona())
            .with_content(Content::user_text(prompts::follow_up_prompt(question, answer)));
        let ssml = self.call("follow-up", move |p| p.generate(&request)).await?;
        let pcm = self.speak(ssml.trim()).await?;
        decode_pcm(&pcm, SPEECH_SAMPLE_RATE)
    }

    async fn speak(&self, ssml: &str) -> Result<Vec<u8>> {
        let ssml = ssml.to_string();
        let voice = self.config.voice.clone();
        self.call("speech", move |p| p.synthesize(&ssml, &voice)).await
    }

    async fn call<T, F>(&self, what: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn GenerativeProvider) -> Result<T> + Send + 'static,
    {
        let provider = self.provider.clone();
        let task = tokio::task::spawn_blocking(move || f(provider.0.as_ref()));
        match tokio::time::timeout(self.config.request_timeout, task).await {
            Err(_) => Err(MentorError::Upstream(format!(
                "{what} request timed out after {:?}",
                self.config.request_timeout
            ))),
            Ok(Err(join)) => Err(MentorError::Upstream(format!("{what} task failed: {join}"))),
            Ok(Ok(result)) => result,
        }
    }

    fn next_id(&self) -> String {
        let seq = self.history.lock().len();
        format!("{}-{seq}", Utc::now().timestamp_millis())
    }
}

impl std::fmt::Debug for Tutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tutor")
            .field("provider", &self.provider)
            .field("messages", &self.history.lock().len())
            .finish_non_exhaustive()
    }
}
