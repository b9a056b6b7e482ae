//! Hosted generative provider abstraction.
//!
//! The `GenerativeProvider` trait decouples the tutor from any specific
//! backend (offline stub, Gemini REST, ...). Calls are blocking; async
//! callers go through `tokio::task::spawn_blocking`.

pub mod stub;

#[cfg(feature = "gemini")]
pub mod gemini;

#[cfg(feature = "gemini")]
pub use gemini::{GeminiConfig, GeminiProvider};
pub use stub::StubProvider;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One piece of a conversation turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    /// Raw file bytes with their MIME type.
    InlineData { mime_type: String, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![Part::Text(text.into())])
    }
}

/// A text or JSON generation request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateRequest {
    pub system_instruction: Option<String>,
    pub contents: Vec<Content>,
    /// Turns on schema-constrained JSON output.
    pub response_schema: Option<Value>,
}

impl GenerateRequest {
    pub fn new(system_instruction: impl Into<String>) -> Self {
        Self {
            system_instruction: Some(system_instruction.into()),
            ..Self::default()
        }
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.contents.push(content);
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    /// Text of the last user turn, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.contents
            .iter()
            .rev()
            .filter(|c| c.role == Role::User)
            .flat_map(|c| c.parts.iter())
            .find_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                Part::InlineData { .. } => None,
            })
    }
}

/// A file attached to a user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    /// Read a file and guess its MIME type from the extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            mime_type: mime_for(path).to_string(),
            file_name,
            data,
        })
    }

    pub fn to_part(&self) -> Part {
        Part::InlineData {
            mime_type: self.mime_type.clone(),
            data: self.data.clone(),
        }
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "md" => "text/plain",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

/// Contract for hosted generation and speech backends.
pub trait GenerativeProvider: Send + Sync + 'static {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Generate text (or JSON, when the request carries a schema).
    ///
    /// # Errors
    /// `MentorError::Upstream` for any provider-side failure.
    fn generate(&self, request: &GenerateRequest) -> Result<String>;

    /// Synthesize `ssml` with `voice`, returning 24 kHz mono PCM16 bytes.
    fn synthesize(&self, ssml: &str, voice: &str) -> Result<Vec<u8>>;
}

/// Shared handle to any `GenerativeProvider` implementor.
#[derive(Clone)]
pub struct ProviderHandle(pub Arc<dyn GenerativeProvider>);

impl ProviderHandle {
    pub fn new<P: GenerativeProvider>(provider: P) -> Self {
        Self(Arc::new(provider))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("backend", &self.0.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_user_text_skips_attachments() {
        let request = GenerateRequest::new("persona")
            .with_content(Content::user_text("first"))
            .with_content(Content::user(vec![
                Part::InlineData {
                    mime_type: "image/png".into(),
                    data: vec![1, 2, 3],
                },
                Part::Text("explain this".into()),
            ]));
        assert_eq!(request.last_user_text(), Some("explain this"));
    }

    #[test]
    fn mime_is_guessed_from_extension() {
        assert_eq!(mime_for(Path::new("notes.PDF")), "application/pdf");
        assert_eq!(mime_for(Path::new("photo.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("blob")), "application/octet-stream");
    }
}
