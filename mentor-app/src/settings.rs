//! Persistent application settings (JSON file in the app data directory).
//!
//! Values come from the file first, then `MENTOR_*` environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mentor_core::EngineConfig;
use serde::{Deserialize, Serialize};

const SUPPORTED_OUTPUT_RATES: [u32; 5] = [16_000, 22_050, 24_000, 44_100, 48_000];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Hosted provider key. Without one the offline stub is used.
    pub api_key: Option<String>,
    pub voice: String,
    pub text_model: String,
    pub speech_model: String,
    pub live_model: String,
    pub request_timeout_secs: u64,
    pub output_sample_rate: u32,
    pub preferred_input_device: Option<String>,
    pub lesson_continuation: bool,
    pub max_segments: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            api_key: None,
            voice: engine.voice,
            text_model: engine.text_model,
            speech_model: engine.speech_model,
            live_model: engine.live_model,
            request_timeout_secs: engine.request_timeout.as_secs(),
            output_sample_rate: engine.output_sample_rate,
            preferred_input_device: None,
            lesson_continuation: engine.continuation,
            max_segments: engine.max_segments,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        let defaults = Self::default();
        self.api_key = trimmed(self.api_key.take());
        self.preferred_input_device = trimmed(self.preferred_input_device.take());
        normalize_name(&mut self.voice, &defaults.voice);
        normalize_name(&mut self.text_model, &defaults.text_model);
        normalize_name(&mut self.speech_model, &defaults.speech_model);
        normalize_name(&mut self.live_model, &defaults.live_model);
        self.request_timeout_secs = self.request_timeout_secs.clamp(5, 300);
        if !SUPPORTED_OUTPUT_RATES.contains(&self.output_sample_rate) {
            self.output_sample_rate = defaults.output_sample_rate;
        }
        self.max_segments = self.max_segments.clamp(1, 10);
    }

    /// Apply `MENTOR_*` overrides looked up through `var`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("MENTOR_API_KEY").or_else(|| var("GEMINI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(voice) = var("MENTOR_VOICE") {
            self.voice = voice;
        }
        if let Some(model) = var("MENTOR_TEXT_MODEL") {
            self.text_model = model;
        }
        if let Some(model) = var("MENTOR_SPEECH_MODEL") {
            self.speech_model = model;
        }
        if let Some(model) = var("MENTOR_LIVE_MODEL") {
            self.live_model = model;
        }
        if let Some(secs) = var("MENTOR_REQUEST_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()) {
            self.request_timeout_secs = secs;
        }
        if let Some(device) = var("MENTOR_INPUT_DEVICE") {
            self.preferred_input_device = Some(device);
        }
        if let Some(flag) = var("MENTOR_CONTINUATION") {
            self.lesson_continuation = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        self.normalize();
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            output_sample_rate: self.output_sample_rate,
            request_timeout: self.request_timeout(),
            continuation: self.lesson_continuation,
            max_segments: self.max_segments,
            voice: self.voice.clone(),
            text_model: self.text_model.clone(),
            speech_model: self.speech_model.clone(),
            live_model: self.live_model.clone(),
            ..EngineConfig::default()
        }
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn normalize_name(value: &mut String, fallback: &str) {
    let name = value.trim();
    *value = if name.is_empty() {
        fallback.to_string()
    } else {
        name.to_string()
    };
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mentor")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("mentor")
            .join("settings.json")
    }
}

/// Read settings from `path`, falling back to defaults for a missing or
/// unreadable file, then apply environment overrides.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings.apply_overrides(|name| std::env::var(name).ok());
    settings
}

/// Write settings to `path`. The API key is never persisted.
pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let stored = AppSettings {
        api_key: None,
        ..settings.clone()
    };
    let json = serde_json::to_string_pretty(&stored).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
