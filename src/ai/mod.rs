pub mod gateway;
pub mod gemini;
pub mod health;
pub mod meetings;
pub mod ollama;
pub mod prompts;
pub mod selector;
pub mod space_agent;
pub mod structured;
pub mod tasks;
pub mod tokens;

use crate::errors::AppResult;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Hosted Gemini API.
    #[default]
    Hosted,
    /// Local Ollama server.
    Local,
}

impl BackendKind {
    /// Persisted preference value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hosted => "gemini",
            Self::Local => "ollama",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" | "hosted" => Some(Self::Hosted),
            "ollama" | "local" => Some(Self::Local),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageCategory {
    /// Image and PDF uploads.
    Vision,
    /// Text generation and chat.
    #[default]
    Analysis,
}

/// An uploaded file sent inline with the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl InlineImage {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type.to_ascii_lowercase().contains("pdf")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    /// Short tag recorded in usage stats, e.g. `TASK_REWRITE`.
    pub label: String,
    pub system: Option<String>,
    pub prompt: String,
    pub image: Option<InlineImage>,
    pub temperature: Option<f32>,
}

impl GenerateRequest {
    pub fn new(label: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            system: None,
            prompt: prompt.into(),
            image: None,
            temperature: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, image: InlineImage) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn category(&self) -> UsageCategory {
        if self.image.is_some() {
            UsageCategory::Vision
        } else {
            UsageCategory::Analysis
        }
    }

    /// Character length of everything sent as text.
    pub fn prompt_chars(&self) -> usize {
        self.prompt.chars().count() + self.system.as_deref().map_or(0, |system| system.chars().count())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub prompt: u64,
    pub response: u64,
    pub total: u64,
}

impl TokenCounts {
    /// Rough four-characters-per-token estimate for backends that report nothing.
    pub fn estimate(prompt_chars: usize, response_chars: usize) -> Self {
        let prompt = (prompt_chars as u64).div_ceil(4);
        let response = (response_chars as u64).div_ceil(4);
        Self {
            prompt,
            response,
            total: prompt + response,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: TokenCounts,
    pub latency_ms: u64,
    /// `usage` is a character-count estimate rather than backend-reported.
    pub estimated: bool,
}

/// One text/vision generation backend.
#[async_trait]
pub trait TextBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn generate(&self, request: &GenerateRequest) -> AppResult<Generation>;

    /// Cheap reachability probe.
    async fn is_available(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::{BackendKind, GenerateRequest, InlineImage, TokenCounts, UsageCategory};

    #[test]
    fn backend_kind_uses_persisted_names() {
        assert_eq!(BackendKind::Local.as_str(), "ollama");
        assert_eq!(BackendKind::parse("gemini"), Some(BackendKind::Hosted));
        assert_eq!(BackendKind::parse("cloud"), None);
    }

    #[test]
    fn image_requests_count_as_vision() {
        let request = GenerateRequest::new("VISION", "read this")
            .with_image(InlineImage::new("lab.pdf", "application/pdf", vec![1, 2, 3]));
        assert_eq!(request.category(), UsageCategory::Vision);
        assert_eq!(request.image.as_ref().map(|image| image.base64()).as_deref(), Some("AQID"));
    }

    #[test]
    fn estimate_rounds_up() {
        let counts = TokenCounts::estimate(5, 8);
        assert_eq!(counts.prompt, 2);
        assert_eq!(counts.response, 2);
        assert_eq!(counts.total, 4);
    }
}
