use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ProviderConfig;

pub mod ollama;
pub mod openai_compat;

use crate::api::ollama::OllamaService;
use crate::api::openai_compat::OpenAiCompatibleService;

/// Input channel a session is scoped to.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Image,
    Audio,
    Text,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Image, Modality::Audio, Modality::Text];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Image => "image",
            Modality::Audio => "audio",
            Modality::Text => "text",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an availability probe. Only `Available` permits session creation.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    Downloadable,
    Downloading,
    Unavailable,
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Availability::Available => "available",
            Availability::Downloadable => "downloadable",
            Availability::Downloading => "downloading",
            Availability::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One typed part of a prompt turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// PNG-encoded bitmap.
    Image(Vec<u8>),
    Audio { bytes: Vec<u8>, mime: String },
}

/// A prompt turn: a role plus an ordered list of parts.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub parts: Vec<ContentPart>,
}

impl Message {
    pub fn user(parts: Vec<ContentPart>) -> Self {
        Self {
            role: MessageRole::User,
            parts,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    /// Concatenation of all text parts, newline separated.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Same turn with image and audio parts removed. Sessions remember
    /// earlier captures by their text only.
    pub fn without_media(&self) -> Self {
        Self {
            role: self.role,
            parts: self
                .parts
                .iter()
                .filter(|p| matches!(p, ContentPart::Text(_)))
                .cloned()
                .collect(),
        }
    }
}

/// Drops the oldest messages behind the first `head` until at most `tail`
/// remain after them.
pub(crate) fn trim_history<T>(history: &mut Vec<T>, head: usize, tail: usize) {
    let head = head.min(history.len());
    let excess = (history.len() - head).saturating_sub(tail);
    history.drain(head..head + excess);
}

/// Constraints a session is created with.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub modality: Modality,
    pub system_prompt: Option<String>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("API response error: {0}")]
    Response(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("{0} input is not supported by this provider")]
    UnsupportedInput(Modality),
    #[error("session has been destroyed")]
    SessionDestroyed,
}

/// The model backend: probes availability and creates sessions.
#[async_trait]
pub trait ModelService: Send + Sync {
    fn name(&self) -> &str;

    /// Probes the base model (`None`) or one input modality.
    async fn availability(&self, modality: Option<Modality>) -> Result<Availability, ApiError>;

    async fn create_session(
        &self,
        options: SessionOptions,
    ) -> Result<Arc<dyn ModelSession>, ApiError>;
}

/// A stateful conversation scoped to one modality.
#[async_trait]
pub trait ModelSession: Send + Sync {
    async fn prompt(&self, content: Vec<Message>) -> Result<String, ApiError>;

    /// Releases backend resources. Any later prompt fails.
    fn destroy(&self);
}

pub fn create_service(config: &ProviderConfig) -> Arc<dyn ModelService> {
    match config.name.as_str() {
        "Ollama" => Arc::new(OllamaService::new(
            config.active_model.clone(),
            config.base_url.clone(),
            config.modalities.clone(),
        )),
        _ => Arc::new(OpenAiCompatibleService::new(
            config.name.clone(),
            config.active_model.clone(),
            config.base_url.clone(),
            config.api_key.clone(),
            config.modalities.clone(),
        )),
    }
}
