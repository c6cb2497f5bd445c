//! The four capture sources and the value they all produce.

use crate::api::{ContentPart, Message, Modality};
use crate::constants::{AUDIO_PROMPT, DRAWING_PROMPT, SCREENSHOT_PROMPT};
use thiserror::Error;

pub mod audio;
pub mod crop;
pub mod drawing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureKind {
    Drawing,
    Screenshot,
    Audio,
    Text,
}

impl CaptureKind {
    pub fn modality(&self) -> Modality {
        match self {
            CaptureKind::Drawing | CaptureKind::Screenshot => Modality::Image,
            CaptureKind::Audio => Modality::Audio,
            CaptureKind::Text => Modality::Text,
        }
    }

    /// Lead-in of the status line shown when this capture fails.
    pub fn failure_prefix(&self) -> &'static str {
        match self {
            CaptureKind::Drawing | CaptureKind::Screenshot => "Image processing failed",
            CaptureKind::Audio => "Audio processing failed",
            CaptureKind::Text => "Failed to get formula",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// PNG-encoded bitmap.
    Image(Vec<u8>),
    Audio(AudioClip),
    /// A natural-language question.
    Text(String),
}

/// One raw model input: a payload plus the fixed instruction for its
/// modality. Consumed by value when turned into prompt messages.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureResult {
    kind: CaptureKind,
    payload: Payload,
    prompt: Option<&'static str>,
}

impl CaptureResult {
    pub fn drawing(png: Vec<u8>) -> Self {
        Self {
            kind: CaptureKind::Drawing,
            payload: Payload::Image(png),
            prompt: Some(DRAWING_PROMPT),
        }
    }

    pub fn screenshot(png: Vec<u8>) -> Self {
        Self {
            kind: CaptureKind::Screenshot,
            payload: Payload::Image(png),
            prompt: Some(SCREENSHOT_PROMPT),
        }
    }

    pub fn audio(clip: AudioClip) -> Self {
        Self {
            kind: CaptureKind::Audio,
            payload: Payload::Audio(clip),
            prompt: Some(AUDIO_PROMPT),
        }
    }

    /// Trims the question; blank input yields `None`.
    pub fn question(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            kind: CaptureKind::Text,
            payload: Payload::Text(text.to_string()),
            prompt: None,
        })
    }

    pub fn kind(&self) -> CaptureKind {
        self.kind
    }

    pub fn modality(&self) -> Modality {
        self.kind.modality()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn prompt(&self) -> Option<&'static str> {
        self.prompt
    }

    /// A single user turn: instruction first, then the captured payload.
    /// Questions are sent verbatim as the only part.
    pub fn into_messages(self) -> Vec<Message> {
        let mut parts = Vec::with_capacity(2);
        if let Some(prompt) = self.prompt {
            parts.push(ContentPart::Text(prompt.to_string()));
        }
        parts.push(match self.payload {
            Payload::Image(png) => ContentPart::Image(png),
            Payload::Audio(clip) => ContentPart::Audio {
                bytes: clip.bytes,
                mime: clip.mime,
            },
            Payload::Text(text) => ContentPart::Text(text),
        });
        vec![Message::user(parts)]
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Reported by the platform; shown to the user unchanged.
    #[error("{0}")]
    Platform(String),
    #[error("failed to run {command}: {source}")]
    CommandIo {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} failed: {message}")]
    CommandFailed { command: String, message: String },
    #[error("invalid image data: {0}")]
    InvalidImage(String),
    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("a recording is already in progress")]
    Busy,
    #[error("no recording is in progress")]
    NotRecording,
}
