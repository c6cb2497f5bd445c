use crate::api::{
    trim_history, ApiError, Availability, ContentPart, Message, MessageRole, Modality,
    ModelService, ModelSession, SessionOptions,
};
use crate::constants::{AI_REQUEST_TIMEOUT, AI_TEMPERATURE, AI_TOP_P, SESSION_HISTORY_MESSAGES};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub struct OllamaService {
    client: Client,
    pub model: String,
    pub base_url: String,
    modalities: Vec<Modality>,
}

impl OllamaService {
    pub fn new(model: String, base_url: String, modalities: Vec<Modality>) -> Self {
        let client = Client::builder()
            .timeout(AI_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            model,
            base_url,
            modalities,
        }
    }

    async fn model_installed(&self) -> Result<bool, ApiError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(ApiError::Response(format!(
                "Ollama returned status {}",
                response.status()
            )));
        }

        let tags: OllamaTags = response.json().await?;
        Ok(tags
            .models
            .iter()
            .any(|m| m.name == self.model || m.name.starts_with(&format!("{}:", self.model))))
    }
}

#[derive(Deserialize)]
struct OllamaTags {
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
struct OllamaMessage {
    role: MessageRole,
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

fn to_ollama(message: &Message) -> Result<OllamaMessage, ApiError> {
    let mut texts = Vec::new();
    let mut images = Vec::new();
    for part in &message.parts {
        match part {
            ContentPart::Text(t) => texts.push(t.as_str()),
            ContentPart::Image(png) => images.push(STANDARD.encode(png)),
            ContentPart::Audio { .. } => return Err(ApiError::UnsupportedInput(Modality::Audio)),
        }
    }
    Ok(OllamaMessage {
        role: message.role,
        content: texts.join("\n"),
        images,
    })
}

#[async_trait]
impl ModelService for OllamaService {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn availability(&self, modality: Option<Modality>) -> Result<Availability, ApiError> {
        if let Some(m) = modality {
            if m != Modality::Text && !self.modalities.contains(&m) {
                return Ok(Availability::Unavailable);
            }
        }
        if self.model_installed().await? {
            Ok(Availability::Available)
        } else {
            // The server is up; `ollama pull` would make the model usable.
            Ok(Availability::Downloadable)
        }
    }

    async fn create_session(
        &self,
        options: SessionOptions,
    ) -> Result<Arc<dyn ModelSession>, ApiError> {
        let mut history = Vec::new();
        if let Some(system) = &options.system_prompt {
            history.push(to_ollama(&Message::system(system.clone()))?);
        }
        tracing::debug!(modality = %options.modality, model = %self.model, "Ollama session created");
        Ok(Arc::new(OllamaSession {
            client: self.client.clone(),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            history: Mutex::new(history),
            destroyed: AtomicBool::new(false),
        }))
    }
}

pub struct OllamaSession {
    client: Client,
    model: String,
    base_url: String,
    history: Mutex<Vec<OllamaMessage>>,
    destroyed: AtomicBool,
}

impl OllamaSession {
    fn snapshot_with(&self, turn: &[OllamaMessage]) -> Vec<OllamaMessage> {
        let mut messages = match self.history.lock() {
            Ok(h) => h.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        messages.extend_from_slice(turn);
        messages
    }

    /// Records a finished exchange without its images, keeping the system
    /// prompt plus the newest messages.
    fn remember(&self, turn: &[Message], mut reply: OllamaMessage) {
        reply.images.clear();
        let Ok(mut history) = self.history.lock() else {
            return;
        };
        history.extend(turn.iter().filter_map(|m| to_ollama(&m.without_media()).ok()));
        history.push(reply);
        let head = history
            .iter()
            .take_while(|m| m.role == MessageRole::System)
            .count();
        trim_history(&mut history, head, SESSION_HISTORY_MESSAGES);
    }
}

#[async_trait]
impl ModelSession for OllamaSession {
    async fn prompt(&self, content: Vec<Message>) -> Result<String, ApiError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ApiError::SessionDestroyed);
        }
        let turn = content
            .iter()
            .map(to_ollama)
            .collect::<Result<Vec<_>, _>>()?;
        let messages = self.snapshot_with(&turn);

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "stream": false,
                "options": {
                    "temperature": AI_TEMPERATURE,
                    "top_p": AI_TOP_P
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Response(format!(
                "Ollama chat error ({}): {}",
                status, body
            )));
        }

        let body: OllamaChatResponse = response.json().await?;
        let reply = body.message.content.clone();
        self.remember(&content, body.message);
        Ok(reply)
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }
}
