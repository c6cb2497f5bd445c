use crate::api::{
    trim_history, ApiError, Availability, ContentPart, Message, Modality, ModelService,
    ModelSession, SessionOptions,
};
use crate::constants::{AI_REQUEST_TIMEOUT, AI_TEMPERATURE, AI_TOP_P, SESSION_HISTORY_MESSAGES};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub struct OpenAiCompatibleService {
    client: Client,
    pub name: String,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    modalities: Vec<Modality>,
}

impl OpenAiCompatibleService {
    pub fn new(
        name: String,
        model: String,
        base_url: String,
        api_key: Option<String>,
        modalities: Vec<Modality>,
    ) -> Self {
        let client = Client::builder()
            .timeout(AI_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            name,
            model,
            base_url,
            api_key,
            modalities,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Maps a WAV/MP3 mime type to the `input_audio.format` value.
fn audio_format(mime: &str) -> &'static str {
    if mime.contains("mpeg") || mime.contains("mp3") {
        "mp3"
    } else {
        "wav"
    }
}

fn to_openai(message: &Message) -> Value {
    let parts: Vec<Value> = message
        .parts
        .iter()
        .map(|part| match part {
            ContentPart::Text(t) => json!({ "type": "text", "text": t }),
            ContentPart::Image(png) => json!({
                "type": "image_url",
                "image_url": { "url": format!("data:image/png;base64,{}", STANDARD.encode(png)) }
            }),
            ContentPart::Audio { bytes, mime } => json!({
                "type": "input_audio",
                "input_audio": { "data": STANDARD.encode(bytes), "format": audio_format(mime) }
            }),
        })
        .collect();
    json!({ "role": message.role, "content": parts })
}

#[async_trait]
impl ModelService for OpenAiCompatibleService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn availability(&self, modality: Option<Modality>) -> Result<Availability, ApiError> {
        if let Some(m) = modality {
            if m != Modality::Text && !self.modalities.contains(&m) {
                return Ok(Availability::Unavailable);
            }
        }

        let url = format!("{}/models", self.base_url);
        let mut request = self.client.get(url);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(Availability::Available)
        } else if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            Err(ApiError::Config("API key rejected".to_string()))
        } else {
            Err(ApiError::Response(format!(
                "API returned status {}",
                response.status()
            )))
        }
    }

    async fn create_session(
        &self,
        options: SessionOptions,
    ) -> Result<Arc<dyn ModelSession>, ApiError> {
        let history = options
            .system_prompt
            .as_ref()
            .map(|s| vec![json!({ "role": "system", "content": s })])
            .unwrap_or_default();
        Ok(Arc::new(OpenAiCompatibleSession {
            client: self.client.clone(),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            history: Mutex::new(history),
            destroyed: AtomicBool::new(false),
        }))
    }
}

pub struct OpenAiCompatibleSession {
    client: Client,
    model: String,
    base_url: String,
    api_key: Option<String>,
    history: Mutex<Vec<Value>>,
    destroyed: AtomicBool,
}

impl OpenAiCompatibleSession {
    /// Records a finished exchange as text only, keeping the system prompt
    /// plus the newest messages.
    fn remember(&self, turn: &[Message], reply: &str) {
        let Ok(mut history) = self.history.lock() else {
            return;
        };
        history.extend(turn.iter().map(|m| to_openai(&m.without_media())));
        history.push(json!({ "role": "assistant", "content": reply }));
        let head = history
            .iter()
            .take_while(|m| m["role"] == "system")
            .count();
        trim_history(&mut history, head, SESSION_HISTORY_MESSAGES);
    }
}

#[async_trait]
impl ModelSession for OpenAiCompatibleSession {
    async fn prompt(&self, content: Vec<Message>) -> Result<String, ApiError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ApiError::SessionDestroyed);
        }
        let turn: Vec<Value> = content.iter().map(to_openai).collect();
        let mut messages = match self.history.lock() {
            Ok(h) => h.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        messages.extend(turn);

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(url);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "stream": false,
                "temperature": AI_TEMPERATURE,
                "top_p": AI_TOP_P
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Response(format!(
                "API error ({}): {}",
                status, body
            )));
        }

        let body: ChatResponse = response.json().await?;
        let reply = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ApiError::Response("response contained no choices".to_string()))?;

        self.remember(&content, &reply);
        Ok(reply)
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_map_to_typed_content() {
        let msg = Message::user(vec![
            ContentPart::Text("transcribe".to_string()),
            ContentPart::Audio {
                bytes: vec![1, 2, 3],
                mime: "audio/wav".to_string(),
            },
            ContentPart::Image(vec![9]),
        ]);
        let value = to_openai(&msg);
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][1]["input_audio"]["format"], "wav");
        assert_eq!(
            value["content"][1]["input_audio"]["data"],
            STANDARD.encode([1, 2, 3])
        );
        let url = value["content"][2]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn audio_format_defaults_to_wav() {
        assert_eq!(audio_format("audio/wav"), "wav");
        assert_eq!(audio_format("audio/mpeg"), "mp3");
        assert_eq!(audio_format("audio/webm"), "wav");
    }

    #[test]
    fn remembered_turns_drop_media_and_stay_capped() {
        let session = OpenAiCompatibleSession {
            client: Client::new(),
            model: "m".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: None,
            history: Mutex::new(vec![json!({ "role": "system", "content": "sys" })]),
            destroyed: AtomicBool::new(false),
        };
        let capture = vec![Message::user(vec![
            ContentPart::Text("transcribe".to_string()),
            ContentPart::Audio {
                bytes: vec![3; 30_000],
                mime: "audio/wav".to_string(),
            },
        ])];
        for i in 0..10 {
            session.remember(&capture, &format!("y_{}", i));
        }

        let history = session.history.lock().unwrap();
        assert_eq!(history.len(), 1 + SESSION_HISTORY_MESSAGES);
        assert_eq!(history[0]["role"], "system");
        assert_eq!(history.last().unwrap()["content"], "y_9");
        let stored = serde_json::to_string(&*history).unwrap();
        assert!(!stored.contains("input_audio"));
        assert!(stored.len() < 2_000);
    }

    #[tokio::test]
    async fn unlisted_modality_is_unavailable() {
        let service = OpenAiCompatibleService::new(
            "local".to_string(),
            "m".to_string(),
            "http://127.0.0.1:9".to_string(),
            None,
            vec![Modality::Text],
        );
        assert_eq!(
            service.availability(Some(Modality::Image)).await.unwrap(),
            Availability::Unavailable
        );
    }
}
