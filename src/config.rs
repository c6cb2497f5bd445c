use crate::api::Modality;
use crate::constants::{CONFIG_DIR_NAME, DEFAULT_MODEL, OLLAMA_BASE_URL, OPENAI_COMPAT_BASE_URL};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub active_model: String,
    /// Input channels the model accepts besides plain text prompts.
    #[serde(default = "default_modalities")]
    pub modalities: Vec<Modality>,
}

fn default_modalities() -> Vec<Modality> {
    vec![Modality::Text, Modality::Image]
}

impl ProviderConfig {
    pub fn ollama_default() -> Self {
        Self {
            name: "Ollama".to_string(),
            api_key: None,
            base_url: OLLAMA_BASE_URL.to_string(),
            active_model: DEFAULT_MODEL.to_string(),
            modalities: default_modalities(),
        }
    }

    pub fn openai_compat_default() -> Self {
        Self {
            name: "Local OpenAI-compatible".to_string(),
            api_key: None,
            base_url: OPENAI_COMPAT_BASE_URL.to_string(),
            active_model: "gemma-3n-e4b-it".to_string(),
            modalities: vec![Modality::Text, Modality::Image, Modality::Audio],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    pub active_provider: String,
    pub providers: Vec<ProviderConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            active_provider: "Ollama".to_string(),
            providers: vec![
                ProviderConfig::ollama_default(),
                ProviderConfig::openai_compat_default(),
            ],
        }
    }
}

impl AppConfig {
    pub fn config_dir() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(CONFIG_DIR_NAME);
        path
    }

    pub fn config_file() -> PathBuf {
        let mut path = Self::config_dir();
        path.push("config.toml");
        path
    }

    pub fn load() -> Self {
        let path = Self::config_file();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Ignoring malformed {}: {}", path.display(), e),
                },
                Err(e) => tracing::warn!("Could not read {}: {}", path.display(), e),
            }
        }
        let default = Self::default();
        if let Err(e) = default.save() {
            tracing::warn!("Could not write default config: {}", e);
        }
        default
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(Self::config_file(), content)?;
        Ok(())
    }

    pub fn get_active_provider(&self) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.name == self.active_provider)
    }
}
