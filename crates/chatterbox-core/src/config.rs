use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result, anyhow};

use crate::ai::{huggingface, ollama, openai, GenerationParams, ReplyMode};
use crate::provider::Provider;
use crate::session::SessionOptions;
use crate::transcript::DEFAULT_HISTORY_WINDOW;
use crate::validation::DEFAULT_MAX_MESSAGE_CHARS;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful, concise assistant. \
Answer clearly and use Markdown with fenced code blocks when showing code.";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub provider: Option<String>,
    pub default_model: Option<String>,
    pub huggingface_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub huggingface_base_url: Option<String>,
    pub openai_base_url: Option<String>,
    pub ollama_url: Option<String>,
    pub system_prompt: Option<String>,
    pub streaming: Option<bool>,
    /// `0` disables the history window.
    pub history_window: Option<usize>,
    pub max_message_chars: Option<usize>,
    pub generation: Option<GenerationParams>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            provider: Some(Provider::HuggingFace.as_str().to_string()),
            ..Self::default()
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config {:?}", config_path))?;
        let config: Config = serde_json::from_str(&config_content)
            .with_context(|| format!("Failed to parse config {:?}", config_path))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("chatterbox").join("config.json"))
    }

    pub fn provider(&self) -> Provider {
        self.provider
            .as_deref()
            .and_then(Provider::from_str)
            .unwrap_or(Provider::HuggingFace)
    }

    /// Saved model, or the provider's default when none is saved.
    pub fn model_for(&self, provider: Provider) -> String {
        match (&self.default_model, self.provider() == provider) {
            (Some(model), true) => model.clone(),
            _ => provider.default_model().to_string(),
        }
    }

    /// Credential for `provider`: environment first, then this config.
    pub fn api_key(&self, provider: Provider) -> Option<String> {
        let from_env = provider
            .api_key_env()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.trim().is_empty());
        from_env.or_else(|| self.stored_key(provider).cloned())
    }

    /// Where the credential for a provider comes from: "env", "config", "local", or None
    pub fn key_source(&self, provider: Provider) -> Option<&'static str> {
        let Some(var) = provider.api_key_env() else {
            return Some("local");
        };
        if std::env::var(var).map(|k| !k.trim().is_empty()).unwrap_or(false) {
            Some("env")
        } else if self.stored_key(provider).is_some() {
            Some("config")
        } else {
            None
        }
    }

    pub fn set_api_key(&mut self, provider: Provider, key: &str) {
        match provider {
            Provider::HuggingFace => self.huggingface_api_key = Some(key.to_string()),
            Provider::OpenAI => self.openai_api_key = Some(key.to_string()),
            Provider::Ollama => {}
        }
    }

    fn stored_key(&self, provider: Provider) -> Option<&String> {
        match provider {
            Provider::HuggingFace => self.huggingface_api_key.as_ref(),
            Provider::OpenAI => self.openai_api_key.as_ref(),
            Provider::Ollama => None,
        }
        .filter(|k| !k.trim().is_empty())
    }

    pub fn huggingface_base_url(&self) -> &str {
        self.huggingface_base_url
            .as_deref()
            .unwrap_or(huggingface::DEFAULT_BASE_URL)
    }

    pub fn openai_base_url(&self) -> &str {
        self.openai_base_url.as_deref().unwrap_or(openai::DEFAULT_BASE_URL)
    }

    pub fn ollama_url(&self) -> &str {
        self.ollama_url.as_deref().unwrap_or(ollama::DEFAULT_BASE_URL)
    }

    pub fn reply_mode(&self) -> ReplyMode {
        if self.streaming.unwrap_or(true) {
            ReplyMode::Streaming
        } else {
            ReplyMode::Batch
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        let window = match self.history_window {
            Some(0) => None,
            Some(n) => Some(n),
            None => Some(DEFAULT_HISTORY_WINDOW),
        };
        let system_prompt = match &self.system_prompt {
            Some(p) if p.trim().is_empty() => None,
            Some(p) => Some(p.clone()),
            None => Some(DEFAULT_SYSTEM_PROMPT.to_string()),
        };
        SessionOptions {
            window,
            max_message_chars: self
                .max_message_chars
                .unwrap_or(DEFAULT_MAX_MESSAGE_CHARS),
            system_prompt,
            params: self.generation.unwrap_or_default(),
        }
    }
}
