pub mod error;
pub mod huggingface;
pub mod ollama;
pub mod openai;
pub mod prompt;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::provider::Provider;
use crate::state::ChatMessage;

pub use error::InferenceError;
pub use huggingface::HuggingFaceClient;
pub use ollama::OllamaClient;
pub use openai::OpenAIClient;
pub use stream::{collect_reply, DeltaStream, ReplyMode, StreamAccumulator};

const REQUEST_TIMEOUT_SECS: u64 = 120;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Sampling settings sent with every call.
///
/// Defaults lean toward short, fairly deterministic, non-repetitive replies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.7,
            top_p: 0.95,
            repetition_penalty: 1.1,
        }
    }
}

/// Everything a backend needs for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub system_prompt: Option<String>,
    /// Prior turns, already windowed; does not include `message`.
    pub history: Vec<ChatMessage>,
    pub message: String,
    pub params: GenerationParams,
}

/// A hosted or local model that turns a conversation into text.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn provider(&self) -> Provider;

    fn model(&self) -> &str;

    /// Single-shot completion.
    async fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError>;

    /// Token-by-token completion. The stream ends when the server closes it.
    async fn stream(&self, request: &InferenceRequest) -> Result<DeltaStream, InferenceError>;
}

pub(crate) fn http_client() -> Result<reqwest::Client, InferenceError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
        .map_err(|e| InferenceError::HttpClientBuild(e.to_string()))
}

/// Construct the client for `provider`, with credentials from env or config.
///
/// A missing credential is not an error here; calls on the returned backend
/// fail with [`InferenceError::MissingCredential`] instead.
pub fn build_backend(
    provider: Provider,
    model: &str,
    config: &Config,
) -> Result<Arc<dyn InferenceBackend>, InferenceError> {
    let api_key = config.api_key(provider);
    let backend: Arc<dyn InferenceBackend> = match provider {
        Provider::HuggingFace => Arc::new(HuggingFaceClient::new(
            config.huggingface_base_url(),
            model,
            api_key,
        )?),
        Provider::OpenAI => Arc::new(OpenAIClient::new(config.openai_base_url(), model, api_key)?),
        Provider::Ollama => Arc::new(OllamaClient::new(config.ollama_url(), model)?),
    };
    Ok(backend)
}

pub(crate) fn require_key<'a>(
    provider: Provider,
    key: &'a Option<String>,
) -> Result<&'a str, InferenceError> {
    key.as_deref()
        .filter(|k| !k.trim().is_empty())
        .ok_or(InferenceError::MissingCredential {
            provider,
            var: provider.api_key_env().unwrap_or("API key"),
        })
}
