use async_trait::async_trait;
use futures_util::{future, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::check_status;
use super::prompt::{role_messages, WireMessage};
use super::stream::{byte_lines, sse_data, DeltaStream};
use super::{http_client, require_key, InferenceBackend, InferenceError, InferenceRequest};
use crate::provider::Provider;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIChunkChoice {
    delta: OpenAIChunkDelta,
}

#[derive(Deserialize)]
struct OpenAIChunk {
    choices: Vec<OpenAIChunkChoice>,
}

/// Any endpoint speaking the OpenAI chat-completions protocol.
#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAIClient {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Result<Self, InferenceError> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    pub fn list_models() -> Vec<String> {
        vec![
            "gpt-4o".to_string(),
            "gpt-4o-mini".to_string(),
            "gpt-4-turbo".to_string(),
            "gpt-3.5-turbo".to_string(),
        ]
    }

    fn body(&self, request: &InferenceRequest, stream: bool) -> OpenAIRequest {
        let p = request.params;
        OpenAIRequest {
            model: self.model.clone(),
            messages: role_messages(request),
            max_tokens: p.max_new_tokens,
            temperature: p.temperature,
            top_p: p.top_p,
            frequency_penalty: frequency_penalty(p.repetition_penalty),
            stream,
        }
    }

    async fn send(&self, request: &InferenceRequest, stream: bool) -> Result<reqwest::Response, InferenceError> {
        let api_key = require_key(Provider::OpenAI, &self.api_key)?;
        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, stream, history = request.history.len(), "openai request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&self.body(request, stream))
            .send()
            .await?;

        check_status(response).await
    }
}

#[async_trait]
impl InferenceBackend for OpenAIClient {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let response = self.send(request, false).await?;
        let text = response.text().await?;
        parse_completion(&text)
    }

    async fn stream(&self, request: &InferenceRequest) -> Result<DeltaStream, InferenceError> {
        let response = self.send(request, true).await?;
        let deltas = byte_lines(response.bytes_stream())
            .try_filter_map(|line| future::ready(parse_stream_line(&line)))
            .boxed();
        Ok(deltas)
    }
}

/// Map a multiplicative repetition penalty (1.0 = none) onto OpenAI's
/// additive frequency penalty range of -2.0..=2.0.
fn frequency_penalty(repetition_penalty: f32) -> f32 {
    ((repetition_penalty - 1.0) * 2.0).clamp(-2.0, 2.0)
}

fn parse_completion(body: &str) -> Result<String, InferenceError> {
    let openai_response: OpenAIResponse = serde_json::from_str(body)?;
    openai_response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content.unwrap_or_default())
        .ok_or_else(|| InferenceError::Parse("empty choices".to_string()))
}

fn parse_stream_line(line: &str) -> Result<Option<String>, InferenceError> {
    let Some(data) = sse_data(line) else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }
    let chunk: OpenAIChunk = serde_json::from_str(data)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::GenerationParams;
    use crate::state::ChatMessage;

    fn request() -> InferenceRequest {
        InferenceRequest {
            system_prompt: Some("sys".into()),
            history: vec![ChatMessage::user("a"), ChatMessage::assistant("b")],
            message: "c".into(),
            params: GenerationParams::default(),
        }
    }

    #[test]
    fn test_body_uses_role_messages() {
        let client = OpenAIClient::new(DEFAULT_BASE_URL, "gpt-4o-mini", Some("k".into())).unwrap();
        let json = serde_json::to_value(client.body(&request(), false)).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][3]["content"], "c");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_frequency_penalty_mapping() {
        assert_eq!(frequency_penalty(1.0), 0.0);
        assert!((frequency_penalty(1.1) - 0.2).abs() < 1e-6);
        assert_eq!(frequency_penalty(5.0), 2.0);
    }

    #[test]
    fn test_parse_completion() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Hi!"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "Hi!");

        let empty = r#"{"id":"x","choices":[]}"#;
        assert!(matches!(parse_completion(empty), Err(InferenceError::Parse(m)) if m == "empty choices"));
    }

    #[test]
    fn test_parse_stream_line() {
        let line = r#"data: {"id":"x","choices":[{"index":0,"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_stream_line(line).unwrap().as_deref(), Some("Hel"));

        let role_only = r#"data: {"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_stream_line(role_only).unwrap(), None);

        assert_eq!(parse_stream_line("data: [DONE]").unwrap(), None);
        assert_eq!(parse_stream_line(": ping").unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_key_is_reported() {
        let client = OpenAIClient::new("http://127.0.0.1:9", "m", Some("  ".into())).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
