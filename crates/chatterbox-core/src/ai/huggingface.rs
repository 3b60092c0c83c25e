use async_trait::async_trait;
use futures_util::{future, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::check_status;
use super::prompt::instruction_prompt;
use super::stream::{byte_lines, sse_data, DeltaStream};
use super::{http_client, require_key, InferenceBackend, InferenceError, InferenceRequest};
use crate::provider::Provider;

pub const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";

#[derive(Serialize)]
struct HfParameters {
    max_new_tokens: u32,
    temperature: f32,
    top_p: f32,
    repetition_penalty: f32,
    return_full_text: bool,
}

#[derive(Serialize)]
struct HfRequest {
    inputs: String,
    parameters: HfParameters,
    stream: bool,
}

#[derive(Deserialize)]
struct HfGenerated {
    generated_text: String,
}

#[derive(Deserialize)]
struct HfToken {
    text: String,
    #[serde(default)]
    special: bool,
}

#[derive(Deserialize)]
struct HfStreamEvent {
    #[serde(default)]
    token: Option<HfToken>,
    #[serde(default)]
    error: Option<String>,
}

/// Text-generation endpoint fed an instruction-framed prompt.
#[derive(Clone)]
pub struct HuggingFaceClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HuggingFaceClient {
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
            "mistralai/Mistral-7B-Instruct-v0.2".to_string(),
            "mistralai/Mixtral-8x7B-Instruct-v0.1".to_string(),
            "meta-llama/Llama-2-7b-chat-hf".to_string(),
            "HuggingFaceH4/zephyr-7b-beta".to_string(),
        ]
    }

    fn body(&self, request: &InferenceRequest, stream: bool) -> HfRequest {
        let p = request.params;
        HfRequest {
            inputs: instruction_prompt(request),
            parameters: HfParameters {
                max_new_tokens: p.max_new_tokens,
                temperature: p.temperature,
                top_p: p.top_p,
                repetition_penalty: p.repetition_penalty,
                return_full_text: false,
            },
            stream,
        }
    }

    async fn send(&self, request: &InferenceRequest, stream: bool) -> Result<reqwest::Response, InferenceError> {
        let api_key = require_key(Provider::HuggingFace, &self.api_key)?;
        let url = format!("{}/models/{}", self.base_url, self.model);
        debug!(%url, stream, history = request.history.len(), "huggingface request");

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
impl InferenceBackend for HuggingFaceClient {
    fn provider(&self) -> Provider {
        Provider::HuggingFace
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let response = self.send(request, false).await?;
        let text = response.text().await?;
        parse_generated(&text)
    }

    async fn stream(&self, request: &InferenceRequest) -> Result<DeltaStream, InferenceError> {
        let response = self.send(request, true).await?;
        let deltas = byte_lines(response.bytes_stream())
            .try_filter_map(|line| future::ready(parse_stream_line(&line)))
            .boxed();
        Ok(deltas)
    }
}

fn parse_generated(body: &str) -> Result<String, InferenceError> {
    let generated: Vec<HfGenerated> = serde_json::from_str(body)?;
    generated
        .into_iter()
        .next()
        .map(|g| g.generated_text)
        .ok_or_else(|| InferenceError::Parse("empty generation list".to_string()))
}

/// One SSE line to an optional text delta. End-of-sequence tokens are dropped.
fn parse_stream_line(line: &str) -> Result<Option<String>, InferenceError> {
    let Some(data) = sse_data(line) else {
        return Ok(None);
    };
    if data.trim().is_empty() {
        return Ok(None);
    }
    let event: HfStreamEvent = serde_json::from_str(data)?;
    if let Some(error) = event.error {
        return Err(InferenceError::Request(error));
    }
    let token = event
        .token
        .ok_or_else(|| InferenceError::Parse("stream event without a token".to_string()))?;
    if token.special || token.text.is_empty() {
        return Ok(None);
    }
    Ok(Some(token.text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::GenerationParams;

    fn request() -> InferenceRequest {
        InferenceRequest {
            system_prompt: Some("Be brief.".into()),
            history: Vec::new(),
            message: "Hi".into(),
            params: GenerationParams::default(),
        }
    }

    #[test]
    fn test_body_carries_prompt_and_params() {
        let client = HuggingFaceClient::new(DEFAULT_BASE_URL, "m", None).unwrap();
        let json = serde_json::to_value(client.body(&request(), true)).unwrap();
        assert_eq!(json["inputs"], "<s>Be brief.\n[INST] Hi [/INST]");
        assert_eq!(json["stream"], true);
        assert_eq!(json["parameters"]["max_new_tokens"], 512);
        assert_eq!(json["parameters"]["return_full_text"], false);
    }

    #[test]
    fn test_parse_generated() {
        let body = r#"[{"generated_text":" Hello!"}]"#;
        assert_eq!(parse_generated(body).unwrap(), " Hello!");
        assert!(parse_generated("[]").is_err());
        assert!(parse_generated(r#"{"error":"loading"}"#).is_err());
    }

    #[test]
    fn test_parse_stream_line() {
        let line = r#"data:{"token":{"id":1,"text":"Hel","logprob":-0.1,"special":false},"generated_text":null}"#;
        assert_eq!(parse_stream_line(line).unwrap().as_deref(), Some("Hel"));

        let eos = r#"data:{"token":{"id":2,"text":"</s>","special":true},"generated_text":"Hello"}"#;
        assert_eq!(parse_stream_line(eos).unwrap(), None);

        assert_eq!(parse_stream_line("").unwrap(), None);
        assert!(parse_stream_line("data:{oops").is_err());
        assert!(matches!(parse_stream_line("data:{}"), Err(InferenceError::Parse(_))));
    }

    #[test]
    fn test_stream_error_event_keeps_server_message() {
        let line = r#"data:{"error":"Model is overloaded","error_type":"overloaded"}"#;
        let err = parse_stream_line(line).unwrap_err();
        assert!(matches!(&err, InferenceError::Request(m) if m == "Model is overloaded"));
        assert!(err.to_string().contains("Model is overloaded"));
    }

    #[tokio::test]
    async fn test_missing_token_fails_without_network() {
        let client = HuggingFaceClient::new("http://127.0.0.1:9", "m", None).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            InferenceError::MissingCredential { var: "HF_TOKEN", .. }
        ));
        assert!(client.stream(&request()).await.is_err());
    }
}
