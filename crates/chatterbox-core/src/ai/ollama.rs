use async_trait::async_trait;
use futures_util::{future, Stream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::check_status;
use super::prompt::{role_messages, WireMessage};
use super::stream::{byte_lines, DeltaStream};
use super::{http_client, InferenceBackend, InferenceError, InferenceRequest};
use crate::provider::Provider;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
    top_p: f32,
    repeat_penalty: f32,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: Option<OllamaMessage>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: bool,
}

/// What one line of the chat stream contributes.
#[derive(Debug, Default, PartialEq)]
struct OllamaChunk {
    text: Option<String>,
    done: bool,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Result<Self, InferenceError> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;
        let response = check_status(response).await?;

        let models_response: OllamaModelsResponse = response.json().await?;
        let model_names: Vec<String> = models_response
            .models
            .into_iter()
            .map(|model| model.name)
            .collect();

        Ok(model_names)
    }

    fn body(&self, request: &InferenceRequest, stream: bool) -> OllamaRequest {
        let p = request.params;
        OllamaRequest {
            model: self.model.clone(),
            messages: role_messages(request),
            stream,
            options: OllamaOptions {
                num_predict: p.max_new_tokens,
                temperature: p.temperature,
                top_p: p.top_p,
                repeat_penalty: p.repetition_penalty,
            },
        }
    }

    async fn send(&self, request: &InferenceRequest, stream: bool) -> Result<reqwest::Response, InferenceError> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(%url, stream, history = request.history.len(), "ollama request");

        let response = self
            .client
            .post(&url)
            .json(&self.body(request, stream))
            .send()
            .await
            .map_err(|e| {
                InferenceError::Request(format!(
                    "{}. Make sure Ollama is running with: ollama serve",
                    e
                ))
            })?;

        check_status(response).await
    }
}

#[async_trait]
impl InferenceBackend for OllamaClient {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let response = self.send(request, false).await?;
        let text = response.text().await?;
        Ok(parse_line(&text)?.text.unwrap_or_default())
    }

    async fn stream(&self, request: &InferenceRequest) -> Result<DeltaStream, InferenceError> {
        let response = self.send(request, true).await?;
        Ok(chat_deltas(byte_lines(response.bytes_stream())))
    }
}

/// Text deltas from the chat stream's lines, ending at the `done` object.
fn chat_deltas<S>(lines: S) -> DeltaStream
where
    S: Stream<Item = Result<String, InferenceError>> + Send + 'static,
{
    lines
        .map(|line| line.and_then(|l| parse_line(&l)))
        .scan(false, |finished, chunk| {
            if *finished {
                return future::ready(None);
            }
            let text = chunk.map(|c| {
                *finished = c.done;
                c.text
            });
            future::ready(Some(text))
        })
        .try_filter_map(|text| future::ready(Ok(text)))
        .boxed()
}

/// One newline-delimited JSON object.
fn parse_line(line: &str) -> Result<OllamaChunk, InferenceError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(OllamaChunk::default());
    }
    let parsed: OllamaResponse = serde_json::from_str(line)?;
    if let Some(error) = parsed.error {
        return Err(InferenceError::Request(error));
    }
    Ok(OllamaChunk {
        text: parsed
            .message
            .map(|m| m.content)
            .filter(|c| !c.is_empty()),
        done: parsed.done,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::GenerationParams;

    #[test]
    fn test_body_maps_params_to_options() {
        let client = OllamaClient::new(DEFAULT_BASE_URL, "mistral:latest").unwrap();
        let request = InferenceRequest {
            system_prompt: None,
            history: Vec::new(),
            message: "hi".into(),
            params: GenerationParams::default(),
        };
        let json = serde_json::to_value(client.body(&request, true)).unwrap();
        assert_eq!(json["options"]["num_predict"], 512);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_parse_line() {
        let delta = r#"{"model":"m","message":{"role":"assistant","content":"Hel"},"done":false}"#;
        let chunk = parse_line(delta).unwrap();
        assert_eq!(chunk.text.as_deref(), Some("Hel"));
        assert!(!chunk.done);

        let last = r#"{"model":"m","message":{"role":"assistant","content":""},"done":true}"#;
        assert_eq!(parse_line(last).unwrap(), OllamaChunk { text: None, done: true });

        let failed = r#"{"error":"model 'x' not found"}"#;
        assert!(matches!(parse_line(failed), Err(InferenceError::Request(_))));

        assert_eq!(parse_line("  ").unwrap(), OllamaChunk::default());
    }

    fn lines(raw: &[&str]) -> impl Stream<Item = Result<String, InferenceError>> + Send + 'static {
        let items: Vec<Result<String, InferenceError>> = raw.iter().map(|l| Ok(l.to_string())).collect();
        futures_util::stream::iter(items)
    }

    #[tokio::test]
    async fn test_stream_ends_at_done() {
        let deltas: Vec<String> = chat_deltas(lines(&[
            r#"{"message":{"content":"Hel"},"done":false}"#,
            "",
            r#"{"message":{"content":"lo"},"done":true}"#,
            r#"{"message":{"content":" ignored"},"done":false}"#,
        ]))
        .try_collect()
        .await
        .unwrap();
        assert_eq!(deltas, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_stream_error_line_fails() {
        let result: Result<Vec<String>, InferenceError> = chat_deltas(lines(&[
            r#"{"message":{"content":"Hel"},"done":false}"#,
            r#"{"error":"out of memory"}"#,
        ]))
        .try_collect()
        .await;
        assert!(matches!(result, Err(InferenceError::Request(e)) if e == "out of memory"));
    }
}
