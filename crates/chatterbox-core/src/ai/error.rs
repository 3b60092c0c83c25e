use thiserror::Error;

use crate::provider::Provider;

/// Why an inference call failed. Any of these ends the turn.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("{} API key not configured (set {var} or add it to the config file)", .provider.display_name())]
    MissingCredential { provider: Provider, var: &'static str },

    #[error("request failed: {0}")]
    Request(String),

    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not parse response: {0}")]
    Parse(String),

    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl From<reqwest::Error> for InferenceError {
    fn from(e: reqwest::Error) -> Self {
        InferenceError::Request(e.to_string())
    }
}

impl From<serde_json::Error> for InferenceError {
    fn from(e: serde_json::Error) -> Self {
        InferenceError::Parse(e.to_string())
    }
}

/// Turn a non-success response into [`InferenceError::Status`].
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, InferenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(InferenceError::Status {
        status: status.as_u16(),
        body,
    })
}
