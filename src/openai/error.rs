//! Error taxonomy for talking to a model provider and running a
//! generation.
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerateError {
    /// Blank or whitespace-only prompt
    #[error("Please enter a prompt")]
    InvalidInput,

    /// The provider rejected the API key (HTTP 401/403)
    #[error("Invalid API key: {0}")]
    Auth(String),

    /// HTTP 429. Recoverable by retrying later or with a fallback model.
    #[error("Rate limit exceeded for model {model}")]
    RateLimited { model: String },

    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// No response or fragment arrived within the stall timeout
    #[error("No data received for {0:?}, giving up on the connection")]
    Stalled(Duration),

    /// A stream frame that could not be decoded. Streams skip these
    /// unless no frame in the stream decodes.
    #[error("Malformed stream frame: {0}")]
    MalformedFrame(String),

    /// Non-recoverable response from the provider
    #[error("Model error: {message}")]
    Model {
        status: Option<u16>,
        message: String,
    },

    #[error("Code generation cancelled")]
    Cancelled,
}

impl GenerateError {
    /// Whether issuing the same request again could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerateError::RateLimited { .. } | GenerateError::TransientNetwork(_)
        )
    }

    /// Map a non-success HTTP status and response body to an error.
    pub fn from_status(status: u16, model: &str, body: &str) -> Self {
        let message = provider_message(body).unwrap_or_else(|| body.trim().to_string());
        match status {
            401 | 403 => GenerateError::Auth(message),
            429 => GenerateError::RateLimited {
                model: model.to_string(),
            },
            408 | 500..=599 => GenerateError::TransientNetwork(format!("HTTP {status}: {message}")),
            _ => GenerateError::Model {
                status: Some(status),
                message,
            },
        }
    }
}

impl From<reqwest::Error> for GenerateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GenerateError::Model {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        } else {
            GenerateError::TransientNetwork(err.to_string())
        }
    }
}

// OpenAI nests the message under `error`, Mistral puts it at the top
// level.
fn provider_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["error"]["message"]
        .as_str()
        .or_else(|| value["message"].as_str())
        .or_else(|| value["error"].as_str())
        .map(str::to_string)
}
