use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::GenerateError;
use super::sse::{Frame, FrameTally, SseDecoder};

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "user")]
    User,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: &str) -> Self {
        Message {
            role,
            content: content.to_string(),
        }
    }
}

/// Body of a `/v1/chat/completions` request
#[derive(Clone, Serialize, Debug, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// The same request addressed to a different model
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }
}

/// Lazy, forward-only sequence of text fragments. Dropping it closes
/// the underlying connection.
pub type FragmentStream = BoxStream<'static, Result<String, GenerateError>>;

/// A remote text-generation endpoint.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Open a streaming completion. Errors that happen before the
    /// first byte of the body (status codes, connection failures) are
    /// returned here, errors mid-stream are yielded by the stream.
    async fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream, GenerateError>;

    /// Request the whole completion in one response.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerateError>;
}

/// Client for OpenAI compatible chat completion APIs (OpenAI, Mistral,
/// Fireworks, local servers).
#[derive(Clone)]
pub struct OpenAiClient {
    api_hostname: String,
    api_key: String,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_hostname: &str, api_key: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            api_hostname: api_hostname.to_string(),
            api_key: api_key.to_string(),
            http,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.api_hostname.trim_end_matches("/")
        )
    }

    async fn send(&self, request: &CompletionRequest) -> Result<reqwest::Response, GenerateError> {
        tracing::debug!(
            "Sending completion request model={} stream={}",
            request.model,
            request.stream
        );
        let response = self
            .http
            .post(self.url())
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerateError::from_status(
                status.as_u16(),
                &request.model,
                &body,
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream, GenerateError> {
        let request = CompletionRequest {
            stream: true,
            ..request.clone()
        };
        let response = self.send(&request).await?;
        let mut body = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            let mut tally = FrameTally::new();

            'outer: while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(GenerateError::from(e));
                        return;
                    }
                };
                for frame in decoder.push(&chunk) {
                    match frame {
                        Frame::Done => {
                            tally.mark_done();
                            break 'outer;
                        }
                        Frame::Data(data) => match tally.parse(&data) {
                            Ok(Some(fragment)) => yield Ok(fragment),
                            Ok(None) => {}
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        },
                    }
                }
            }

            // The body can end without a trailing blank line
            if !tally.is_done() {
                match decoder.finish() {
                    Some(Frame::Done) => tally.mark_done(),
                    Some(Frame::Data(data)) => match tally.parse(&data) {
                        Ok(Some(fragment)) => yield Ok(fragment),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    },
                    None => {}
                }
            }

            if let Some(e) = tally.finish(decoder.saw_foreign_content()) {
                yield Err(e);
            }
        };

        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerateError> {
        let request = CompletionRequest {
            stream: false,
            ..request.clone()
        };
        let response: Value = self.send(&request).await?.json().await?;

        response["choices"][0]["message"]["content"]
            .as_str()
            .map(|content| content.trim().to_string())
            .ok_or_else(|| GenerateError::Model {
                status: None,
                message: format!("No message received. Resp:\n\n {}", response),
            })
    }
}
