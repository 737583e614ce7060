//! Model transport abstraction
//!
//! The agent layer talks to model servers through [`ModelTransport`]. The
//! streaming variant yields decode events in arrival order; raw-completion
//! servers reply with the full text instead and the caller segments it once.

use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::{
    decode::{DecodeEvent, decode_stream},
    error::{Error, Result},
    types::{SamplingParams, WireMessage, WireRole},
};

/// Backoff policy applied when a connection attempt fails
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// How many times to retry before giving up
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling the growing delay never exceeds
    pub max_delay: Duration,
    /// Growth factor applied to the delay per attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff delay before retry number `attempt` (0-indexed), capped at
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// A fully assembled generation request
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub messages: Vec<WireMessage>,
    pub system_instruction: Option<String>,
    pub sampling: SamplingParams,
    /// Model identifier, when the server hosts more than one
    pub model: Option<String>,
}

/// A stream of decode events
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<DecodeEvent>> + Send>>;

/// Either an incremental stream or the complete response text
pub enum ModelReply {
    Stream(DeltaStream),
    Text(String),
}

/// Transport for sending generation requests to a model server
#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Send a request; chunks arrive in order with no gaps. Cancellation
    /// must be honored through the shared token.
    async fn send(&self, request: ModelRequest, cancel: CancellationToken) -> Result<ModelReply>;
}

/// HTTP transport for OpenAI-compatible chat-completion servers
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    streaming: bool,
    retry: RetryConfig,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
            streaming: true,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Disable streaming; the server replies with the full text instead.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn build_body(&self, request: &ModelRequest) -> ChatCompletionBody {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(ref system) = request.system_instruction {
            if !system.trim().is_empty() {
                messages.push(WireMessage::system(system.clone()));
            }
        }
        // An existing leading system message is replaced, not duplicated.
        for msg in &request.messages {
            if msg.role == WireRole::System && !messages.is_empty() {
                continue;
            }
            messages.push(msg.clone());
        }

        ChatCompletionBody {
            model: request.model.clone(),
            messages,
            stream: self.streaming,
            temperature: request.sampling.temperature,
            top_p: request.sampling.top_p,
            top_k: request.sampling.top_k,
            min_p: request.sampling.min_p,
            repeat_penalty: request.sampling.repeat_penalty,
            max_tokens: request.sampling.max_tokens,
            stop: request.sampling.stop.clone(),
        }
    }

    async fn connect(
        &self,
        body: &ChatCompletionBody,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Aborted);
            }

            let mut builder = self.client.post(&url).json(body);
            if let Some(ref key) = self.api_key {
                builder = builder.bearer_auth(key);
            }

            let result = tokio::select! {
                r = builder.send() => r,
                _ = cancel.cancelled() => return Err(Error::Aborted),
            };

            let error = match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let text = response.text().await.unwrap_or_default();
                    Error::api(status, extract_error_message(&text))
                }
                Err(e) => Error::Http(e),
            };

            if attempt < self.retry.max_retries && error.is_retryable() {
                let delay = self.retry.delay_for_attempt(attempt);
                tracing::warn!(
                    "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt + 1,
                    self.retry.max_retries + 1,
                    error,
                    delay
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(error);
        }
    }
}

#[async_trait]
impl ModelTransport for HttpTransport {
    async fn send(&self, request: ModelRequest, cancel: CancellationToken) -> Result<ModelReply> {
        let body = self.build_body(&request);
        let response = self.connect(&body, &cancel).await?;

        if self.streaming {
            let byte_stream = {
                use futures::StreamExt;
                response.bytes_stream().map(|r| r.map_err(Error::Http))
            };
            Ok(ModelReply::Stream(decode_stream(
                Box::pin(byte_stream),
                cancel,
            )))
        } else {
            let text = tokio::select! {
                r = response.text() => r.map_err(Error::Http)?,
                _ = cancel.cancelled() => return Err(Error::Aborted),
            };
            let completion: ChatCompletionResponse = serde_json::from_str(&text)?;
            let content = completion
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default();
            if content.trim().is_empty() {
                return Err(Error::EmptyResponse);
            }
            Ok(ModelReply::Text(content))
        }
    }
}

/// Pull a human-readable message out of an error body, falling back to the raw text.
fn extract_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ErrorDetail>,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: Option<String>,
    }

    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                "Unknown server error".to_string()
            } else {
                body.trim().to_string()
            }
        })
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<WireMessage>,
    stream: bool,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    min_p: f32,
    repeat_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_backoff() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn test_retry_delay_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(20), Duration::from_secs(60));
    }

    #[test]
    fn test_extract_error_message_structured() {
        let body = r#"{"error":{"message":"model not loaded"}}"#;
        assert_eq!(extract_error_message(body), "model not loaded");
    }

    #[test]
    fn test_extract_error_message_fallback() {
        assert_eq!(extract_error_message("plain failure"), "plain failure");
        assert_eq!(extract_error_message("  "), "Unknown server error");
    }

    #[test]
    fn test_build_body_injects_system_instruction() {
        let transport = HttpTransport::new("http://localhost:8082");
        let request = ModelRequest {
            messages: vec![WireMessage::user("hi")],
            system_instruction: Some("be brief".into()),
            sampling: SamplingParams::default(),
            model: Some("llama-3".into()),
        };
        let body = transport.build_body(&request);
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[0].role, WireRole::System);
        assert_eq!(body.messages[0].content, "be brief");
        assert!(body.stream);
    }

    #[test]
    fn test_build_body_replaces_existing_system_message() {
        let transport = HttpTransport::new("http://localhost:8082");
        let request = ModelRequest {
            messages: vec![WireMessage::system("old"), WireMessage::user("hi")],
            system_instruction: Some("new".into()),
            sampling: SamplingParams::default(),
            model: None,
        };
        let body = transport.build_body(&request);
        let systems: Vec<_> = body
            .messages
            .iter()
            .filter(|m| m.role == WireRole::System)
            .collect();
        assert_eq!(systems.len(), 1);
        assert_eq!(systems[0].content, "new");
    }

    #[test]
    fn test_build_body_blank_system_skipped() {
        let transport = HttpTransport::new("http://localhost:8082");
        let request = ModelRequest {
            messages: vec![WireMessage::user("hi")],
            system_instruction: Some("   ".into()),
            sampling: SamplingParams::default(),
            model: None,
        };
        let body = transport.build_body(&request);
        assert_eq!(body.messages.len(), 1);
    }
}
