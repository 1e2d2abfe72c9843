//! HTTP transport for chat-completion endpoints.
//!
//! Any backend implementing the OpenAI-style envelope (POST
//! `{model, messages, stream: false}`, reply
//! `{choices: [{message: {content}}]}`) is compatible. The
//! [`ChatTransport`] trait is the seam test doubles plug into.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// One turn in a chat conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Transport-level failures, classified for the worker's batch-sizing
/// policy.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The request never completed: connect failure, DNS, timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-2xx status.
    #[error("backend returned HTTP {status}")]
    Http {
        status: u16,
        /// Raw response body, kept for debug logging.
        body: String,
    },

    /// A 2xx reply whose envelope carried no message content.
    #[error("reply envelope contained no message content")]
    EmptyReply,
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send one conversation to the target and return the reply text.
    async fn complete(
        &self,
        target: &str,
        messages: &[ChatMessage],
    ) -> Result<String, BackendError>;
}

/// Production transport backed by one pooled [`reqwest::Client`] per
/// endpoint URL.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create a transport for one endpoint with a per-request timeout.
    pub fn new(endpoint: String, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn complete(
        &self,
        target: &str,
        messages: &[ChatMessage],
    ) -> Result<String, BackendError> {
        let payload = serde_json::json!({
            "model": target,
            "messages": messages,
            "stream": false,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        match envelope
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::trim)
        {
            Some(content) if !content.is_empty() => Ok(content.to_string()),
            _ => Err(BackendError::EmptyReply),
        }
    }
}
