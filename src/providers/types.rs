use serde::Deserialize;
use thiserror::Error;

use crate::models::Message;

/// Failure of a completion call, classified from the response rather than
/// from the transport's error shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("Invalid API key. Please check your key and try again.")]
    Unauthorized,

    #[error("Rate limit exceeded. Please wait a moment and try again.")]
    RateLimited,

    /// The endpoint returned a machine-readable error payload.
    #[error("{0}")]
    Remote(String),

    /// Anything else, including network failures and timeouts.
    #[error("An error occurred while sending the message.")]
    Unknown { detail: String },
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

impl CompletionError {
    /// Classify a non-success HTTP response by status code and body shape.
    pub fn classify(status: u16, body: &str) -> Self {
        match status {
            401 => CompletionError::Unauthorized,
            429 => CompletionError::RateLimited,
            _ => match serde_json::from_str::<ErrorEnvelope>(body) {
                Ok(ErrorEnvelope {
                    error: ErrorDetail { message: Some(message) },
                }) if !message.trim().is_empty() => CompletionError::Remote(message),
                _ => CompletionError::Unknown {
                    detail: format!("HTTP {}", status),
                },
            },
        }
    }

    pub fn unknown(detail: impl Into<String>) -> Self {
        CompletionError::Unknown {
            detail: detail.into(),
        }
    }
}

#[derive(Clone)]
pub struct CompletionRequest {
    pub api_key: String,
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl std::fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("messages", &format!("[{} messages]", self.messages.len()))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    /// Generated text, trimmed.
    pub content: String,
    pub model: String,
    pub tokens_in: Option<i64>,
    pub tokens_out: Option<i64>,
}
