//! Injectable completion capability. Both upstream calls (vision report
//! and text simplification) go through `CompletionProvider`, so tests can
//! substitute deterministic stand-ins for the live API.

mod openai;

pub use openai::OpenAiProvider;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API key environment variable '{0}' is not set")]
    MissingApiKey(String),

    #[error("API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Provider error {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Rate limited (429): {0}")]
    RateLimit(String),

    #[error("Provider returned no completion choices")]
    EmptyResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        match self {
            LlmError::RateLimit(_) => true,
            LlmError::Provider { status, .. } => *status == 429,
            LlmError::Transport(e) => e.status().map(|s| s.as_u16() == 429).unwrap_or(false),
            _ => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            LlmError::Provider { status, .. } => Some(*status),
            LlmError::Transport(e) => e.status().map(|s| s.as_u16()),
            LlmError::RateLimit(_) => Some(429),
            _ => None,
        }
    }
}

/// Vision detail hint passed with the image part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    Low,
    High,
    Auto,
}

impl Detail {
    pub fn as_str(&self) -> &'static str {
        match self {
            Detail::Low => "low",
            Detail::High => "high",
            Detail::Auto => "auto",
        }
    }
}

/// Image content for a vision completion, already encoded as a data URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub data_uri: String,
    pub detail: Detail,
}

/// One-shot chat completions. Each method builds a single user message,
/// performs one billable network call and returns the text of the first
/// completion choice. Errors propagate; there is no retry or fallback.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Vision chat completion: one user message with a text part and an
    /// image part referencing a data URI with a detail hint.
    async fn vision_completion(
        &self,
        model: &str,
        prompt: &str,
        image: &ImagePayload,
        max_tokens: u32,
    ) -> Result<String, LlmError>;

    /// Text chat completion: one plain-text user message.
    async fn text_completion(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError>;
}
