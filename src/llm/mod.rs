//! LLM provider capability
//!
//! The pipeline talks to language models through the [`ChatModel`] trait so
//! the provider can be swapped (OpenAI-compatible HTTP, or a mock in tests).
//! Deadlines are propagated with every call and honoured cooperatively.

mod guard;
mod openai;
mod retry;

pub use guard::GuardedChatModel;
pub use openai::OpenAiChatModel;
pub use retry::{with_retry, RetryPolicy};

use async_trait::async_trait;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum ChatError {
    /// Retryable failure (timeouts, rate limits, 5xx)
    #[error("Transient chat error: {0}")]
    Transient(String),

    /// Non-retryable failure (bad request, auth)
    #[error("Fatal chat error: {0}")]
    Fatal(String),

    /// The call's deadline fired before a response arrived
    #[error("Chat deadline exceeded")]
    DeadlineExceeded,

    /// A circuit breaker refused the call
    #[error("Chat circuit breaker is open")]
    CircuitOpen,

    /// The model replied, but not in the shape the caller asked for
    #[error("Unparseable model response: {0}")]
    Unparseable(String),

    /// Required API key environment variable is missing
    #[error("API key environment variable {var} is not set")]
    MissingApiKey { var: String },

    /// The provider does not implement this capability
    #[error("Capability not supported: {0}")]
    Unsupported(&'static str),
}

impl ChatError {
    /// Whether a retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::Transient(_) | ChatError::Unparseable(_))
    }
}

/// Options attached to every chat call
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Absolute point in time after which the call must give up
    pub deadline: Option<Instant>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatOptions {
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Default::default()
        }
    }

    /// Time left before the deadline, `None` when no deadline is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has already fired
    pub fn expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }
}

/// Trait for chat completion providers
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete a prompt, returning the model's text
    async fn chat(&self, prompt: &str, options: &ChatOptions) -> Result<String, ChatError>;

    /// Stream a completion as text chunks. The default implementation
    /// performs a blocking completion and yields it as a single chunk.
    async fn chat_stream(
        &self,
        prompt: &str,
        options: &ChatOptions,
    ) -> Result<mpsc::Receiver<String>, ChatError> {
        let text = self.chat(prompt, options).await?;
        let (tx, rx) = mpsc::channel(1);
        // Receiver may already be gone; nothing to do then
        let _ = tx.send(text).await;
        Ok(rx)
    }

    /// Score passages against a query with an external rerank model.
    /// Providers without one return `Unsupported` and the reranker falls
    /// back to grader confidence ordering.
    async fn rerank(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>, ChatError> {
        Err(ChatError::Unsupported("rerank"))
    }

    /// Model identifier for logs
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_remaining() {
        let opts = ChatOptions::default();
        assert!(opts.remaining().is_none());
        assert!(!opts.expired());

        let past = ChatOptions::with_deadline(Instant::now() - Duration::from_secs(1));
        assert!(past.expired());

        let future = ChatOptions::with_deadline(Instant::now() + Duration::from_secs(60));
        assert!(!future.expired());
        assert!(future.remaining().unwrap() > Duration::from_secs(50));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ChatError::Transient("503".into()).is_transient());
        assert!(ChatError::Unparseable("bad grade".into()).is_transient());
        assert!(!ChatError::Fatal("401".into()).is_transient());
        assert!(!ChatError::CircuitOpen.is_transient());
    }
}
