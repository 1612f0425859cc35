//! Circuit-breaker wrapper around a chat model

use crate::llm::{ChatError, ChatModel, ChatOptions};
use crate::resilience::CircuitBreaker;
use async_trait::async_trait;
use std::sync::Arc;

/// Wraps a [`ChatModel`] so every call consults a named circuit breaker.
///
/// Open breaker ⇒ `ChatError::CircuitOpen` without touching the provider.
/// Deadline misses count as failures; the provider is the thing being
/// protected either way.
pub struct GuardedChatModel {
    inner: Arc<dyn ChatModel>,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedChatModel {
    pub fn new(inner: Arc<dyn ChatModel>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }
}

#[async_trait]
impl ChatModel for GuardedChatModel {
    async fn chat(&self, prompt: &str, options: &ChatOptions) -> Result<String, ChatError> {
        if !self.breaker.allow() {
            return Err(ChatError::CircuitOpen);
        }

        match self.inner.chat(prompt, options).await {
            Ok(text) => {
                self.breaker.record_success();
                Ok(text)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }

    async fn rerank(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, ChatError> {
        if !self.breaker.allow() {
            return Err(ChatError::CircuitOpen);
        }

        match self.inner.rerank(query, passages).await {
            Ok(scores) => {
                self.breaker.record_success();
                Ok(scores)
            }
            // An unsupported capability says nothing about provider health
            Err(e @ ChatError::Unsupported(_)) => Err(e),
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::BreakerSettings;
    use std::time::Duration;

    struct FailingModel;

    #[async_trait]
    impl ChatModel for FailingModel {
        async fn chat(&self, _prompt: &str, _options: &ChatOptions) -> Result<String, ChatError> {
            Err(ChatError::Transient("down".into()))
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let breaker = Arc::new(CircuitBreaker::new(
            "llm",
            BreakerSettings {
                threshold: 3,
                reset_timeout: Duration::from_secs(60),
            },
        ));
        let guarded = GuardedChatModel::new(Arc::new(FailingModel), breaker.clone());
        let opts = ChatOptions::default();

        for _ in 0..3 {
            let err = guarded.chat("hi", &opts).await.unwrap_err();
            assert!(matches!(err, ChatError::Transient(_)));
        }

        // Breaker is now open; provider is no longer called
        let err = guarded.chat("hi", &opts).await.unwrap_err();
        assert!(matches!(err, ChatError::CircuitOpen));
    }
}
