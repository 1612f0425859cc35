//! Retry policy for transient LLM failures

use crate::llm::ChatError;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};

/// Exponential backoff with jitter, bounded by an optional deadline
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles each attempt
    pub base_delay: Duration,
    /// Fraction of the delay applied as symmetric jitter
    pub jitter_frac: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            jitter_frac: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Default::default()
        }
    }

    /// Backoff delay for a given attempt (0-based), with ±jitter applied
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as f64 * 2f64.powi(attempt as i32);
        let jitter_span = base * self.jitter_frac;
        let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }
}

/// Run an operation with retries on transient errors.
///
/// Non-transient errors abort immediately. A sleep is skipped (and the last
/// error returned) when it would overrun `deadline`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    mut op: F,
) -> Result<T, ChatError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChatError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                if let Some(deadline) = deadline {
                    if Instant::now() + delay >= deadline {
                        tracing::debug!("Retry would overrun deadline, giving up: {}", e);
                        return Err(e);
                    }
                }
                tracing::debug!(
                    "Transient error (attempt {}/{}), retrying in {:?}: {}",
                    attempt + 1,
                    policy.max_retries,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
