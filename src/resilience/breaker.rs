//! Circuit breaker for downstream dependencies
//!
//! One named breaker per dependency (primary pipeline, LLM provider).
//! closed → open after `threshold` consecutive failures; open → half-open
//! after `reset_timeout`; half-open admits a single probe whose outcome
//! decides the next state.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    /// Consecutive failures before opening
    pub threshold: u32,
    /// Time an open breaker waits before admitting a probe
    pub reset_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Snapshot of a breaker's state for observability
#[derive(Debug, Clone)]
pub struct BreakerStatus {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub open_for: Option<Duration>,
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
    last_probe_at: Option<Instant>,
    probe_inflight: bool,
}

/// Named circuit breaker with interior synchronisation
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                opened_at: None,
                last_probe_at: None,
                probe_inflight: false,
            }),
        }
    }

    /// Whether a call may proceed. Transitions open → half-open when the
    /// reset timeout has elapsed; half-open admits exactly one probe at a
    /// time.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.settings.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_inflight = true;
                    inner.last_probe_at = Some(Instant::now());
                    tracing::info!(breaker = %self.name, "Circuit breaker half-open, admitting probe");
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_inflight {
                    false
                } else {
                    inner.probe_inflight = true;
                    inner.last_probe_at = Some(Instant::now());
                    true
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                inner.opened_at = None;
                inner.probe_inflight = false;
                tracing::info!(breaker = %self.name, "Circuit breaker closed after successful probe");
            }
            BreakerState::Open => {
                // Late success from a call admitted before opening; ignore
            }
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count += 1;
        match inner.state {
            BreakerState::Closed => {
                if inner.failure_count >= self.settings.threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "Circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_inflight = false;
                tracing::warn!(breaker = %self.name, "Circuit breaker reopened after failed probe");
            }
            BreakerState::Open => {}
        }
    }

    /// Current state without side effects
    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock().unwrap();
        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            open_for: inner.opened_at.map(|t| t.elapsed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
