//! Cross-cutting resilience components
//!
//! The response cache and circuit breakers are process-wide values owned by
//! the service root and injected into the pipeline; both are safe for
//! concurrent readers and writers.

mod breaker;
mod cache;

pub use breaker::{BreakerSettings, BreakerState, BreakerStatus, CircuitBreaker};
pub use cache::{CacheStats, CachedResponse, ResponseCache};
