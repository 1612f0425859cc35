//! TTL + LRU response cache
//!
//! Keyed by a fingerprint of `(domain, prompt_name, normalized query text)`.
//! Queries carrying `app_context` never touch the cache; the service
//! enforces that rule before computing a fingerprint at all.

use crate::pipeline::{Citation, Intent, Quality};
use ahash::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The cached portion of a query response
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub quality: Quality,
    pub intent: Intent,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedResponse,
    created_at: Instant,
    ttl: Duration,
    last_access: u64,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Cache statistics counters
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub max_size: usize,
}

struct Inner {
    map: HashMap<u64, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    /// Monotonic access counter backing the LRU ordering
    tick: u64,
}

/// Thread-safe TTL + LRU map of query fingerprints to responses
pub struct ResponseCache {
    inner: Mutex<Inner>,
    hasher: RandomState,
    default_ttl: Duration,
    max_size: usize,
}

impl ResponseCache {
    pub fn new(default_ttl: Duration, max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
                tick: 0,
            }),
            hasher: RandomState::new(),
            default_ttl,
            max_size,
        }
    }

    /// Deterministic fingerprint of the fields that make up a query's cache
    /// identity. Stable for the lifetime of this cache instance.
    pub fn fingerprint(&self, domain: &str, prompt_name: Option<&str>, text: &str) -> u64 {
        let mut hasher = self.hasher.build_hasher();
        domain.hash(&mut hasher);
        prompt_name.unwrap_or("default").hash(&mut hasher);
        normalize(text).hash(&mut hasher);
        hasher.finish()
    }

    /// Get a fresh (unexpired) entry; expired entries are dropped on read
    pub fn get(&self, fingerprint: u64) -> Option<CachedResponse> {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;

        let hit = match inner.map.get_mut(&fingerprint) {
            Some(entry) if !entry.is_expired() => {
                entry.last_access = tick;
                Some(entry.value.clone())
            }
            Some(_) => None,
            None => {
                inner.misses += 1;
                return None;
            }
        };

        match hit {
            Some(value) => {
                inner.hits += 1;
                tracing::debug!(fingerprint, "Cache hit");
                Some(value)
            }
            None => {
                inner.map.remove(&fingerprint);
                inner.misses += 1;
                tracing::debug!(fingerprint, "Cache miss (expired)");
                None
            }
        }
    }

    /// Insert an entry, evicting the least-recently-used one at capacity
    pub fn put(&self, fingerprint: u64, value: CachedResponse, ttl: Option<Duration>) {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.map.contains_key(&fingerprint) && inner.map.len() >= self.max_size {
            if let Some(lru_key) = inner
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| *k)
            {
                inner.map.remove(&lru_key);
                inner.evictions += 1;
                tracing::debug!(evicted = lru_key, "Cache eviction (LRU)");
            }
        }

        inner.map.insert(
            fingerprint,
            CacheEntry {
                value,
                created_at: Instant::now(),
                ttl: ttl.unwrap_or(self.default_ttl),
                last_access: tick,
            },
        );
    }

    /// Clear all entries
    pub fn invalidate(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.map.len();
        inner.map.clear();
        tracing::info!(entries = count, "Cache invalidated");
        count
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            size: inner.map.len(),
            max_size: self.max_size,
        }
    }
}

/// Trim, lowercase, and collapse whitespace. Spelling is left alone.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(answer: &str) -> CachedResponse {
        CachedResponse {
            answer: answer.to_string(),
            citations: Vec::new(),
            quality: Quality::Good,
            intent: Intent::General,
        }
    }

    #[test]
    fn test_fingerprint_normalization() {
        let cache = ResponseCache::new(Duration::from_secs(60), 10);
        let a = cache.fingerprint("investments", None, "What is  VaR? ");
        let b = cache.fingerprint("investments", None, "what is var?");
        let c = cache.fingerprint("investments", None, "what is volatility?");
        let d = cache.fingerprint("app_education", None, "what is var?");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_get_put_and_stats() {
        let cache = ResponseCache::new(Duration::from_secs(60), 10);
        let fp = cache.fingerprint("investments", None, "hello");

        assert!(cache.get(fp).is_none());
        cache.put(fp, response("answer"), None);
        assert_eq!(cache.get(fp).unwrap().answer, "answer");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = ResponseCache::new(Duration::from_millis(10), 10);
        let fp = cache.fingerprint("investments", None, "hello");

        cache.put(fp, response("answer"), None);
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(fp).is_none());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        let fp1 = cache.fingerprint("d", None, "one");
        let fp2 = cache.fingerprint("d", None, "two");
        let fp3 = cache.fingerprint("d", None, "three");

        cache.put(fp1, response("1"), None);
        cache.put(fp2, response("2"), None);

        // Touch fp1 so fp2 becomes least recently used
        assert!(cache.get(fp1).is_some());

        cache.put(fp3, response("3"), None);
        assert!(cache.get(fp2).is_none());
        assert!(cache.get(fp1).is_some());
        assert!(cache.get(fp3).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_invalidate_clears_everything() {
        let cache = ResponseCache::new(Duration::from_secs(60), 10);
        cache.put(1, response("a"), None);
        cache.put(2, response("b"), None);
        assert_eq!(cache.invalidate(), 2);
        assert_eq!(cache.stats().size, 0);
    }
}
