//! Configuration management for Prism
//!
//! Loading, validation, and environment overrides for the query service.
//! Every tunable the pipeline reads lives here so behaviour is reproducible
//! from a single TOML file.

use crate::error::{PrismError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub retrieval: RetrievalConfig,
    pub grader: GraderConfig,
    pub generator: GeneratorConfig,
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
}

/// Request handling and domain routing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Global cap on concurrent requests; excess is rejected, not queued
    pub inflight_cap: usize,
    /// Deadline for the main pipeline path
    pub request_deadline_ms: u64,
    /// Deadline for the fallback path
    pub fallback_deadline_ms: u64,
    /// Domain used when none is specified
    pub default_domain: String,
    /// Directory for metrics and feedback logs
    pub log_dir: PathBuf,
    /// Maps domain names to collection names (keep last: serialises as a table)
    pub domain_collections: HashMap<String, String>,
}

/// Hybrid retrieval tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidates returned by the hybrid retriever
    pub k_retrieve: usize,
    /// Survivors fed to the generator
    pub k_rerank: usize,
    /// Fusion weight for semantic ranking (must sum to 1 with w_bm25)
    pub w_semantic: f32,
    /// Fusion weight for lexical ranking
    pub w_bm25: f32,
    /// RRF rank constant
    pub rrf_k: f32,
    /// HNSW ef parameter at search time
    pub hnsw_ef_search: usize,
    /// Whether the LLM query expander runs for ambiguous queries
    pub expander_enabled: bool,
    /// Queries with at most this many words are considered expansion candidates
    pub expander_max_words: usize,
}

/// Relevance grading fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraderConfig {
    /// Cap on concurrent grading calls
    pub parallelism: usize,
    /// Per-call timeout
    pub timeout_ms: u64,
    /// Retries per call on transient errors
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub retry_base_ms: u64,
    /// Survivors below this confidence are dropped at rerank
    pub confidence_threshold: f32,
}

/// Answer synthesis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Response cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_s: u64,
    pub max_size: usize,
}

/// Circuit breaker defaults (applied to every named breaker)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before opening
    pub threshold: u32,
    /// Seconds before an open breaker admits a probe
    pub reset_s: u64,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    /// Smaller model used for intent classification and grading
    pub utility_model: String,
    pub temperature: f32,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
}

/// Index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Must match the embedder's output dimension
    pub vector_dim: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
    /// Directory holding per-collection lexical indexes
    pub index_dir: PathBuf,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PrismError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| PrismError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| PrismError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: PRISM_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("PRISM_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "LLM__MODEL" => {
                self.llm.model = value.to_string();
            }
            "LLM__BASE_URL" => {
                self.llm.base_url = value.to_string();
            }
            "CACHE__ENABLED" => {
                self.cache.enabled = Self::parse_env(path, value)?;
            }
            "RETRIEVAL__EXPANDER_ENABLED" => {
                self.retrieval.expander_enabled = Self::parse_env(path, value)?;
            }
            "SERVICE__INFLIGHT_CAP" => {
                self.service.inflight_cap = Self::parse_env(path, value)?;
            }
            "SERVICE__REQUEST_DEADLINE_MS" => {
                self.service.request_deadline_ms = Self::parse_env(path, value)?;
            }
            "GRADER__PARALLELISM" => {
                self.grader.parallelism = Self::parse_env(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
        value.parse().map_err(|_| PrismError::InvalidConfigValue {
            path: path.to_string(),
            message: format!("Cannot parse '{}'", value),
        })
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| PrismError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("prism").join("config.toml"))
    }

    /// Resolve the collection name for a domain
    pub fn collection_for_domain(&self, domain: &str) -> Result<&str> {
        self.service
            .domain_collections
            .get(domain)
            .map(|s| s.as_str())
            .ok_or_else(|| PrismError::UnknownDomain {
                domain: domain.to_string(),
            })
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.service.request_deadline_ms)
    }

    pub fn fallback_deadline(&self) -> Duration {
        Duration::from_millis(self.service.fallback_deadline_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut domain_collections = HashMap::new();
        domain_collections.insert("investments".to_string(), "wm_investments".to_string());
        domain_collections.insert("app_education".to_string(), "app_education_docs".to_string());

        Self {
            service: ServiceConfig {
                inflight_cap: 32,
                request_deadline_ms: 15_000,
                fallback_deadline_ms: 5_000,
                default_domain: "investments".to_string(),
                log_dir: PathBuf::from("logs"),
                domain_collections,
            },
            retrieval: RetrievalConfig {
                k_retrieve: 10,
                k_rerank: 5,
                w_semantic: 0.6,
                w_bm25: 0.4,
                rrf_k: 60.0,
                hnsw_ef_search: 50,
                expander_enabled: true,
                expander_max_words: 4,
            },
            grader: GraderConfig {
                parallelism: 16,
                timeout_ms: 3_000,
                max_retries: 2,
                retry_base_ms: 250,
                confidence_threshold: 0.3,
            },
            generator: GeneratorConfig {
                timeout_ms: 8_000,
                max_retries: 2,
                temperature: 0.1,
                max_tokens: 512,
            },
            cache: CacheConfig {
                enabled: true,
                ttl_s: 3_600,
                max_size: 1_000,
            },
            breaker: BreakerConfig {
                threshold: 5,
                reset_s: 60,
            },
            llm: LlmConfig {
                provider: "openai".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                model: "gpt-4o-mini".to_string(),
                utility_model: "gpt-4o-mini".to_string(),
                temperature: 0.1,
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                batch_size: 32,
            },
            indexing: IndexingConfig {
                vector_dim: 384,
                hnsw_ef_construction: 200,
                hnsw_m: 16,
                index_dir: PathBuf::from("indexes"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.retrieval.k_retrieve, 10);
        assert_eq!(parsed.service.inflight_cap, 32);
    }

    #[test]
    fn test_collection_for_domain() {
        let config = Config::default();
        assert_eq!(
            config.collection_for_domain("investments").unwrap(),
            "wm_investments"
        );
        assert!(config.collection_for_domain("no_such_domain").is_err());
    }
}
