use crate::config::Config;
use crate::error::{PrismError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_service(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_grader(config, &mut errors);
        Self::validate_cache(config, &mut errors);
        Self::validate_breaker(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PrismError::ConfigValidation { errors })
        }
    }

    fn validate_service(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.service.inflight_cap == 0 {
            errors.push(ValidationError::new(
                "service.inflight_cap",
                "Inflight cap must be greater than 0",
            ));
        }

        if config.service.request_deadline_ms == 0 {
            errors.push(ValidationError::new(
                "service.request_deadline_ms",
                "Request deadline must be greater than 0",
            ));
        }

        if config.service.fallback_deadline_ms == 0 {
            errors.push(ValidationError::new(
                "service.fallback_deadline_ms",
                "Fallback deadline must be greater than 0",
            ));
        }

        if config.service.domain_collections.is_empty() {
            errors.push(ValidationError::new(
                "service.domain_collections",
                "At least one domain must be mapped to a collection",
            ));
        }

        if !config
            .service
            .domain_collections
            .contains_key(&config.service.default_domain)
        {
            errors.push(ValidationError::new(
                "service.default_domain",
                format!(
                    "Default domain '{}' has no collection mapping",
                    config.service.default_domain
                ),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let r = &config.retrieval;

        if r.k_retrieve == 0 {
            errors.push(ValidationError::new(
                "retrieval.k_retrieve",
                "k_retrieve must be greater than 0",
            ));
        }

        if r.k_rerank == 0 || r.k_rerank > r.k_retrieve {
            errors.push(ValidationError::new(
                "retrieval.k_rerank",
                format!(
                    "k_rerank must be in 1..=k_retrieve ({}), got {}",
                    r.k_retrieve, r.k_rerank
                ),
            ));
        }

        if r.w_semantic <= 0.0 || r.w_bm25 <= 0.0 {
            errors.push(ValidationError::new(
                "retrieval.w_semantic",
                "Fusion weights must be positive",
            ));
        } else if (r.w_semantic + r.w_bm25 - 1.0).abs() > 1e-4 {
            errors.push(ValidationError::new(
                "retrieval.w_semantic",
                format!(
                    "Fusion weights must sum to 1, got {} + {}",
                    r.w_semantic, r.w_bm25
                ),
            ));
        }

        if r.rrf_k <= 0.0 {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                "RRF constant must be positive",
            ));
        }
    }

    fn validate_grader(config: &Config, errors: &mut Vec<ValidationError>) {
        let g = &config.grader;

        if g.parallelism == 0 || g.parallelism > 64 {
            errors.push(ValidationError::new(
                "grader.parallelism",
                format!("Parallelism must be in 1..=64, got {}", g.parallelism),
            ));
        }

        if g.timeout_ms == 0 {
            errors.push(ValidationError::new(
                "grader.timeout_ms",
                "Grader timeout must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&g.confidence_threshold) {
            errors.push(ValidationError::new(
                "grader.confidence_threshold",
                format!(
                    "Confidence threshold must be in 0.0..=1.0, got {}",
                    g.confidence_threshold
                ),
            ));
        }
    }

    fn validate_cache(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.cache.enabled && config.cache.ttl_s == 0 {
            errors.push(ValidationError::new(
                "cache.ttl_s",
                "Cache TTL must be greater than 0 when caching is enabled",
            ));
        }

        if config.cache.enabled && config.cache.max_size == 0 {
            errors.push(ValidationError::new(
                "cache.max_size",
                "Cache max_size must be greater than 0 when caching is enabled",
            ));
        }
    }

    fn validate_breaker(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.breaker.threshold == 0 {
            errors.push(ValidationError::new(
                "breaker.threshold",
                "Breaker threshold must be greater than 0",
            ));
        }

        if config.breaker.reset_s == 0 {
            errors.push(ValidationError::new(
                "breaker.reset_s",
                "Breaker reset timeout must be greater than 0",
            ));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        let temp = config.llm.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        let provider = &config.llm.provider;
        let valid_providers = ["openai", "groq", "ollama"];
        if !valid_providers.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "llm.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, provider
                ),
            ));
        }

        if config.llm.model.is_empty() {
            errors.push(ValidationError::new("llm.model", "Model cannot be empty"));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.indexing.vector_dim == 0 {
            errors.push(ValidationError::new(
                "indexing.vector_dim",
                "Vector dimension must be greater than 0",
            ));
        }

        if config.indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = Config::default();
        config.retrieval.w_semantic = 0.8;
        config.retrieval.w_bm25 = 0.4;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_k_rerank_bounded_by_k_retrieve() {
        let mut config = Config::default();
        config.retrieval.k_rerank = 20;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_default_domain_must_be_mapped() {
        let mut config = Config::default();
        config.service.default_domain = "missing".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
