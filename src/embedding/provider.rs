/// Embedding capability
///
/// The same model embeds the corpus at load time and queries at search
/// time; collections with a different dimensionality reject the provider
/// at the vector index boundary.
use crate::config::EmbeddingConfig;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Unsupported embedding model '{model}' (supported: {SUPPORTED_MODELS})")]
    UnknownModel { model: String },

    #[error("Model initialization failed: {0}")]
    Init(String),

    #[error("Embedding failed: {0}")]
    Embed(String),

    #[error("Cannot embed empty text (input {index})")]
    EmptyInput { index: usize },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

/// Trait for embedding providers
///
/// One invariant matters to every caller: a batch call returns exactly one
/// vector per input, in input order. The corpus loader zips embeddings
/// back onto chunks, so a provider that silently skipped an input would
/// misalign every passage behind it. Empty inputs are therefore an error,
/// never a gap.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch, one vector per input in input order
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Output dimension, fixed for the provider's lifetime
    fn dimension(&self) -> usize;
}

const SUPPORTED_MODELS: &str = "all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5";

/// Map a configured model name onto the fastembed catalogue and its width
fn resolve_model(name: &str) -> Option<(EmbeddingModel, usize)> {
    match name {
        "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => Some((EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Some((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Some((EmbeddingModel::BGEBaseENV15, 768)),
        _ => None,
    }
}

/// Local embedding via FastEmbed
///
/// Models are fetched to `~/.cache/huggingface/` on first use (the default
/// all-MiniLM-L6-v2 is ~90MB). The configured batch size is handed to the
/// model so corpus loads and single queries share one code path.
pub struct FastEmbedProvider {
    model: TextEmbedding,
    dimension: usize,
    batch_size: usize,
}

impl FastEmbedProvider {
    /// Build the provider from the embedding config section
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let (model, dimension) =
            resolve_model(&config.model).ok_or_else(|| EmbeddingError::UnknownModel {
                model: config.model.clone(),
            })?;

        tracing::info!(
            model = %config.model,
            dimension,
            "Initializing local embedding model (downloaded on first use if not cached)"
        );

        let inner =
            TextEmbedding::try_new(InitOptions::new(model).with_show_download_progress(true))
                .map_err(|e| EmbeddingError::Init(e.to_string()))?;

        Ok(Self {
            model: inner,
            dimension,
            batch_size: config.batch_size.max(1),
        })
    }

    /// Run the model and enforce the one-vector-per-input contract
    fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let expected = texts.len();

        let embeddings = self
            .model
            .embed(texts, Some(self.batch_size))
            .map_err(|e| EmbeddingError::Embed(e.to_string()))?;

        if embeddings.len() != expected {
            return Err(EmbeddingError::Embed(format!(
                "model returned {} embeddings for {} inputs",
                embeddings.len(),
                expected
            )));
        }

        for embedding in &embeddings {
            if embedding.len() != self.dimension {
                return Err(EmbeddingError::Dimension {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
        }

        Ok(embeddings)
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput { index: 0 });
        }

        self.run(vec![text.to_string()])?
            .pop()
            .ok_or_else(|| EmbeddingError::Embed("model returned no embedding".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(index) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::EmptyInput { index });
        }

        self.run(texts.to_vec())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(model: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            model: model.to_string(),
            batch_size: 32,
        }
    }

    #[test]
    fn test_model_resolution() {
        assert_eq!(resolve_model("all-MiniLM-L6-v2").unwrap().1, 384);
        assert_eq!(resolve_model("bge-base-en-v1.5").unwrap().1, 768);
        assert!(resolve_model("not-a-model").is_none());
    }

    #[test]
    fn test_unknown_model_rejected() {
        let provider = FastEmbedProvider::from_config(&config("not-a-model"));
        assert!(matches!(provider, Err(EmbeddingError::UnknownModel { .. })));
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_provider_creation() {
        let provider = FastEmbedProvider::from_config(&config("all-MiniLM-L6-v2")).unwrap();
        assert_eq!(provider.dimension(), 384);
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_single_embedding_is_unit_length() {
        let provider = FastEmbedProvider::from_config(&config("all-MiniLM-L6-v2")).unwrap();

        let embedding = provider
            .embed("The 95th percentile is the optimistic simulation outcome.")
            .unwrap();
        assert_eq!(embedding.len(), 384);

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 0.1);
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_batch_stays_aligned_with_inputs() {
        let provider = FastEmbedProvider::from_config(&config("all-MiniLM-L6-v2")).unwrap();

        let texts: Vec<String> = (0..5)
            .map(|i| format!("Passage number {} about portfolio risk.", i))
            .collect();
        let embeddings = provider.embed_batch(&texts).unwrap();

        assert_eq!(embeddings.len(), texts.len());
        assert!(embeddings.iter().all(|e| e.len() == 384));
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_empty_inputs_error_instead_of_gapping() {
        let provider = FastEmbedProvider::from_config(&config("all-MiniLM-L6-v2")).unwrap();

        assert!(matches!(
            provider.embed("   "),
            Err(EmbeddingError::EmptyInput { index: 0 })
        ));

        let texts = vec!["fine".to_string(), "".to_string(), "fine".to_string()];
        assert!(matches!(
            provider.embed_batch(&texts),
            Err(EmbeddingError::EmptyInput { index: 1 })
        ));
    }
}
