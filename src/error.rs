use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Prism service
#[derive(Error, Debug)]
pub enum PrismError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Embedding dimension does not match the collection
    #[error("Embedding dimension mismatch: collection expects {expected}, embedder produces {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Unknown domain (no collection mapped)
    #[error("Unknown domain: {domain}")]
    UnknownDomain { domain: String },

    /// Too many requests in flight
    #[error("Service is at capacity, retry later")]
    Busy,

    /// Request deadline fired before the pipeline finished
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// Hybrid search errors
    #[error("Search error: {0}")]
    Search(#[from] crate::retrieval::SearchError),

    /// Chat model errors
    #[error("Chat error: {0}")]
    Chat(#[from] crate::llm::ChatError),

    /// Prompt registry errors
    #[error("Prompt error: {0}")]
    Prompt(#[from] crate::prompts::PromptError),

    /// Corpus / document store errors
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Prism operations
pub type Result<T> = std::result::Result<T, PrismError>;
