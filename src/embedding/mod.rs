/// Embedding & index adapters
///
/// Local embedding generation plus the two index backends the hybrid
/// retriever fuses:
/// - EmbeddingProvider trait for abstraction over embedding backends
/// - FastEmbedProvider for local embedding (all-MiniLM-L6-v2, 384-dim)
/// - HNSW for approximate nearest-neighbour search over passage vectors
/// - Tantivy for BM25 lexical search over passage text
mod keyword_index;
mod provider;
mod vector_index;

pub use keyword_index::{KeywordIndex, KeywordIndexError, LexicalHit};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use vector_index::{SemanticHit, VectorIndex, VectorIndexError};
