//! Document store and corpus loading
//!
//! Passages are ephemeral views over this store; retrieval returns chunk
//! IDs and the store hydrates text and metadata. Ingestion proper (PDF and
//! spreadsheet loaders, chunking) lives upstream — the service consumes a
//! pre-chunked JSONL corpus.

use crate::embedding::{EmbeddingProvider, KeywordIndex, VectorIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Chunk not found: {id}")]
    ChunkNotFound { id: u64 },

    #[error("Corpus line {line} is malformed: {message}")]
    CorpusFormat { line: usize, message: String },

    #[error("Failed to embed corpus: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingError),

    #[error("Vector index error: {0}")]
    VectorIndex(#[from] crate::embedding::VectorIndexError),

    #[error("Keyword index error: {0}")]
    KeywordIndex(#[from] crate::embedding::KeywordIndexError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Document priority, set at ingest time from document type
///
/// Applied as a fusion-level boost so critical reference documents win
/// near-ties against background material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Multiplier applied to fused scores during tie-breaking
    pub fn boost(&self) -> f32 {
        match self {
            Priority::Critical => 1.0,
            Priority::High => 0.85,
            Priority::Normal => 0.5,
            Priority::Low => 0.3,
        }
    }
}

/// Chunk metadata carried through retrieval into citations
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub document_type: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A pre-chunked corpus record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: u64,
    pub text: String,
    pub source_path: String,
    pub chunk_index: u32,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// Store statistics exposed to callers and warmup checks
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub doc_count: usize,
    pub embedding_dim: usize,
}

/// In-memory chunk store for one collection
#[derive(Default)]
pub struct DocumentStore {
    chunks: RwLock<HashMap<u64, StoredChunk>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, chunk: StoredChunk) {
        let mut chunks = self.chunks.write().unwrap();
        chunks.insert(chunk.id, chunk);
    }

    pub fn get(&self, id: u64) -> Option<StoredChunk> {
        self.chunks.read().unwrap().get(&id).cloned()
    }

    /// Hydrate chunks by ID, preserving the input order and skipping IDs
    /// that are missing from the store (stale index entries)
    pub fn get_many(&self, ids: &[u64]) -> Vec<StoredChunk> {
        let chunks = self.chunks.read().unwrap();
        ids.iter().filter_map(|id| chunks.get(id).cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One searchable collection: chunk store plus both index backends
pub struct Collection {
    name: String,
    pub store: DocumentStore,
    pub vector: VectorIndex,
    pub keyword: tokio::sync::RwLock<KeywordIndex>,
}

impl Collection {
    /// Open a collection, creating or loading its lexical index directory
    pub fn open(
        name: &str,
        vector_dim: usize,
        hnsw_ef_construction: usize,
        hnsw_m: usize,
        index_dir: &Path,
    ) -> Result<Self, StoreError> {
        let keyword = KeywordIndex::open(index_dir.join(name))?;
        let vector = VectorIndex::new(vector_dim, hnsw_ef_construction, hnsw_m);

        Ok(Self {
            name: name.to_string(),
            store: DocumentStore::new(),
            vector,
            keyword: tokio::sync::RwLock::new(keyword),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            doc_count: self.store.len(),
            embedding_dim: self.vector.dimension(),
        }
    }

    /// Load a JSONL corpus file into this collection, embedding each chunk
    ///
    /// Returns the number of chunks indexed. Lines must parse as
    /// [`StoredChunk`]; the first malformed line aborts the load.
    pub async fn load_corpus(
        &self,
        path: &Path,
        embedder: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<usize, StoreError> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);

        let mut batch: Vec<StoredChunk> = Vec::with_capacity(batch_size);
        let mut loaded = 0usize;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let chunk: StoredChunk =
                serde_json::from_str(&line).map_err(|e| StoreError::CorpusFormat {
                    line: line_no + 1,
                    message: e.to_string(),
                })?;

            batch.push(chunk);
            if batch.len() >= batch_size {
                loaded += self.index_batch(&mut batch, embedder).await?;
            }
        }

        if !batch.is_empty() {
            loaded += self.index_batch(&mut batch, embedder).await?;
        }

        self.keyword.write().await.commit()?;

        tracing::info!(
            collection = %self.name,
            chunks = loaded,
            "Corpus loaded"
        );

        Ok(loaded)
    }

    async fn index_batch(
        &self,
        batch: &mut Vec<StoredChunk>,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<usize, StoreError> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder.embed_batch(&texts)?;

        let mut keyword = self.keyword.write().await;
        for (chunk, embedding) in batch.iter().zip(embeddings) {
            self.vector.insert(chunk.id, &embedding)?;
            keyword.insert(chunk.id, &chunk.text)?;
        }
        drop(keyword);

        let count = batch.len();
        for chunk in batch.drain(..) {
            self.store.insert(chunk);
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: u64, text: &str) -> StoredChunk {
        StoredChunk {
            id,
            text: text.to_string(),
            source_path: format!("docs/doc_{}.pdf", id),
            chunk_index: 0,
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn test_store_insert_and_hydrate() {
        let store = DocumentStore::new();
        store.insert(chunk(1, "alpha"));
        store.insert(chunk(2, "beta"));

        let hydrated = store.get_many(&[2, 99, 1]);
        assert_eq!(hydrated.len(), 2);
        assert_eq!(hydrated[0].id, 2);
        assert_eq!(hydrated[1].id, 1);
    }

    #[test]
    fn test_priority_boost_ordering() {
        assert!(Priority::Critical.boost() > Priority::High.boost());
        assert!(Priority::High.boost() > Priority::Normal.boost());
        assert!(Priority::Normal.boost() > Priority::Low.boost());
    }

    #[test]
    fn test_chunk_serde_roundtrip() {
        let json = r#"{"id":7,"text":"VaR measures loss","source_path":"faq/risk.md","chunk_index":3,"metadata":{"document_type":"faq","priority":"high"}}"#;
        let parsed: StoredChunk = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.id, 7);
        assert_eq!(parsed.metadata.priority, Priority::High);
        assert_eq!(parsed.metadata.document_type, "faq");
    }

    #[tokio::test]
    async fn test_load_corpus_rejects_malformed_lines() {
        use crate::embedding::EmbeddingError;

        struct StubEmbedder;
        impl EmbeddingProvider for StubEmbedder {
            fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
                Ok(vec![0.1; 8])
            }
            fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
                Ok(texts.iter().map(|_| vec![0.1; 8]).collect())
            }
            fn dimension(&self) -> usize {
                8
            }
        }

        let temp = tempfile::TempDir::new().unwrap();
        let corpus = temp.path().join("corpus.jsonl");
        std::fs::write(&corpus, "{not json}\n").unwrap();

        let collection = Collection::open("test", 8, 200, 16, temp.path()).unwrap();
        let result = collection.load_corpus(&corpus, &StubEmbedder, 16).await;
        assert!(matches!(result, Err(StoreError::CorpusFormat { line: 1, .. })));
    }
}
