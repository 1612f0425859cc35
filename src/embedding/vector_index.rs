/// HNSW vector index for passage similarity search
use hnsw_rs::prelude::*;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// Semantic search hit with chunk ID and cosine-derived similarity
#[derive(Debug, Clone)]
pub struct SemanticHit {
    /// Chunk ID in the document store
    pub id: u64,
    /// Similarity score in [0, 1], higher is more similar
    pub score: f32,
}

/// HNSW vector index wrapper
///
/// Approximate nearest-neighbour search over passage embeddings using
/// cosine distance. The index is write-once after corpus load and
/// read-parallel afterwards.
pub struct VectorIndex {
    index: RwLock<Hnsw<'static, f32, DistCosine>>,
    dimension: usize,
    ef_construction: usize,
    m: usize,
    count: RwLock<u64>,
}

impl VectorIndex {
    /// Create an empty index
    ///
    /// # Arguments
    /// * `dimension` - Vector dimension (must match the embedder's)
    /// * `ef_construction` - HNSW construction parameter (higher = better recall, slower build)
    /// * `m` - HNSW M parameter (connections per layer)
    pub fn new(dimension: usize, ef_construction: usize, m: usize) -> Self {
        let index = Hnsw::<f32, DistCosine>::new(
            m,
            dimension,
            ef_construction,
            200, // max_nb_connection
            DistCosine,
        );

        Self {
            index: RwLock::new(index),
            dimension,
            ef_construction,
            m,
            count: RwLock::new(0),
        }
    }

    /// Insert a passage embedding keyed by its chunk ID
    pub fn insert(&self, id: u64, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let data = vector.to_vec();

        let index = self.index.write().unwrap();
        index.insert((&data, id as usize));
        drop(index);

        let mut count = self.count.write().unwrap();
        *count += 1;

        Ok(())
    }

    /// Insert multiple embeddings in batch
    pub fn insert_batch(&self, items: &[(u64, Vec<f32>)]) -> Result<(), VectorIndexError> {
        for (id, vector) in items {
            self.insert(*id, vector)?;
        }
        Ok(())
    }

    /// Search for the k nearest passages
    ///
    /// Returns (id, similarity) pairs sorted by similarity descending.
    /// An empty index yields an empty result, not an error.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
    ) -> Result<Vec<SemanticHit>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if self.is_empty() {
            return Ok(Vec::new());
        }

        let index = self.index.read().unwrap();
        let results = index.search(query, k, ef_search);

        let hits = results
            .into_iter()
            .map(|neighbor| SemanticHit {
                id: neighbor.d_id as u64,
                score: (1.0 - neighbor.distance).clamp(0.0, 1.0),
            })
            .collect();

        Ok(hits)
    }

    /// Number of indexed vectors
    pub fn len(&self) -> u64 {
        *self.count.read().unwrap()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector dimension this index accepts
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Drop all vectors, keeping the configured parameters
    pub fn clear(&self) {
        let mut index = self.index.write().unwrap();
        *index = Hnsw::<f32, DistCosine>::new(
            self.m,
            self.dimension,
            self.ef_construction,
            200, // max_nb_connection
            DistCosine,
        );
        drop(index);

        let mut count = self.count.write().unwrap();
        *count = 0;
    }
}
