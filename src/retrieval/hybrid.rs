//! Hybrid search combining semantic and lexical retrieval

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::retrieval::{
    apply_priority_boost, reciprocal_rank_fusion, FusedHit, FusionConfig, Passage,
};
use crate::store::Collection;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingError(String),

    #[error("Vector search failed: {0}")]
    VectorSearchError(String),

    #[error("Keyword search failed: {0}")]
    KeywordSearchError(String),

    #[error("Embedding dimension mismatch: collection expects {expected}, embedder produces {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Fusion failed: {0}")]
    FusionError(String),
}

/// Hybrid retriever fusing semantic and BM25 rankings
///
/// Stateless between requests: each search embeds the query, runs both
/// backends concurrently, fuses, hydrates from the store, and applies the
/// priority tie-break.
pub struct HybridRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, config: RetrievalConfig) -> Self {
        Self { embedder, config }
    }

    /// Retrieve the top-k candidates for a query
    ///
    /// Returns an empty list (not an error) when both backends come up
    /// empty; the quality signal downstream reports that as `poor`.
    pub async fn search(
        &self,
        collection: &Collection,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<Passage>, SearchError> {
        if query_text.trim().is_empty() {
            return Err(SearchError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }

        if collection.vector.dimension() != self.embedder.dimension() {
            return Err(SearchError::DimensionMismatch {
                expected: collection.vector.dimension(),
                actual: self.embedder.dimension(),
            });
        }

        // Fetch more than k from each backend so fusion has overlap to work with
        let fetch_k = k * 2;

        let (semantic_results, keyword_results) = tokio::join!(
            self.semantic_search(collection, query_text, fetch_k),
            self.keyword_search(collection, query_text, fetch_k)
        );

        let semantic_results = semantic_results?;
        let mut keyword_results = keyword_results?;
        normalize_lexical(&mut keyword_results);

        if semantic_results.is_empty() && keyword_results.is_empty() {
            tracing::debug!("Both retrievers returned zero results");
            return Ok(Vec::new());
        }

        let fusion_config = FusionConfig::new(
            self.config.rrf_k,
            self.config.w_semantic,
            self.config.w_bm25,
        )
        .map_err(|e| SearchError::FusionError(e.to_string()))?;

        let fused = reciprocal_rank_fusion(&semantic_results, &keyword_results, &fusion_config);

        let mut candidates = hydrate(collection, &fused);
        apply_priority_boost(&mut candidates);
        candidates.truncate(k);

        tracing::debug!(
            candidates = candidates.len(),
            semantic = semantic_results.len(),
            lexical = keyword_results.len(),
            "Hybrid retrieval complete"
        );

        Ok(candidates)
    }

    async fn semantic_search(
        &self,
        collection: &Collection,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(u64, f32)>, SearchError> {
        let query_embedding = self
            .embedder
            .embed(query)
            .map_err(|e| SearchError::EmbeddingError(e.to_string()))?;

        let results = collection
            .vector
            .search(&query_embedding, limit, self.config.hnsw_ef_search)
            .map_err(|e| SearchError::VectorSearchError(e.to_string()))?;

        Ok(results.into_iter().map(|h| (h.id, h.score)).collect())
    }

    async fn keyword_search(
        &self,
        collection: &Collection,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(u64, f32)>, SearchError> {
        let keyword_index = collection.keyword.read().await;
        let results = keyword_index
            .search(query, limit)
            .map_err(|e| SearchError::KeywordSearchError(e.to_string()))?;

        Ok(results.into_iter().map(|h| (h.id, h.score)).collect())
    }
}

/// Normalise raw BM25 scores to [0, 1] by dividing by the batch maximum
fn normalize_lexical(results: &mut [(u64, f32)]) {
    let max = results
        .iter()
        .map(|(_, s)| *s)
        .fold(0.0f32, f32::max);
    if max > 0.0 {
        for (_, score) in results.iter_mut() {
            *score /= max;
        }
    }
}

/// Hydrate fused hits into passages, skipping IDs missing from the store
fn hydrate(collection: &Collection, fused: &[FusedHit]) -> Vec<Passage> {
    let ids: Vec<u64> = fused.iter().map(|h| h.id).collect();
    let hit_map: HashMap<u64, FusedHit> = fused.iter().map(|h| (h.id, *h)).collect();

    collection
        .store
        .get_many(&ids)
        .into_iter()
        .filter_map(|chunk| {
            let hit = hit_map.get(&chunk.id).copied()?;
            Some(Passage::from_chunk(chunk, hit))
        })
        .collect()
}
