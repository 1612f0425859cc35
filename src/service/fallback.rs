//! Fallback path (v1)
//!
//! A minimal linear pipeline used when the primary breaker is open or the
//! main path errors out: semantic-only retrieval, no grading, no rerank,
//! direct generation with the general template. The response schema, cache
//! interaction, and metrics schema are identical to the main path.

use crate::error::Result;
use crate::pipeline::{Intent, Quality, QueryContext, StageTimings, UNAVAILABLE_MESSAGE};
use crate::retrieval::{FusedHit, Grade, Passage};
use crate::service::{PrismService, QueryOutput, TIMEOUT_MESSAGE};
use std::time::Instant;

/// Semantic score at or above which a fallback answer reports `good`
const FALLBACK_GOOD_SCORE: f32 = 0.7;

impl PrismService {
    /// Run the linear fallback path under its own (shorter) deadline
    pub(crate) async fn run_fallback(
        &self,
        query: &QueryContext,
        total_start: Instant,
    ) -> Result<QueryOutput> {
        let deadline = Instant::now() + self.config.fallback_deadline();

        match tokio::time::timeout(
            self.config.fallback_deadline(),
            self.fallback_pipeline(query, deadline, total_start),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(id = %query.id, "Fallback deadline exceeded");
                Ok(QueryOutput {
                    id: query.id.clone(),
                    answer: TIMEOUT_MESSAGE.to_string(),
                    citations: Vec::new(),
                    quality: Quality::Poor,
                    intent: Intent::General,
                    timings: StageTimings {
                        total_ms: total_start.elapsed().as_millis() as u64,
                        ..Default::default()
                    },
                })
            }
        }
    }

    async fn fallback_pipeline(
        &self,
        query: &QueryContext,
        deadline: Instant,
        total_start: Instant,
    ) -> Result<QueryOutput> {
        let mut timings = StageTimings::default();
        let collection = self.open_collection(&query.domain)?;

        // Semantic-only retrieval, top-k straight from the vector index
        let retrieve_start = Instant::now();
        let k = self.config.retrieval.k_rerank;
        let survivors = self.semantic_only(&collection, &query.text, k)?;
        timings.retrieve_ms = retrieve_start.elapsed().as_millis() as u64;

        let quality = fallback_quality(&survivors);

        let generate_start = Instant::now();
        let generation = self
            .generator
            .generate(
                &query.text,
                None,
                Intent::General,
                query.app_context.as_ref(),
                &survivors,
                quality,
                Some(deadline),
            )
            .await;
        timings.generate_ms = generate_start.elapsed().as_millis() as u64;
        timings.total_ms = total_start.elapsed().as_millis() as u64;

        let (answer, citations, quality) = match generation {
            Ok((answer, citations)) => (answer, citations, quality),
            Err(e) => {
                tracing::error!(id = %query.id, "Fallback generation failed: {}", e);
                (UNAVAILABLE_MESSAGE.to_string(), Vec::new(), Quality::Poor)
            }
        };

        Ok(QueryOutput {
            id: query.id.clone(),
            answer,
            citations,
            quality,
            intent: Intent::General,
            timings,
        })
    }

    fn semantic_only(
        &self,
        collection: &crate::store::Collection,
        text: &str,
        k: usize,
    ) -> Result<Vec<Passage>> {
        let embedding = self
            .embedder
            .embed(text)
            .map_err(|e| crate::retrieval::SearchError::EmbeddingError(e.to_string()))?;

        let hits = collection
            .vector
            .search(&embedding, k, self.config.retrieval.hnsw_ef_search)
            .map_err(|e| crate::retrieval::SearchError::VectorSearchError(e.to_string()))?;

        let passages = hits
            .into_iter()
            .filter_map(|hit| {
                let chunk = collection.store.get(hit.id)?;
                let mut passage = Passage::from_chunk(
                    chunk,
                    FusedHit {
                        id: hit.id,
                        semantic_score: hit.score,
                        lexical_score: 0.0,
                        fused_score: hit.score,
                    },
                );
                // No grading on this path; confidence mirrors similarity
                passage.grade = Grade::Ungraded;
                passage.grade_confidence = hit.score;
                Some(passage)
            })
            .collect();

        Ok(passages)
    }
}

/// Quality signal without grader confidence: semantic similarity stands in
fn fallback_quality(survivors: &[Passage]) -> Quality {
    if survivors.is_empty() {
        return Quality::Poor;
    }

    let top = survivors
        .iter()
        .map(|p| p.semantic_score)
        .fold(0.0f32, f32::max);

    if top >= FALLBACK_GOOD_SCORE {
        Quality::Good
    } else {
        Quality::Ambiguous
    }
}
