//! Weighted Reciprocal Rank Fusion and priority boosting

use crate::retrieval::Passage;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid weight configuration: weights must be positive and sum to 1")]
    InvalidWeights,
}

/// Configuration for the fusion algorithm
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// RRF rank constant (typically 60)
    pub rrf_k: f32,

    /// Weight for semantic results
    pub semantic_weight: f32,

    /// Weight for lexical results
    pub keyword_weight: f32,
}

impl FusionConfig {
    pub fn new(rrf_k: f32, semantic_weight: f32, keyword_weight: f32) -> Result<Self, FusionError> {
        if semantic_weight <= 0.0 || keyword_weight <= 0.0 {
            return Err(FusionError::InvalidWeights);
        }
        if (semantic_weight + keyword_weight - 1.0).abs() > 1e-4 {
            return Err(FusionError::InvalidWeights);
        }

        Ok(Self {
            rrf_k,
            semantic_weight,
            keyword_weight,
        })
    }
}

/// A fused candidate, carrying both per-retriever scores for observability
#[derive(Debug, Clone, Copy, Default)]
pub struct FusedHit {
    pub id: u64,
    pub semantic_score: f32,
    pub lexical_score: f32,
    pub fused_score: f32,
}

/// Apply weighted Reciprocal Rank Fusion to combine two ranked lists
///
/// `fused(d) = w_sem / (k + rank_sem(d) + 1) + w_bm / (k + rank_bm(d) + 1)`
///
/// Input lists are `(chunk_id, score)` pairs already ordered by relevance;
/// the original scores are carried through untouched for logging. If either
/// list is empty the other's ranking comes out unaltered.
pub fn reciprocal_rank_fusion(
    semantic_results: &[(u64, f32)],
    keyword_results: &[(u64, f32)],
    config: &FusionConfig,
) -> Vec<FusedHit> {
    let mut hits: HashMap<u64, FusedHit> = HashMap::new();

    for (rank, (chunk_id, score)) in semantic_results.iter().enumerate() {
        let rrf_score = config.semantic_weight / (config.rrf_k + (rank as f32) + 1.0);
        let entry = hits.entry(*chunk_id).or_insert(FusedHit {
            id: *chunk_id,
            ..Default::default()
        });
        entry.semantic_score = *score;
        entry.fused_score += rrf_score;
    }

    for (rank, (chunk_id, score)) in keyword_results.iter().enumerate() {
        let rrf_score = config.keyword_weight / (config.rrf_k + (rank as f32) + 1.0);
        let entry = hits.entry(*chunk_id).or_insert(FusedHit {
            id: *chunk_id,
            ..Default::default()
        });
        entry.lexical_score = *score;
        entry.fused_score += rrf_score;
    }

    let mut results: Vec<FusedHit> = hits.into_values().collect();
    results.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    results
}

/// Fraction within which two fused scores count as tied
const TIE_BAND: f32 = 0.05;

/// Boost document priority within near-tie groups
///
/// Walking the list in fused order, candidates whose scores sit within 5%
/// of their group's leader form a tie group; inside a group each fused
/// score is multiplied by the document's priority factor and the group is
/// re-sorted. Clearly separated candidates are never reordered.
pub fn apply_priority_boost(passages: &mut [Passage]) {
    let mut start = 0;
    while start < passages.len() {
        let top = passages[start].fused_score;
        let mut end = start + 1;
        while end < passages.len() && top - passages[end].fused_score <= top * TIE_BAND {
            end += 1;
        }

        if end - start > 1 {
            for p in passages[start..end].iter_mut() {
                p.fused_score *= p.metadata.priority.boost();
            }
            passages[start..end].sort_by(|a, b| {
                b.fused_score
                    .partial_cmp(&a.fused_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        start = end;
    }
}
