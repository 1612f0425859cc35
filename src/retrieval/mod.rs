//! Hybrid retrieval
//!
//! Combines semantic (HNSW) and lexical (BM25) search over the same corpus
//! with weighted Reciprocal Rank Fusion, and optionally expands ambiguous
//! queries with LLM-suggested terms before searching.

mod expander;
mod fusion;
mod hybrid;

pub use expander::QueryExpander;
pub use fusion::{apply_priority_boost, reciprocal_rank_fusion, FusedHit, FusionConfig, FusionError};
pub use hybrid::{HybridRetriever, SearchError};

use crate::store::ChunkMetadata;
use serde::{Deserialize, Serialize};

/// Relevance grade assigned by the grader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Relevant,
    Partial,
    Irrelevant,
    #[default]
    Ungraded,
}

impl Grade {
    /// Whether the generator may consume a passage with this grade
    pub fn is_usable(&self) -> bool {
        matches!(self, Grade::Relevant | Grade::Partial)
    }
}

/// A retrieved chunk flowing through the pipeline
///
/// Carries its retrieval scores and, after the grader stage, exactly one
/// grade. Passages are ephemeral views over the store; nothing is written
/// back.
#[derive(Debug, Clone)]
pub struct Passage {
    pub id: u64,
    pub text: String,
    pub source_path: String,
    pub chunk_index: u32,
    pub metadata: ChunkMetadata,
    /// Cosine-derived similarity in [0, 1]
    pub semantic_score: f32,
    /// Raw BM25 score normalised to [0, 1] within the candidate batch
    pub lexical_score: f32,
    /// Weighted RRF score
    pub fused_score: f32,
    pub grade: Grade,
    pub grade_confidence: f32,
}

impl Passage {
    pub fn from_chunk(chunk: crate::store::StoredChunk, hit: FusedHit) -> Self {
        Self {
            id: chunk.id,
            text: chunk.text,
            source_path: chunk.source_path,
            chunk_index: chunk.chunk_index,
            metadata: chunk.metadata,
            semantic_score: hit.semantic_score,
            lexical_score: hit.lexical_score,
            fused_score: hit.fused_score,
            grade: Grade::Ungraded,
            grade_confidence: 0.0,
        }
    }
}
