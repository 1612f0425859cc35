//! The staged query pipeline
//!
//! A request flows through a fixed stage order: cache → intent → retrieve →
//! expand → grade → rerank → quality → generate. State is accumulated
//! monotonically; no stage is ever re-entered (expansion happens at most
//! once, grading at most once per candidate). Corrective behaviour is
//! expressed through soft-drops and quality downgrades instead of cycles.

mod generate;
mod grader;
mod intent;
mod quality;
mod rerank;

pub use generate::{
    rewrite_with_app_context, Generator, LOW_CONFIDENCE_DISCLAIMER, UNAVAILABLE_MESSAGE,
};
pub use grader::{GradePhase, Grader};
pub use intent::{Intent, IntentClassifier};
pub use quality::{assess_quality, Quality};
pub use rerank::Reranker;

use crate::retrieval::Passage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// User-computed values injected verbatim into the generation prompt
pub type AppContext = BTreeMap<String, serde_json::Value>;

/// The query as received, plus its correlation identity
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Opaque short token echoed in the response and all log records
    pub id: String,
    /// The user's question, never mutated (rewrites are kept separate)
    pub text: String,
    /// Namespace selecting the collection to search
    pub domain: String,
    pub prompt_name: Option<String>,
    pub app_context: Option<AppContext>,
    /// Groups follow-ups for observability; no retrieval state is reused
    pub thread_id: Option<String>,
}

/// Source reference attached to an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source_path: String,
    pub chunk_index: u32,
    pub score: f32,
}

/// Per-stage wall-clock timings in milliseconds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub retrieve_ms: u64,
    pub grade_ms: u64,
    pub rerank_ms: u64,
    pub generate_ms: u64,
    pub total_ms: u64,
}

/// State accumulated over one pipeline pass
///
/// Lives on the stack of a single request; fields are only ever added to as
/// stages complete.
#[derive(Debug)]
pub struct PipelineState {
    pub query: QueryContext,
    pub intent: Intent,
    /// The string actually sent to retrieval (possibly expanded)
    pub retrieval_query: String,
    pub candidates: Vec<Passage>,
    pub survivors: Vec<Passage>,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub quality: Quality,
    pub timings: StageTimings,
}

impl PipelineState {
    pub fn new(query: QueryContext) -> Self {
        let retrieval_query = query.text.clone();
        Self {
            query,
            intent: Intent::General,
            retrieval_query,
            candidates: Vec::new(),
            survivors: Vec::new(),
            answer: String::new(),
            citations: Vec::new(),
            quality: Quality::Poor,
            timings: StageTimings::default(),
        }
    }
}
