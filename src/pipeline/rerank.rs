//! Survivor reranking
//!
//! Orders graded passages by confidence, drops irrelevant and
//! low-confidence candidates, and keeps at most `k_rerank` survivors. When
//! the provider offers an external rerank model its scores replace grader
//! confidence, but the drop/keep rules are identical either way.

use crate::llm::{ChatError, ChatModel};
use crate::retrieval::Passage;
use std::sync::Arc;

/// Reranker with optional external model
pub struct Reranker {
    chat: Arc<dyn ChatModel>,
    confidence_threshold: f32,
    k_rerank: usize,
}

impl Reranker {
    pub fn new(chat: Arc<dyn ChatModel>, confidence_threshold: f32, k_rerank: usize) -> Self {
        Self {
            chat,
            confidence_threshold,
            k_rerank,
        }
    }

    /// Produce the survivor list from graded candidates
    pub async fn rerank(&self, query: &str, mut graded: Vec<Passage>) -> Vec<Passage> {
        // Irrelevant passages never reach the generator
        graded.retain(|p| p.grade.is_usable());

        if graded.is_empty() {
            return graded;
        }

        // External model, when available, rescores the usable set
        let texts: Vec<String> = graded.iter().map(|p| p.text.clone()).collect();
        match self.chat.rerank(query, &texts).await {
            Ok(scores) if scores.len() == graded.len() => {
                for (passage, score) in graded.iter_mut().zip(scores) {
                    passage.grade_confidence = score.clamp(0.0, 1.0);
                }
                tracing::debug!("External rerank model applied");
            }
            Ok(scores) => {
                tracing::warn!(
                    expected = graded.len(),
                    got = scores.len(),
                    "External rerank returned wrong count, keeping grader confidence"
                );
            }
            Err(ChatError::Unsupported(_)) => {}
            Err(e) => {
                tracing::warn!("External rerank failed, keeping grader confidence: {}", e);
            }
        }

        graded.retain(|p| p.grade_confidence >= self.confidence_threshold);

        graded.sort_by(|a, b| {
            b.grade_confidence
                .partial_cmp(&a.grade_confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.fused_score
                        .partial_cmp(&a.fused_score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });

        graded.truncate(self.k_rerank);
        graded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatOptions;
    use crate::retrieval::Grade;
    use crate::store::ChunkMetadata;
    use async_trait::async_trait;

    struct NoRerankModel;

    #[async_trait]
    impl ChatModel for NoRerankModel {
        async fn chat(&self, _prompt: &str, _options: &ChatOptions) -> Result<String, ChatError> {
            Ok(String::new())
        }

        fn model_name(&self) -> &str {
            "none"
        }
    }

    struct ExternalRerankModel(Vec<f32>);

    #[async_trait]
    impl ChatModel for ExternalRerankModel {
        async fn chat(&self, _prompt: &str, _options: &ChatOptions) -> Result<String, ChatError> {
            Ok(String::new())
        }

        async fn rerank(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>, ChatError> {
            Ok(self.0.clone())
        }

        fn model_name(&self) -> &str {
            "external"
        }
    }

    fn graded(id: u64, grade: Grade, confidence: f32, fused: f32) -> Passage {
        Passage {
            id,
            text: format!("passage {}", id),
            source_path: String::new(),
            chunk_index: 0,
            metadata: ChunkMetadata::default(),
            semantic_score: 0.0,
            lexical_score: 0.0,
            fused_score: fused,
            grade,
            grade_confidence: confidence,
        }
    }

    #[tokio::test]
    async fn test_orders_by_confidence_and_drops() {
        let reranker = Reranker::new(Arc::new(NoRerankModel), 0.3, 5);

        let passages = vec![
            graded(1, Grade::Relevant, 0.5, 0.01),
            graded(2, Grade::Irrelevant, 0.9, 0.02),
            graded(3, Grade::Relevant, 0.9, 0.01),
            graded(4, Grade::Partial, 0.2, 0.03),
            graded(5, Grade::Partial, 0.6, 0.01),
        ];

        let survivors = reranker.rerank("q", passages).await;
        let ids: Vec<u64> = survivors.iter().map(|p| p.id).collect();

        // 2 dropped (irrelevant), 4 dropped (below threshold)
        assert_eq!(ids, vec![3, 5, 1]);
    }

    #[tokio::test]
    async fn test_ties_broken_by_fused_score() {
        let reranker = Reranker::new(Arc::new(NoRerankModel), 0.3, 5);

        let passages = vec![
            graded(1, Grade::Relevant, 0.8, 0.01),
            graded(2, Grade::Relevant, 0.8, 0.05),
        ];

        let survivors = reranker.rerank("q", passages).await;
        assert_eq!(survivors[0].id, 2);
    }

    #[tokio::test]
    async fn test_keeps_at_most_k() {
        let reranker = Reranker::new(Arc::new(NoRerankModel), 0.0, 2);

        let passages = (1..=5)
            .map(|i| graded(i, Grade::Relevant, 0.5 + i as f32 / 100.0, 0.01))
            .collect();

        let survivors = reranker.rerank("q", passages).await;
        assert_eq!(survivors.len(), 2);
    }

    #[tokio::test]
    async fn test_external_scores_replace_confidence() {
        let reranker = Reranker::new(Arc::new(ExternalRerankModel(vec![0.1, 0.95])), 0.3, 5);

        let passages = vec![
            graded(1, Grade::Relevant, 0.9, 0.01),
            graded(2, Grade::Relevant, 0.4, 0.01),
        ];

        let survivors = reranker.rerank("q", passages).await;

        // External model inverted the ordering and its threshold dropped id 1
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].id, 2);
        assert_eq!(survivors[0].grade_confidence, 0.95);
    }
}
