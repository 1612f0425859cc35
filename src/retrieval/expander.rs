//! LLM-based query expansion for ambiguous queries

use crate::llm::{ChatModel, ChatOptions};
use crate::pipeline::Intent;
use std::sync::Arc;

/// Maximum expansion terms appended to the retrieval query
const MAX_TERMS: usize = 8;

/// Expands short or vague queries with domain-relevant terms before
/// retrieval. The expanded string is used for search only; the displayed
/// and logged query text is never changed. Expansion happens at most once
/// per query and any failure is non-fatal.
pub struct QueryExpander {
    chat: Arc<dyn ChatModel>,
    max_words: usize,
}

impl QueryExpander {
    pub fn new(chat: Arc<dyn ChatModel>, max_words: usize) -> Self {
        Self { chat, max_words }
    }

    /// Expansion targets short queries, plus general-intent queries with
    /// little to latch onto
    pub fn should_expand(&self, query: &str, intent: Intent) -> bool {
        let words = query.split_whitespace().count();
        words <= self.max_words || (intent == Intent::General && words <= self.max_words * 2)
    }

    /// Returns the retrieval query: original text plus expansion terms, or
    /// the original unchanged when expansion is skipped or fails
    pub async fn expand(&self, query: &str, intent: Intent, options: &ChatOptions) -> String {
        if !self.should_expand(query, intent) {
            return query.to_string();
        }

        let prompt = format!(
            "Suggest 3 to 8 search terms related to this wealth-management question. \
             Domain context: {}. \
             Output ONLY the terms, comma-separated, nothing else.\n\nQuestion: {}",
            intent.expansion_hint(),
            query
        );

        match self.chat.chat(&prompt, options).await {
            Ok(response) => {
                let terms = parse_terms(&response);
                if terms.is_empty() {
                    tracing::warn!("Query expansion returned no usable terms");
                    return query.to_string();
                }
                let expanded = format!("{} {}", query, terms.join(" "));
                tracing::debug!(original = query, expanded = %expanded, "Query expanded");
                expanded
            }
            Err(e) => {
                tracing::warn!("Query expansion failed, using original query: {}", e);
                query.to_string()
            }
        }
    }
}

fn parse_terms(response: &str) -> Vec<String> {
    response
        .split(|c| c == ',' || c == '\n')
        .map(|t| t.trim().trim_matches(|c| c == '"' || c == '.').to_string())
        .filter(|t| !t.is_empty() && t.split_whitespace().count() <= 4)
        .take(MAX_TERMS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatError;
    use async_trait::async_trait;

    struct FixedModel(Result<&'static str, ()>);

    #[async_trait]
    impl ChatModel for FixedModel {
        async fn chat(&self, _prompt: &str, _options: &ChatOptions) -> Result<String, ChatError> {
            match self.0 {
                Ok(text) => Ok(text.to_string()),
                Err(()) => Err(ChatError::Transient("down".into())),
            }
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_should_expand_short_queries() {
        let expander = QueryExpander::new(Arc::new(FixedModel(Ok(""))), 4);
        assert!(expander.should_expand("monte carlo", Intent::MonteCarlo));
        assert!(!expander.should_expand(
            "what is the full allocation breakdown for the climate sustainability model in europe",
            Intent::Archetype
        ));
        // General intent gets a wider net
        assert!(expander.should_expand(
            "tell me about my investment results please",
            Intent::General
        ));
    }

    #[tokio::test]
    async fn test_expand_appends_terms() {
        let expander = QueryExpander::new(
            Arc::new(FixedModel(Ok("simulation, percentile outcomes, success probability"))),
            4,
        );

        let expanded = expander
            .expand("my results?", Intent::MonteCarlo, &ChatOptions::default())
            .await;

        assert!(expanded.starts_with("my results?"));
        assert!(expanded.contains("simulation"));
        assert!(expanded.contains("success probability"));
    }

    #[tokio::test]
    async fn test_expand_failure_is_non_fatal() {
        let expander = QueryExpander::new(Arc::new(FixedModel(Err(()))), 4);

        let expanded = expander
            .expand("my results?", Intent::General, &ChatOptions::default())
            .await;

        assert_eq!(expanded, "my results?");
    }

    #[test]
    fn test_parse_terms_filters_noise() {
        let terms = parse_terms("alpha, , beta gamma delta epsilon zeta, \"quoted\"\nnewline term");
        assert!(terms.contains(&"alpha".to_string()));
        assert!(terms.contains(&"quoted".to_string()));
        assert!(terms.contains(&"newline term".to_string()));
        // Five-word phrases are dropped
        assert!(!terms.iter().any(|t| t.contains("epsilon")));
    }
}
