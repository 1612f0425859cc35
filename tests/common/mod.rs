//! Shared test harness: deterministic embedder, scripted chat model, and a
//! service wired against a small wealth-management corpus.
#![allow(dead_code)]

use async_trait::async_trait;
use prism::config::Config;
use prism::embedding::{EmbeddingError, EmbeddingProvider};
use prism::llm::{ChatError, ChatModel, ChatOptions};
use prism::metrics::{FeedbackSink, MemorySink, MetricsSink};
use prism::service::PrismService;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const TEST_DIM: usize = 16;

/// Bag-of-words hashing embedder: deterministic, overlap-sensitive
pub struct TokenHashEmbedder;

impl EmbeddingProvider for TokenHashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = vec![0.0f32; TEST_DIM];
        for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if word.len() < 3 {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            v[(hasher.finish() % TEST_DIM as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        TEST_DIM
    }
}

/// Scripted model covering all four call sites (intent, expansion, grading,
/// generation), with switches for failure injection
pub struct MockChat {
    pub fail_generation: AtomicBool,
    pub slow_generation: AtomicBool,
    pub generator_calls: AtomicUsize,
}

impl MockChat {
    pub fn new() -> Self {
        Self {
            fail_generation: AtomicBool::new(false),
            slow_generation: AtomicBool::new(false),
            generator_calls: AtomicUsize::new(0),
        }
    }

    fn classify(&self, prompt: &str) -> String {
        // Only the question line decides; the tag list in the prompt body
        // mentions most of the keywords itself
        let question = prompt
            .rsplit("Question: ")
            .next()
            .unwrap_or("")
            .to_lowercase();
        if question.contains("percentile") || question.contains("monte carlo") {
            "monte_carlo".to_string()
        } else if question.contains("carbon") || question.contains("intensity") {
            "esg".to_string()
        } else if question.contains("risk") || question.contains("var") {
            "risk".to_string()
        } else {
            "general".to_string()
        }
    }

    fn grade(&self, prompt: &str) -> Result<String, ChatError> {
        if prompt.contains("FAILGRADE") {
            return Err(ChatError::Transient("injected grader failure".into()));
        }

        // Overlap between the question line and the passage body decides
        // relevance, mirroring what the real grader model is asked to judge
        let question = prompt
            .split("Question: ")
            .nth(1)
            .and_then(|rest| rest.split('\n').next())
            .unwrap_or("")
            .to_lowercase();
        let passage = prompt
            .split("):\n")
            .nth(1)
            .unwrap_or("")
            .to_lowercase();

        let overlaps = question
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 4)
            .any(|w| passage.contains(w));

        if overlaps {
            Ok("relevant 0.9".to_string())
        } else {
            Ok("irrelevant 0.8".to_string())
        }
    }

    fn generate(&self, prompt: &str) -> Result<String, ChatError> {
        self.generator_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_generation.load(Ordering::SeqCst) {
            return Err(ChatError::Transient("injected generator failure".into()));
        }

        if prompt.contains("FORMULA QUERY DETECTION") {
            return Ok("COMPONENTS\n\
                 | Variable | Definition |\n\
                 | Investment | Amount invested ($M) |\n\
                 | EV | Enterprise value ($M) |\n\
                 | Emissions | Company emissions (tCO2e) |\n\n\
                 FORMULA\n```\nFinanced intensity = (Investment / EV) x Emissions\n```\n\n\
                 EXAMPLE\nInvestment = $5M, EV = $250M, emissions = 50,000 tCO2e -> 200 tCO2e/$M invested [1]\n\n\
                 INTERPRETATION\nLower financed intensity means less carbon per dollar invested [1]."
                .to_string());
        }

        if prompt.contains("No relevant documents found.") {
            return Ok("There is nothing in the reference materials about that.".to_string());
        }

        // Echo the user's own numbers when the rewritten query carries them
        if prompt.contains("$2,500,000") {
            return Ok(
                "Your median outcome sits near the middle of your range, and your 95th \
                 percentile of $2,500,000 is your optimistic case with a 92% success \
                 probability [1]."
                    .to_string(),
            );
        }

        Ok("The reference materials describe your percentile outcomes directly [1].".to_string())
    }
}

impl Default for MockChat {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatModel for MockChat {
    async fn chat(&self, prompt: &str, _options: &ChatOptions) -> Result<String, ChatError> {
        if prompt.starts_with("Classify") {
            return Ok(self.classify(prompt));
        }
        if prompt.starts_with("Suggest") {
            return Ok("simulation outcomes, percentile range".to_string());
        }
        if prompt.starts_with("You grade") {
            return self.grade(prompt);
        }

        if self.slow_generation.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.generate(prompt)
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

pub struct TestHarness {
    pub service: Arc<PrismService>,
    pub chat: Arc<MockChat>,
    pub sink: Arc<MemorySink>,
    _temp: TempDir,
}

pub fn test_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.indexing.vector_dim = TEST_DIM;
    config.indexing.index_dir = temp.path().join("indexes");
    config.service.log_dir = temp.path().join("logs");
    config.grader.retry_base_ms = 1;
    config.grader.timeout_ms = 2_000;
    config.generator.max_retries = 0;
    config.generator.timeout_ms = 60_000;
    config
}

pub async fn harness_with_config(config: Config, temp: TempDir) -> TestHarness {
    harness_with_corpus(config, temp, corpus_jsonl()).await
}

pub async fn harness_with_corpus(config: Config, temp: TempDir, corpus_jsonl: String) -> TestHarness {
    let chat = Arc::new(MockChat::new());
    let sink = Arc::new(MemorySink::new());

    let service = Arc::new(
        PrismService::new(
            config,
            Arc::new(TokenHashEmbedder),
            Arc::clone(&chat) as Arc<dyn ChatModel>,
            None,
            Arc::clone(&sink) as Arc<dyn MetricsSink>,
            Arc::clone(&sink) as Arc<dyn FeedbackSink>,
        )
        .unwrap(),
    );

    let corpus = temp.path().join("corpus.jsonl");
    std::fs::write(&corpus, corpus_jsonl).unwrap();
    service.load_corpus("app_education", &corpus).await.unwrap();

    TestHarness {
        service,
        chat,
        sink,
        _temp: temp,
    }
}

pub async fn harness() -> TestHarness {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    harness_with_config(config, temp).await
}

fn corpus_jsonl() -> String {
    let chunks = vec![
        serde_json::json!({
            "id": 1,
            "text": "Your 95th percentile is the optimistic outcome across your Monte Carlo simulation runs, while the 5th percentile is the pessimistic one.",
            "source_path": "faq/monte_carlo.md",
            "chunk_index": 0,
            "metadata": {"document_type": "faq", "priority": "high"}
        }),
        serde_json::json!({
            "id": 2,
            "text": "The median, or 50th percentile, is the most likely simulation outcome for your portfolio value.",
            "source_path": "faq/monte_carlo.md",
            "chunk_index": 1,
            "metadata": {"document_type": "faq", "priority": "high"}
        }),
        serde_json::json!({
            "id": 3,
            "text": "Financed intensity attributes company emissions to investors. Worked example: Investment = $5M, EV = $250M, emissions = 50,000 tCO2e gives 200 tCO2e per million dollars invested.",
            "source_path": "esg/financed_intensity.md",
            "chunk_index": 0,
            "metadata": {"document_type": "esg_metric", "priority": "critical"}
        }),
        serde_json::json!({
            "id": 4,
            "text": "Fund operations calendar, office locations, and holiday schedule for the administration team.",
            "source_path": "ops/calendar.md",
            "chunk_index": 0,
            "metadata": {"document_type": "ops", "priority": "low"}
        }),
        serde_json::json!({
            "id": 5,
            "text": "Success probability measures how often your simulation ends above the target portfolio value.",
            "source_path": "faq/monte_carlo.md",
            "chunk_index": 2,
            "metadata": {"document_type": "faq", "priority": "normal"}
        }),
    ];

    chunks
        .into_iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
