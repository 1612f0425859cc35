//! Service root
//!
//! Owns the process-wide state (collections, cache, breakers, sinks) and
//! orchestrates the staged pipeline for each request: cache → intent →
//! retrieve → expand → grade → rerank → quality → generate, with
//! transparent degradation to the linear fallback path when the primary
//! breaker is open or the main path errors out.

mod fallback;

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{PrismError, Result};
use crate::llm::{ChatModel, ChatOptions, GuardedChatModel};
use crate::metrics::{now_rfc3339, Endpoint, FeedbackRecord, FeedbackSink, MetricsSink, QueryRecord, Rating};
use crate::pipeline::{
    assess_quality, AppContext, Citation, GradePhase, Grader, Generator, Intent, IntentClassifier,
    PipelineState, Quality, QueryContext, Reranker, StageTimings, UNAVAILABLE_MESSAGE,
};
use crate::prompts::PromptRegistry;
use crate::resilience::{BreakerSettings, CachedResponse, CircuitBreaker, ResponseCache};
use crate::retrieval::{HybridRetriever, QueryExpander};
use crate::store::Collection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};

/// Canned reply when the request deadline fires
pub const TIMEOUT_MESSAGE: &str =
    "The request timed out before an answer could be produced. Please try again.";

/// A query as submitted by a caller
#[derive(Debug, Clone, Default)]
pub struct QueryInput {
    pub text: String,
    /// Defaults to the configured default domain
    pub domain: Option<String>,
    pub prompt_name: Option<String>,
    pub app_context: Option<AppContext>,
    pub thread_id: Option<String>,
}

/// The synchronous response shape, shared by main and fallback paths
#[derive(Debug, Clone)]
pub struct QueryOutput {
    pub id: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub quality: Quality,
    pub intent: Intent,
    pub timings: StageTimings,
}

/// Events emitted by the streaming variant; citations arrive only with the
/// final event because they depend on the finalised survivor list
#[derive(Debug, Clone)]
pub enum AnswerEvent {
    Token(String),
    Complete {
        id: String,
        citations: Vec<Citation>,
        quality: Quality,
        intent: Intent,
        timings: StageTimings,
    },
    Error(String),
}

/// Outcome of the main path, with the generator's health split out so the
/// caller can feed the primary breaker
struct MainOutcome {
    output: QueryOutput,
    generator_failed: bool,
}

/// The Prism query service
pub struct PrismService {
    config: Config,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    embedder: Arc<dyn EmbeddingProvider>,
    /// Breaker-guarded utility model for intent, expansion, grading, warmup
    utility_chat: Arc<dyn ChatModel>,
    retriever: HybridRetriever,
    expander: QueryExpander,
    intent_classifier: IntentClassifier,
    grader: Grader,
    reranker: Reranker,
    generator: Generator,
    prompts: Arc<PromptRegistry>,
    cache: ResponseCache,
    primary_breaker: Arc<CircuitBreaker>,
    llm_breaker: Arc<CircuitBreaker>,
    metrics: Arc<dyn MetricsSink>,
    feedback_sink: Arc<dyn FeedbackSink>,
    inflight: Arc<Semaphore>,
    shutting_down: AtomicBool,
}

impl PrismService {
    /// Build the service. Fails fast on invalid config or an embedder whose
    /// dimension does not match the configured collections.
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
        utility_chat: Option<Arc<dyn ChatModel>>,
        metrics: Arc<dyn MetricsSink>,
        feedback_sink: Arc<dyn FeedbackSink>,
    ) -> Result<Self> {
        crate::config::ConfigValidator::validate(&config)?;

        if embedder.dimension() != config.indexing.vector_dim {
            return Err(PrismError::DimensionMismatch {
                expected: config.indexing.vector_dim,
                actual: embedder.dimension(),
            });
        }

        let prompts = Arc::new(PromptRegistry::builtin()?);

        let breaker_settings = BreakerSettings {
            threshold: config.breaker.threshold,
            reset_timeout: Duration::from_secs(config.breaker.reset_s),
        };
        let primary_breaker = Arc::new(CircuitBreaker::new("primary", breaker_settings));
        let llm_breaker = Arc::new(CircuitBreaker::new("llm", breaker_settings));

        let guarded_chat: Arc<dyn ChatModel> =
            Arc::new(GuardedChatModel::new(chat, Arc::clone(&llm_breaker)));
        let guarded_utility: Arc<dyn ChatModel> = match utility_chat {
            Some(model) => Arc::new(GuardedChatModel::new(model, Arc::clone(&llm_breaker))),
            None => Arc::clone(&guarded_chat),
        };

        let retriever = HybridRetriever::new(Arc::clone(&embedder), config.retrieval.clone());
        let expander = QueryExpander::new(
            Arc::clone(&guarded_utility),
            config.retrieval.expander_max_words,
        );
        let intent_classifier = IntentClassifier::new(Arc::clone(&guarded_utility));
        let grader = Grader::new(Arc::clone(&guarded_utility), config.grader.clone());
        let reranker = Reranker::new(
            Arc::clone(&guarded_utility),
            config.grader.confidence_threshold,
            config.retrieval.k_rerank,
        );
        let generator = Generator::new(
            Arc::clone(&guarded_chat),
            Arc::clone(&prompts),
            config.generator.clone(),
        );

        let cache = ResponseCache::new(
            Duration::from_secs(config.cache.ttl_s),
            config.cache.max_size,
        );
        let inflight = Arc::new(Semaphore::new(config.service.inflight_cap));

        Ok(Self {
            config,
            collections: RwLock::new(HashMap::new()),
            embedder,
            utility_chat: guarded_utility,
            retriever,
            expander,
            intent_classifier,
            grader,
            reranker,
            generator,
            prompts,
            cache,
            primary_breaker,
            llm_breaker,
            metrics,
            feedback_sink,
            inflight,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Get or open the collection backing a domain
    pub fn open_collection(&self, domain: &str) -> Result<Arc<Collection>> {
        let name = self.config.collection_for_domain(domain)?.to_string();

        if let Some(collection) = self.collections.read().unwrap().get(&name) {
            return Ok(Arc::clone(collection));
        }

        let mut collections = self.collections.write().unwrap();
        // Double-checked: another request may have opened it meanwhile
        if let Some(collection) = collections.get(&name) {
            return Ok(Arc::clone(collection));
        }

        let collection = Arc::new(Collection::open(
            &name,
            self.config.indexing.vector_dim,
            self.config.indexing.hnsw_ef_construction,
            self.config.indexing.hnsw_m,
            &self.config.indexing.index_dir,
        )?);
        collections.insert(name.clone(), Arc::clone(&collection));
        tracing::info!(collection = %name, domain, "Collection opened");

        Ok(collection)
    }

    /// Load a pre-chunked JSONL corpus into a domain's collection
    pub async fn load_corpus(&self, domain: &str, path: &Path) -> Result<usize> {
        let collection = self.open_collection(domain)?;
        let loaded = collection
            .load_corpus(path, self.embedder.as_ref(), self.config.embedding.batch_size)
            .await?;
        Ok(loaded)
    }

    /// Pre-initialise the retriever and both model paths before declaring
    /// readiness: opens the default collection, issues one trivial
    /// embedding and one trivial LLM call. Surfaces dimension mismatches
    /// fatally instead of letting the first query eat the cost.
    pub async fn warmup(&self) -> Result<()> {
        let started = Instant::now();
        let collection = self.open_collection(&self.config.service.default_domain)?;

        let vector = self
            .embedder
            .embed("warmup")
            .map_err(|e| PrismError::Config(format!("Warmup embedding failed: {}", e)))?;
        if vector.len() != collection.vector.dimension() {
            return Err(PrismError::DimensionMismatch {
                expected: collection.vector.dimension(),
                actual: vector.len(),
            });
        }

        let options = ChatOptions::with_deadline(Instant::now() + Duration::from_secs(10));
        self.utility_chat
            .chat("Reply with the single word: ready", &options)
            .await?;

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            doc_count = collection.stats().doc_count,
            "Warmup complete, service ready"
        );
        Ok(())
    }

    /// Answer a query. The whole request runs under the configured
    /// deadline; breaker state transparently routes to the fallback path.
    pub async fn query(&self, input: QueryInput) -> Result<QueryOutput> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PrismError::Busy);
        }

        let _permit = self.inflight.try_acquire().map_err(|_| PrismError::Busy)?;

        let query = QueryContext {
            id: short_id(),
            text: input.text,
            domain: input
                .domain
                .unwrap_or_else(|| self.config.service.default_domain.clone()),
            prompt_name: input.prompt_name,
            app_context: input.app_context,
            thread_id: input.thread_id,
        };

        // Resolve the domain up front so unknown domains fail fast
        self.config.collection_for_domain(&query.domain)?;

        let total_start = Instant::now();

        // App-context queries never consult or write the cache
        let has_app_context = query
            .app_context
            .as_ref()
            .map(|c| !c.is_empty())
            .unwrap_or(false);
        let fingerprint = if self.config.cache.enabled && !has_app_context {
            Some(self.cache.fingerprint(
                &query.domain,
                query.prompt_name.as_deref(),
                &query.text,
            ))
        } else {
            None
        };

        if let Some(fp) = fingerprint {
            if let Some(hit) = self.cache.get(fp) {
                let timings = StageTimings {
                    total_ms: total_start.elapsed().as_millis() as u64,
                    ..Default::default()
                };
                let output = QueryOutput {
                    id: query.id.clone(),
                    answer: hit.answer,
                    citations: hit.citations,
                    quality: hit.quality,
                    intent: hit.intent,
                    timings,
                };
                self.emit_metrics(&query, &output, Endpoint::Main, None);
                return Ok(output);
            }
        }

        let (output, endpoint, error, cacheable) = if self.primary_breaker.allow() {
            let deadline = Instant::now() + self.config.request_deadline();
            match tokio::time::timeout(self.config.request_deadline(), self.run_main(&query, deadline))
                .await
            {
                Ok(Ok(outcome)) => {
                    if outcome.generator_failed {
                        self.primary_breaker.record_failure();
                        (outcome.output, Endpoint::Main, Some("generator-failed".to_string()), false)
                    } else {
                        self.primary_breaker.record_success();
                        (outcome.output, Endpoint::Main, None, true)
                    }
                }
                Ok(Err(e)) => {
                    // An uncaught main-path error escapes to the fallback
                    self.primary_breaker.record_failure();
                    tracing::warn!(id = %query.id, "Main pipeline failed, taking fallback path: {}", e);
                    let output = self.run_fallback(&query, total_start).await?;
                    (output, Endpoint::Fallback, Some(e.to_string()), true)
                }
                Err(_) => {
                    // Deadline fired: outstanding stage calls were cancelled
                    // when the pipeline future was dropped
                    self.primary_breaker.record_failure();
                    tracing::warn!(id = %query.id, "Request deadline exceeded");
                    let output = QueryOutput {
                        id: query.id.clone(),
                        answer: TIMEOUT_MESSAGE.to_string(),
                        citations: Vec::new(),
                        quality: Quality::Poor,
                        intent: Intent::General,
                        timings: StageTimings {
                            total_ms: total_start.elapsed().as_millis() as u64,
                            ..Default::default()
                        },
                    };
                    (output, Endpoint::Main, Some("deadline-exceeded".to_string()), false)
                }
            }
        } else {
            tracing::info!(id = %query.id, "Primary breaker open, taking fallback path");
            let output = self.run_fallback(&query, total_start).await?;
            (output, Endpoint::Fallback, None, true)
        };

        // Canned unavailable/timeout replies are transient by nature; a
        // fallback that timed out must never become a sticky cached answer
        if cacheable && output.answer != UNAVAILABLE_MESSAGE && output.answer != TIMEOUT_MESSAGE {
            if let Some(fp) = fingerprint {
                self.cache.put(
                    fp,
                    CachedResponse {
                        answer: output.answer.clone(),
                        citations: output.citations.clone(),
                        quality: output.quality,
                        intent: output.intent,
                    },
                    None,
                );
            }
        }

        self.emit_metrics(&query, &output, endpoint, error);
        Ok(output)
    }

    /// Streaming variant: emits answer tokens incrementally, then a single
    /// `Complete` event carrying citations, quality, and intent.
    pub fn query_stream(self: &Arc<Self>, input: QueryInput) -> mpsc::Receiver<AnswerEvent> {
        let (tx, rx) = mpsc::channel(64);
        let service = Arc::clone(self);

        tokio::spawn(async move {
            match service.query(input).await {
                Ok(output) => {
                    // Citations depend on the finalised survivor list, so
                    // tokens are cut from the completed answer
                    for token in tokenize_for_stream(&output.answer) {
                        if tx.send(AnswerEvent::Token(token)).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx
                        .send(AnswerEvent::Complete {
                            id: output.id,
                            citations: output.citations,
                            quality: output.quality,
                            intent: output.intent,
                            timings: output.timings,
                        })
                        .await;
                }
                Err(e) => {
                    let _ = tx.send(AnswerEvent::Error(e.to_string())).await;
                }
            }
        });

        rx
    }

    /// The staged main path
    async fn run_main(&self, query: &QueryContext, deadline: Instant) -> Result<MainOutcome> {
        let mut state = PipelineState::new(query.clone());
        let total_start = Instant::now();

        // Intent
        let classify_options = self.stage_options(deadline, 3_000);
        state.intent = self
            .intent_classifier
            .classify(&query.text, &classify_options)
            .await;

        // Retrieve (with optional expansion feeding both search sides)
        let retrieve_start = Instant::now();
        let collection = self.open_collection(&query.domain)?;

        if self.config.retrieval.expander_enabled {
            let expand_options = self.stage_options(deadline, 3_000);
            state.retrieval_query = self
                .expander
                .expand(&query.text, state.intent, &expand_options)
                .await;
        }

        state.candidates = self
            .retriever
            .search(&collection, &state.retrieval_query, self.config.retrieval.k_retrieve)
            .await?;
        state.timings.retrieve_ms = retrieve_start.elapsed().as_millis() as u64;

        // Grade (concurrent fan-out)
        let grade_start = Instant::now();
        let (graded, phase) = self
            .grader
            .grade(&query.text, std::mem::take(&mut state.candidates), Some(deadline))
            .await;
        state.candidates = graded;
        state.timings.grade_ms = grade_start.elapsed().as_millis() as u64;

        // Rerank + quality
        let rerank_start = Instant::now();
        match phase {
            GradePhase::AllFailed => {
                // Proceed ungraded with the fused ordering; quality is poor
                state.survivors = state
                    .candidates
                    .iter()
                    .take(self.config.retrieval.k_rerank)
                    .cloned()
                    .collect();
                state.quality = Quality::Poor;
            }
            GradePhase::Graded { .. } => {
                state.survivors = self
                    .reranker
                    .rerank(&query.text, state.candidates.clone())
                    .await;
                state.quality = assess_quality(&state.survivors);
            }
        }
        state.timings.rerank_ms = rerank_start.elapsed().as_millis() as u64;

        // Generate
        let generate_start = Instant::now();
        let generation = self
            .generator
            .generate(
                &query.text,
                query.prompt_name.as_deref(),
                state.intent,
                query.app_context.as_ref(),
                &state.survivors,
                state.quality,
                Some(deadline),
            )
            .await;
        state.timings.generate_ms = generate_start.elapsed().as_millis() as u64;
        state.timings.total_ms = total_start.elapsed().as_millis() as u64;

        match generation {
            Ok((answer, citations)) => {
                state.answer = answer;
                state.citations = citations;
                Ok(MainOutcome {
                    output: QueryOutput {
                        id: query.id.clone(),
                        answer: state.answer,
                        citations: state.citations,
                        quality: state.quality,
                        intent: state.intent,
                        timings: state.timings,
                    },
                    generator_failed: false,
                })
            }
            Err(e) => {
                tracing::error!(id = %query.id, "Generation failed: {}", e);
                Ok(MainOutcome {
                    output: QueryOutput {
                        id: query.id.clone(),
                        answer: UNAVAILABLE_MESSAGE.to_string(),
                        citations: Vec::new(),
                        quality: Quality::Poor,
                        intent: state.intent,
                        timings: state.timings,
                    },
                    generator_failed: true,
                })
            }
        }
    }

    /// Record a user rating against a served query
    pub fn feedback(&self, query_id: &str, rating: Rating, detail: Option<String>) {
        self.feedback_sink.record(&FeedbackRecord {
            query_id: query_id.to_string(),
            rating,
            detail,
            timestamp: now_rfc3339(),
        });
    }

    /// Stop accepting requests, drain inflight work, flush sinks
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let cap = self.config.service.inflight_cap;
        while self.inflight.available_permits() < cap {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        self.metrics.flush();
        self.feedback_sink.flush();
        tracing::info!("Service drained and shut down");
    }

    pub fn cache_stats(&self) -> crate::resilience::CacheStats {
        self.cache.stats()
    }

    /// Drop every cached response (used after a corpus reload)
    pub fn invalidate_cache(&self) -> usize {
        self.cache.invalidate()
    }

    pub fn breaker_status(&self) -> Vec<crate::resilience::BreakerStatus> {
        vec![self.primary_breaker.status(), self.llm_breaker.status()]
    }

    pub fn prompt_names(&self) -> Vec<&str> {
        self.prompts.names()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Options for a bounded utility call inside the request deadline
    fn stage_options(&self, deadline: Instant, budget_ms: u64) -> ChatOptions {
        let stage_deadline = (Instant::now() + Duration::from_millis(budget_ms)).min(deadline);
        ChatOptions::with_deadline(stage_deadline)
    }

    fn emit_metrics(
        &self,
        query: &QueryContext,
        output: &QueryOutput,
        endpoint: Endpoint,
        error: Option<String>,
    ) {
        let top_score = output
            .citations
            .iter()
            .map(|c| c.score)
            .fold(0.0f32, f32::max);

        self.metrics.record(&QueryRecord {
            id: query.id.clone(),
            timestamp: now_rfc3339(),
            domain: query.domain.clone(),
            intent: output.intent,
            quality: output.quality,
            timings: output.timings,
            doc_count: output.citations.len(),
            top_score,
            endpoint,
            thread_id: query.thread_id.clone(),
            error,
        });
    }
}

/// Opaque short correlation token (8 hex chars of a v4 UUID)
fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Cut an answer into whitespace-preserving chunks for streaming
fn tokenize_for_stream(answer: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in answer.chars() {
        current.push(ch);
        if ch.is_whitespace() && current.len() >= 8 {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_shape() {
        let id = short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokenize_reassembles() {
        let answer = "Your median outcome is $1,200,000 with a 92% success probability [1].";
        let tokens = tokenize_for_stream(answer);
        assert!(tokens.len() > 1);
        assert_eq!(tokens.concat(), answer);
    }
}
