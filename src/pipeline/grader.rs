//! Per-candidate relevance grading (parallel fan-out)
//!
//! Every candidate gets its own small LLM call, dispatched concurrently but
//! bounded by a semaphore so the provider is never hit with an unbounded
//! burst. A candidate that exhausts its retries is soft-dropped (graded
//! irrelevant at zero confidence) so one slow call can never stall the
//! pipeline.

use crate::config::GraderConfig;
use crate::llm::{with_retry, ChatError, ChatModel, ChatOptions, RetryPolicy};
use crate::retrieval::{Grade, Passage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Characters of passage text shown to the grading model
const GRADE_TEXT_LIMIT: usize = 2000;

/// Outcome of the grading phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradePhase {
    /// Grading ran; `failed` candidates were soft-dropped
    Graded { failed: usize },
    /// Every grading call errored. Candidates are left ungraded and the
    /// caller proceeds with the fused ordering at quality `poor`.
    AllFailed,
}

/// Concurrent relevance grader
pub struct Grader {
    chat: Arc<dyn ChatModel>,
    config: GraderConfig,
}

impl Grader {
    pub fn new(chat: Arc<dyn ChatModel>, config: GraderConfig) -> Self {
        Self { chat, config }
    }

    /// Grade all candidates concurrently, bounded by the configured
    /// parallelism. Results are collected in completion order; candidate
    /// ordering is preserved.
    pub async fn grade(
        &self,
        query: &str,
        mut candidates: Vec<Passage>,
        deadline: Option<Instant>,
    ) -> (Vec<Passage>, GradePhase) {
        if candidates.is_empty() {
            return (candidates, GradePhase::Graded { failed: 0 });
        }

        let started = Instant::now();
        let parallelism = self.config.parallelism.clamp(1, candidates.len().max(1));
        let semaphore = Arc::new(Semaphore::new(parallelism));
        let policy = RetryPolicy::new(
            self.config.max_retries,
            Duration::from_millis(self.config.retry_base_ms),
        );
        let call_timeout = Duration::from_millis(self.config.timeout_ms);

        let mut tasks: JoinSet<(usize, Result<(Grade, f32), ChatError>)> = JoinSet::new();

        for (idx, passage) in candidates.iter().enumerate() {
            let chat = Arc::clone(&self.chat);
            let semaphore = Arc::clone(&semaphore);
            let prompt = grade_prompt(query, passage);

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (idx, Err(ChatError::Fatal("grader pool closed".into()))),
                };

                let result = with_retry(&policy, deadline, || {
                    let chat = Arc::clone(&chat);
                    let prompt = prompt.clone();
                    async move {
                        let mut attempt_deadline = Instant::now() + call_timeout;
                        if let Some(d) = deadline {
                            attempt_deadline = attempt_deadline.min(d);
                        }
                        let options = ChatOptions::with_deadline(attempt_deadline);
                        let response = chat.chat(&prompt, &options).await?;
                        parse_grade(&response)
                    }
                })
                .await;

                (idx, result)
            });
        }

        let mut graded = vec![false; candidates.len()];
        let mut failed = 0usize;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, Ok((grade, confidence)))) => {
                    candidates[idx].grade = grade;
                    candidates[idx].grade_confidence = confidence;
                    graded[idx] = true;
                }
                Ok((idx, Err(e))) => {
                    tracing::warn!(candidate = candidates[idx].id, "Grading failed, soft-dropping: {}", e);
                    candidates[idx].grade = Grade::Irrelevant;
                    candidates[idx].grade_confidence = 0.0;
                    graded[idx] = true;
                    failed += 1;
                }
                Err(e) => {
                    tracing::error!("Grader task panicked: {}", e);
                }
            }
        }

        // A panicked task leaves its candidate untouched; soft-drop it too
        for (idx, done) in graded.iter().enumerate() {
            if !done {
                candidates[idx].grade = Grade::Irrelevant;
                candidates[idx].grade_confidence = 0.0;
                failed += 1;
            }
        }

        tracing::info!(
            candidates = candidates.len(),
            failed,
            parallelism,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Grading complete"
        );

        if failed == candidates.len() {
            // Nothing was actually graded; hand back the fused ordering
            for passage in candidates.iter_mut() {
                passage.grade = Grade::Ungraded;
                passage.grade_confidence = 0.0;
            }
            (candidates, GradePhase::AllFailed)
        } else {
            (candidates, GradePhase::Graded { failed })
        }
    }
}

fn grade_prompt(query: &str, passage: &Passage) -> String {
    let text: String = passage.text.chars().take(GRADE_TEXT_LIMIT).collect();
    format!(
        "You grade whether a document passage helps answer an investor's question.\n\
         Grades:\n\
         - relevant: the passage clearly helps answer the question\n\
         - partial: the passage is on-topic but only partly useful\n\
         - irrelevant: off-topic or unhelpful\n\
         Reply with one line: <grade> <confidence between 0.0 and 1.0>\n\n\
         Question: {}\n\n\
         Passage (type: {}, source: {}):\n{}",
        query, passage.metadata.document_type, passage.source_path, text
    )
}

/// Parse a `<grade> <confidence>` reply, tolerating label noise around it
fn parse_grade(response: &str) -> Result<(Grade, f32), ChatError> {
    let lowered = response.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '.')
        .filter(|t| !t.is_empty())
        .collect();

    let grade = tokens.iter().find_map(|t| match *t {
        "irrelevant" => Some(Grade::Irrelevant),
        "relevant" => Some(Grade::Relevant),
        "partial" => Some(Grade::Partial),
        _ => None,
    });

    let grade = grade.ok_or_else(|| {
        ChatError::Unparseable(format!("No grade found in response: {:.80}", response))
    })?;

    let confidence = tokens
        .iter()
        .find_map(|t| t.parse::<f32>().ok().filter(|v| (0.0..=1.0).contains(v)))
        .unwrap_or(0.5);

    Ok((grade, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChunkMetadata;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn candidate(id: u64, text: &str) -> Passage {
        Passage {
            id,
            text: text.to_string(),
            source_path: format!("docs/{}.md", id),
            chunk_index: 0,
            metadata: ChunkMetadata::default(),
            semantic_score: 0.5,
            lexical_score: 0.5,
            fused_score: 0.02,
            grade: Grade::Ungraded,
            grade_confidence: 0.0,
        }
    }

    fn config() -> GraderConfig {
        GraderConfig {
            parallelism: 4,
            timeout_ms: 1_000,
            max_retries: 1,
            retry_base_ms: 1,
            confidence_threshold: 0.3,
        }
    }

    /// Grades passages containing "good" as relevant, fails on "bad"
    struct ScriptedGrader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for ScriptedGrader {
        async fn chat(&self, prompt: &str, _options: &ChatOptions) -> Result<String, ChatError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if prompt.contains("bad") {
                Err(ChatError::Transient("injected failure".into()))
            } else if prompt.contains("good") {
                Ok("relevant 0.9".to_string())
            } else {
                Ok("irrelevant 0.8".to_string())
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn test_parse_grade_variants() {
        assert_eq!(
            parse_grade("relevant 0.85").unwrap(),
            (Grade::Relevant, 0.85)
        );
        assert_eq!(
            parse_grade("Grade: irrelevant, confidence: 0.2").unwrap(),
            (Grade::Irrelevant, 0.2)
        );
        assert_eq!(parse_grade("partial").unwrap(), (Grade::Partial, 0.5));
        assert!(parse_grade("no verdict here").is_err());
    }

    #[test]
    fn test_parse_grade_irrelevant_not_mistaken_for_relevant() {
        let (grade, _) = parse_grade("irrelevant 0.95").unwrap();
        assert_eq!(grade, Grade::Irrelevant);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_grading_assigns_grades() {
        let model = Arc::new(ScriptedGrader {
            calls: AtomicUsize::new(0),
        });
        let grader = Grader::new(model, config());

        let candidates = vec![candidate(1, "good passage"), candidate(2, "noise passage")];
        let (graded, phase) = grader.grade("question", candidates, None).await;

        assert_eq!(phase, GradePhase::Graded { failed: 0 });
        assert_eq!(graded[0].grade, Grade::Relevant);
        assert_eq!(graded[0].grade_confidence, 0.9);
        assert_eq!(graded[1].grade, Grade::Irrelevant);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_partial_failures_soft_drop() {
        let model = Arc::new(ScriptedGrader {
            calls: AtomicUsize::new(0),
        });
        let grader = Grader::new(model, config());

        let candidates = vec![
            candidate(1, "good one"),
            candidate(2, "bad apple"),
            candidate(3, "good two"),
        ];
        let (graded, phase) = grader.grade("question", candidates, None).await;

        assert_eq!(phase, GradePhase::Graded { failed: 1 });
        assert_eq!(graded[1].grade, Grade::Irrelevant);
        assert_eq!(graded[1].grade_confidence, 0.0);
        assert_eq!(graded[0].grade, Grade::Relevant);
        assert_eq!(graded[2].grade, Grade::Relevant);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_all_failures_leaves_candidates_ungraded() {
        let model = Arc::new(ScriptedGrader {
            calls: AtomicUsize::new(0),
        });
        let grader = Grader::new(model, config());

        let candidates = vec![candidate(1, "bad a"), candidate(2, "bad b")];
        let (graded, phase) = grader.grade("question", candidates, None).await;

        assert_eq!(phase, GradePhase::AllFailed);
        assert!(graded.iter().all(|p| p.grade == Grade::Ungraded));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_calls_are_retried() {
        let model = Arc::new(ScriptedGrader {
            calls: AtomicUsize::new(0),
        });
        let grader = Grader::new(Arc::clone(&model) as Arc<dyn ChatModel>, config());

        let candidates = vec![candidate(1, "bad apple")];
        let (_, phase) = grader.grade("question", candidates, None).await;

        assert_eq!(phase, GradePhase::AllFailed);
        // Initial attempt plus one retry
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }
}
