//! Answer synthesis
//!
//! Renders the selected template over the survivor context, rewrites the
//! query to inline any user-supplied numbers, and renumbers inline
//! citations so they form a gapless `[1]..[m]` prefix over the emitted
//! citation list.

use crate::config::GeneratorConfig;
use crate::llm::{with_retry, ChatError, ChatModel, ChatOptions, RetryPolicy};
use crate::pipeline::{AppContext, Citation, Intent, Quality};
use crate::prompts::{is_formula_query, PromptRegistry, PromptTemplate};
use crate::retrieval::{Grade, Passage};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Canned reply when synthesis fails after retries
pub const UNAVAILABLE_MESSAGE: &str =
    "The assistant is temporarily unavailable. Please try again in a moment.";

/// Prefix for best-effort answers over poor retrieval
pub const LOW_CONFIDENCE_DISCLAIMER: &str =
    "I don't have enough information to answer precisely;";

/// Characters of each survivor shown to the model
const CONTEXT_TEXT_LIMIT: usize = 1500;

/// Token allowance for structured formula responses; the four-part
/// COMPONENTS/FORMULA/EXAMPLE/INTERPRETATION layout does not fit the
/// standard short-answer budget
const FORMULA_MAX_TOKENS: u32 = 1024;

/// Token budget for a response: formula queries against a formula-family
/// template get the expanded allowance, everything else stays on the
/// configured short-answer budget
fn response_budget(config_max: u32, template: &PromptTemplate, query: &str) -> u32 {
    if template.is_formula_family() && is_formula_query(query) {
        config_max.max(FORMULA_MAX_TOKENS)
    } else {
        config_max
    }
}

/// Synthesises the final answer from survivors and query context
pub struct Generator {
    chat: Arc<dyn ChatModel>,
    registry: Arc<PromptRegistry>,
    config: GeneratorConfig,
}

impl Generator {
    pub fn new(chat: Arc<dyn ChatModel>, registry: Arc<PromptRegistry>, config: GeneratorConfig) -> Self {
        Self {
            chat,
            registry,
            config,
        }
    }

    /// Generate an answer with citations.
    ///
    /// Errors propagate only after retries are exhausted; the caller maps
    /// them to the canned unavailable response and a breaker failure.
    pub async fn generate(
        &self,
        query_text: &str,
        prompt_name: Option<&str>,
        intent: Intent,
        app_context: Option<&AppContext>,
        survivors: &[Passage],
        quality: Quality,
        deadline: Option<Instant>,
    ) -> Result<(String, Vec<Citation>), ChatError> {
        let template = self
            .registry
            .resolve(prompt_name, intent)
            .map_err(|e| ChatError::Fatal(e.to_string()))?;

        // The rewritten query goes to the model; the original stays in logs
        let effective_query = match app_context {
            Some(ctx) if !ctx.is_empty() => rewrite_with_app_context(query_text, ctx),
            _ => query_text.to_string(),
        };

        let context = format_context(survivors);
        let prompt = template.render(&context, &effective_query);
        let max_tokens = response_budget(self.config.max_tokens, template, query_text);

        tracing::debug!(
            template = %template.name,
            survivors = survivors.len(),
            "Generating answer"
        );

        let policy = RetryPolicy::new(
            self.config.max_retries,
            Duration::from_millis(250),
        );
        let call_timeout = Duration::from_millis(self.config.timeout_ms);

        let raw_answer = with_retry(&policy, deadline, || {
            let chat = Arc::clone(&self.chat);
            let prompt = prompt.clone();
            async move {
                let mut attempt_deadline = Instant::now() + call_timeout;
                if let Some(d) = deadline {
                    attempt_deadline = attempt_deadline.min(d);
                }
                let options = ChatOptions {
                    deadline: Some(attempt_deadline),
                    temperature: Some(self.config.temperature),
                    max_tokens: Some(max_tokens),
                    ..Default::default()
                };
                chat.chat(&prompt, &options).await
            }
        })
        .await?;

        let (mut answer, citations) = renumber_citations(raw_answer.trim(), survivors);

        if quality == Quality::Poor {
            answer = format!("{} {}", LOW_CONFIDENCE_DISCLAIMER, answer);
        }

        Ok((answer, citations))
    }
}

/// Concatenate survivors into the `{context}` block with source tags,
/// numbered `[1]..[k]` to match the citation contract
pub fn format_context(survivors: &[Passage]) -> String {
    if survivors.is_empty() {
        return "No relevant documents found.".to_string();
    }

    let mut parts = Vec::with_capacity(survivors.len());
    for (i, passage) in survivors.iter().enumerate() {
        let text: String = passage.text.chars().take(CONTEXT_TEXT_LIMIT).collect();
        parts.push(format!(
            "[{}] {} ({})\n{}",
            i + 1,
            passage.source_path,
            passage.metadata.document_type,
            text
        ));
    }

    parts.join("\n\n---\n\n")
}

/// Deterministically rewrite a query to inline the user's computed numbers
///
/// `"What does my 95th percentile mean?"` with
/// `{percentile_95: 2500000, success_probability: 0.92}` becomes
/// `"What does my 95th percentile mean? (My 95th percentile is $2,500,000;
/// my success probability is 0.92.)"`
pub fn rewrite_with_app_context(query: &str, app_context: &AppContext) -> String {
    let mut clauses = Vec::with_capacity(app_context.len());
    for (key, value) in app_context {
        let label = humanize_key(key);
        let rendered = render_value(key, value);
        clauses.push(format!("{} is {}", label, rendered));
    }

    if clauses.is_empty() {
        return query.to_string();
    }

    let mut inline = String::new();
    for (i, clause) in clauses.iter().enumerate() {
        if i == 0 {
            inline.push_str(&format!("My {}", clause));
        } else {
            inline.push_str(&format!("; my {}", clause));
        }
    }

    format!("{} ({}.)", query, inline)
}

/// Turn a snake_case context key into prose
///
/// A trailing numeric segment is treated as an ordinal qualifier:
/// `percentile_95` → "95th percentile".
fn humanize_key(key: &str) -> String {
    let parts: Vec<&str> = key.split('_').filter(|p| !p.is_empty()).collect();

    if parts.len() >= 2 {
        if let Ok(n) = parts[parts.len() - 1].parse::<u64>() {
            let head = parts[..parts.len() - 1].join(" ");
            return format!("{} {}", ordinal(n), head);
        }
    }

    parts.join(" ")
}

fn ordinal(n: u64) -> String {
    let suffix = match (n % 10, n % 100) {
        (1, 11) | (2, 12) | (3, 13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

/// Render a context value: probabilities stay as decimals, large magnitudes
/// become currency with thousands separators
fn render_value(key: &str, value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Number(n) => {
            let f = n.as_f64().unwrap_or(0.0);
            let key_lower = key.to_lowercase();
            if key_lower.contains("probability")
                || key_lower.contains("rate")
                || key_lower.contains("ratio")
            {
                trim_float(f)
            } else if f.abs() >= 1000.0 {
                format_currency(f)
            } else {
                trim_float(f)
            }
        }
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn trim_float(f: f64) -> String {
    if f.fract() == 0.0 {
        format!("{}", f as i64)
    } else {
        let s = format!("{:.4}", f);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// `$2,500,000` formatting for monetary magnitudes
fn format_currency(f: f64) -> String {
    let negative = f < 0.0;
    let whole = f.abs().round() as u64;
    let digits = whole.to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    if negative {
        format!("-${}", grouped)
    } else {
        format!("${}", grouped)
    }
}

fn citation_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\[(\d+)\]").unwrap())
}

/// Renumber inline `[n]` citations into a gapless `1..m` prefix
///
/// The model cites survivors by their position in the context block. This
/// renumbers them in first-mention order, drops tokens pointing outside the
/// survivor list, and emits one citation record per referenced survivor.
/// An answer with no citation tokens keeps the full survivor list so the
/// caller still knows what grounded it.
pub fn renumber_citations(answer: &str, survivors: &[Passage]) -> (String, Vec<Citation>) {
    let mut order: Vec<usize> = Vec::new();

    let renumbered = citation_regex().replace_all(answer, |caps: &regex::Captures| {
        let n: usize = match caps[1].parse() {
            Ok(n) => n,
            Err(_) => return String::new(),
        };
        if n == 0 || n > survivors.len() {
            // Fabricated reference; drop the token
            return String::new();
        }
        let idx = n - 1;
        let new_number = match order.iter().position(|&o| o == idx) {
            Some(pos) => pos + 1,
            None => {
                order.push(idx);
                order.len()
            }
        };
        format!("[{}]", new_number)
    });

    let cited: Vec<Citation> = if order.is_empty() {
        survivors.iter().map(citation_for).collect()
    } else {
        order.iter().map(|&idx| citation_for(&survivors[idx])).collect()
    };

    (renumbered.into_owned(), cited)
}

fn citation_for(passage: &Passage) -> Citation {
    let score = if passage.grade == Grade::Ungraded {
        passage.fused_score
    } else {
        passage.grade_confidence
    };
    Citation {
        source_path: passage.source_path.clone(),
        chunk_index: passage.chunk_index,
        score,
    }
}
