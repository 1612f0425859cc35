//! Intent classification
//!
//! Tags each query with one of a small closed set of intents. The intent
//! selects the default prompt template, supplies retrieval hint vocabulary,
//! and labels metrics. Classification is a lightweight LLM call with a
//! deterministic keyword table as the degraded mode; any failure falls back
//! to `General`.

use crate::llm::{ChatModel, ChatOptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Closed set of query intents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Questions about the model archetypes (IBI, Impact 100%, Climate, …)
    Archetype,
    /// Portfolio holdings, allocations, optimization results
    Portfolio,
    /// Risk metrics: VaR, drawdown, volatility, beta
    Risk,
    /// Monte Carlo simulation outcomes
    MonteCarlo,
    /// ESG metrics and methodology
    Esg,
    #[default]
    General,
}

impl Intent {
    pub const ALL: [Intent; 6] = [
        Intent::Archetype,
        Intent::Portfolio,
        Intent::Risk,
        Intent::MonteCarlo,
        Intent::Esg,
        Intent::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Archetype => "archetype",
            Intent::Portfolio => "portfolio",
            Intent::Risk => "risk",
            Intent::MonteCarlo => "monte_carlo",
            Intent::Esg => "esg",
            Intent::General => "general",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Intent> {
        match tag.trim().to_lowercase().as_str() {
            "archetype" => Some(Intent::Archetype),
            "portfolio" => Some(Intent::Portfolio),
            "risk" => Some(Intent::Risk),
            "monte_carlo" | "monte carlo" => Some(Intent::MonteCarlo),
            "esg" => Some(Intent::Esg),
            "general" => Some(Intent::General),
            _ => None,
        }
    }

    /// Domain vocabulary handed to the query expander
    pub fn expansion_hint(&self) -> &'static str {
        match self {
            Intent::Archetype => {
                "investment model portfolios, fund allocations, Integrated Best Ideas, Impact 100%"
            }
            Intent::Portfolio => "holdings, asset allocation, efficient frontier, rebalancing",
            Intent::Risk => "volatility, value at risk, drawdown, beta, tracking error",
            Intent::MonteCarlo => "simulation percentiles, success probability, projected outcomes",
            Intent::Esg => "ESG metrics, carbon intensity, financed emissions, sustainability",
            Intent::General => "investments, portfolios, risk, returns",
        }
    }

    /// Keyword table used for degraded-mode classification
    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Intent::Archetype => &[
                "archetype",
                "ibi",
                "best ideas",
                "impact 100",
                "climate sustainability",
                "inclusive innovation",
                "model portfolio",
            ],
            Intent::Portfolio => &[
                "portfolio",
                "holding",
                "allocation",
                "efficient frontier",
                "optimization",
                "rebalanc",
            ],
            Intent::Risk => &[
                "risk",
                "volatility",
                "var",
                "drawdown",
                "beta",
                "sharpe",
                "tracking error",
            ],
            Intent::MonteCarlo => &[
                "monte carlo",
                "simulation",
                "percentile",
                "success probability",
                "projection",
            ],
            Intent::Esg => &[
                "esg",
                "carbon",
                "emission",
                "sustainab",
                "financed",
                "intensity",
                "sfdr",
            ],
            Intent::General => &[],
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LLM intent classifier with keyword fallback
pub struct IntentClassifier {
    chat: Arc<dyn ChatModel>,
}

impl IntentClassifier {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self { chat }
    }

    /// Classify a query; never fails (degrades to keywords, then General)
    pub async fn classify(&self, query: &str, options: &ChatOptions) -> Intent {
        let prompt = format!(
            "Classify this wealth-management question into exactly one intent tag.\n\
             Tags:\n\
             - archetype: investment model archetypes, their funds and allocations\n\
             - portfolio: the user's portfolio holdings, allocation, optimization\n\
             - risk: risk metrics such as VaR, volatility, drawdown, beta\n\
             - monte_carlo: Monte Carlo simulation results and percentiles\n\
             - esg: ESG metrics, carbon and emissions methodology\n\
             - general: anything else\n\
             Respond with the tag only.\n\n\
             Question: {}",
            query
        );

        match self.chat.chat(&prompt, options).await {
            Ok(response) => match Intent::from_tag(&response) {
                Some(intent) => {
                    tracing::debug!(intent = %intent, "Intent classified");
                    intent
                }
                None => {
                    tracing::warn!(response = %response, "Unrecognised intent tag, using keyword fallback");
                    classify_by_keywords(query)
                }
            },
            Err(e) => {
                tracing::warn!("Intent classification failed, using keyword fallback: {}", e);
                classify_by_keywords(query)
            }
        }
    }
}

/// Deterministic keyword-table classification (degraded mode)
pub fn classify_by_keywords(query: &str) -> Intent {
    let lowered = query.to_lowercase();
    for intent in Intent::ALL {
        if intent
            .keywords()
            .iter()
            .any(|kw| lowered.contains(kw))
        {
            return intent;
        }
    }
    Intent::General
}
