//! Retrieval quality signal

use crate::retrieval::Passage;
use serde::{Deserialize, Serialize};

/// Confidence at or above which a single survivor makes quality `good`
const GOOD_CONFIDENCE: f32 = 0.7;

/// Ordinal summary of retrieval confidence returned with every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Good,
    Ambiguous,
    Poor,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Good => "good",
            Quality::Ambiguous => "ambiguous",
            Quality::Poor => "poor",
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify retrieval quality from the survivor set
///
/// No survivors is `poor`; at least one survivor with top confidence ≥ 0.7
/// is `good`; everything in between is `ambiguous`.
pub fn assess_quality(survivors: &[Passage]) -> Quality {
    if survivors.is_empty() {
        return Quality::Poor;
    }

    let top_confidence = survivors
        .iter()
        .map(|p| p.grade_confidence)
        .fold(0.0f32, f32::max);

    if top_confidence >= GOOD_CONFIDENCE {
        Quality::Good
    } else {
        Quality::Ambiguous
    }
}
