//! Prompt template registry
//!
//! Templates are name-indexed strings parameterised over exactly two
//! placeholders, `{context}` and `{query}`. Anything else is a validation
//! error caught at load time, so a renamed placeholder can never reach
//! production silently. Each intent has exactly one default template used
//! when a query names no template of its own.

use crate::pipeline::Intent;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Template '{template}' references unknown placeholder '{{{placeholder}}}'")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
    },

    #[error("Template '{template}' is missing required placeholder '{{{placeholder}}}'")]
    MissingPlaceholder {
        template: String,
        placeholder: String,
    },

    #[error("Unknown prompt: {0}")]
    UnknownPrompt(String),

    #[error("Intent '{intent}' already has default template '{existing}'")]
    DuplicateDefault { intent: Intent, existing: String },

    #[error("Intent '{intent}' has no default template")]
    MissingDefault { intent: Intent },
}

/// A named generation template
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: String,
    pub template: String,
    pub description: String,
    /// Intent this template is the default for, if any
    pub default_for: Option<Intent>,
}

impl PromptTemplate {
    /// Substitute the two placeholders literally
    pub fn render(&self, context: &str, query: &str) -> String {
        self.template
            .replace("{context}", context)
            .replace("{query}", query)
    }

    /// Whether this template carries the formula-structure contract
    pub fn is_formula_family(&self) -> bool {
        self.name.starts_with("esg_")
    }
}

/// Read-only registry of validated templates
pub struct PromptRegistry {
    templates: HashMap<String, PromptTemplate>,
    defaults: HashMap<Intent, String>,
}

impl PromptRegistry {
    /// Build an empty registry
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
            defaults: HashMap::new(),
        }
    }

    /// Build the built-in registry; every intent gets a default
    pub fn builtin() -> Result<Self, PromptError> {
        let mut registry = Self::new();
        for template in builtin_templates() {
            registry.register(template)?;
        }
        registry.check_defaults()?;
        Ok(registry)
    }

    /// Register a template after validating its placeholders
    pub fn register(&mut self, template: PromptTemplate) -> Result<(), PromptError> {
        validate_placeholders(&template)?;

        if let Some(intent) = template.default_for {
            if let Some(existing) = self.defaults.get(&intent) {
                return Err(PromptError::DuplicateDefault {
                    intent,
                    existing: existing.clone(),
                });
            }
            self.defaults.insert(intent, template.name.clone());
        }

        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    fn check_defaults(&self) -> Result<(), PromptError> {
        for intent in Intent::ALL {
            if !self.defaults.contains_key(&intent) {
                return Err(PromptError::MissingDefault { intent });
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&PromptTemplate, PromptError> {
        self.templates
            .get(name)
            .ok_or_else(|| PromptError::UnknownPrompt(name.to_string()))
    }

    /// Default template for an intent. `builtin()` guarantees presence.
    pub fn default_for(&self, intent: Intent) -> Result<&PromptTemplate, PromptError> {
        let name = self
            .defaults
            .get(&intent)
            .ok_or(PromptError::MissingDefault { intent })?;
        self.get(name)
    }

    /// Resolve the template for a query: an explicitly named template wins;
    /// an unknown name falls back to the intent default with a warning.
    pub fn resolve(&self, prompt_name: Option<&str>, intent: Intent) -> Result<&PromptTemplate, PromptError> {
        if let Some(name) = prompt_name {
            match self.get(name) {
                Ok(template) => return Ok(template),
                Err(_) => {
                    tracing::warn!(prompt = name, "Unknown prompt name, using intent default");
                }
            }
        }
        self.default_for(intent)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

const ALLOWED_PLACEHOLDERS: [&str; 2] = ["context", "query"];

fn placeholder_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\{([a-z_]+)\}").unwrap())
}

fn validate_placeholders(template: &PromptTemplate) -> Result<(), PromptError> {
    let mut seen = [false; ALLOWED_PLACEHOLDERS.len()];

    for capture in placeholder_regex().captures_iter(&template.template) {
        let name = &capture[1];
        match ALLOWED_PLACEHOLDERS.iter().position(|p| *p == name) {
            Some(idx) => seen[idx] = true,
            None => {
                return Err(PromptError::UnknownPlaceholder {
                    template: template.name.clone(),
                    placeholder: name.to_string(),
                })
            }
        }
    }

    for (idx, placeholder) in ALLOWED_PLACEHOLDERS.iter().enumerate() {
        if !seen[idx] {
            return Err(PromptError::MissingPlaceholder {
                template: template.name.clone(),
                placeholder: placeholder.to_string(),
            });
        }
    }

    Ok(())
}

/// Shared brevity contract appended to non-formula templates
const BREVITY_RULES: &str = "\
RESPONSE LENGTH (STRICT):
- Maximum 80 words. No exceptions.
- Lead with the key insight or number.
- No preamble (\"Based on...\", \"According to...\") and no closing summary.
- Cite sources inline as [1], [2], ... matching the numbered sources above.";

fn builtin_templates() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate {
            name: "general_cited".to_string(),
            template: format!(
                "You are an investment research assistant for wealth-management clients.\n\n\
                 Numbered sources:\n---------------------\n{{context}}\n---------------------\n\n\
                 Answer using ONLY the sources above. If they don't contain the answer, say \
                 \"I don't have that information.\"\n\n{}\n\nQuestion: {{query}}\n\nAnswer: ",
                BREVITY_RULES
            ),
            description: "Default cited question-answering".to_string(),
            default_for: Some(Intent::General),
        },
        PromptTemplate {
            name: "archetype_overview_cited".to_string(),
            template: format!(
                "You are an investment research assistant answering questions about model \
                 archetypes (Integrated Best Ideas, Impact 100%, Climate Sustainability, \
                 Inclusive Innovation).\n\n\
                 Numbered sources:\n---------------------\n{{context}}\n---------------------\n\n\
                 Name specific funds, allocation percentages, and risk levels where the sources \
                 provide them.\n\n{}\n\nQuestion: {{query}}\n\nAnswer: ",
                BREVITY_RULES
            ),
            description: "Model archetype overview with citations".to_string(),
            default_for: Some(Intent::Archetype),
        },
        PromptTemplate {
            name: "portfolio_allocation_cited".to_string(),
            template: format!(
                "You are an investment research assistant explaining portfolio holdings and \
                 allocations.\n\n\
                 Numbered sources:\n---------------------\n{{context}}\n---------------------\n\n\
                 State percentage allocations clearly, grouped by asset class when applicable.\n\n\
                 {}\n\nQuestion: {{query}}\n\nAnswer: ",
                BREVITY_RULES
            ),
            description: "Portfolio allocation breakdowns with citations".to_string(),
            default_for: Some(Intent::Portfolio),
        },
        PromptTemplate {
            name: "risk_metrics_interpreter_cited".to_string(),
            template: format!(
                "You are explaining risk metrics to a wealth-management client viewing their \
                 portfolio analysis.\n\n\
                 Reference documentation:\n---------------------\n{{context}}\n---------------------\n\n\
                 IMPORTANT:\n\
                 - Use \"your\" language: the client is looking at THEIR risk metrics.\n\
                 - Instead of \"VaR measures...\" say \"Your VaR means...\".\n\
                 - If their numbers appear in the question, reference them directly.\n\n\
                 {}\n\nQuestion: {{query}}\n\nExplanation: ",
                BREVITY_RULES
            ),
            description: "Risk metrics interpreter with citations".to_string(),
            default_for: Some(Intent::Risk),
        },
        PromptTemplate {
            name: "monte_carlo_interpreter_cited".to_string(),
            template: format!(
                "You are explaining Monte Carlo simulation results to a wealth-management client \
                 viewing their own simulation output.\n\n\
                 Reference documentation:\n---------------------\n{{context}}\n---------------------\n\n\
                 IMPORTANT:\n\
                 - Use \"your\" language: the client is looking at THEIR results.\n\
                 - If their numbers appear in the question, reference them directly.\n\n\
                 RESPONSE STRUCTURE (follow this order):\n\
                 1. LEAD WITH MEDIAN: start from the most likely outcome (50th percentile), or \
                 the client's own headline number.\n\
                 2. SUCCESS PROBABILITY: their likelihood of meeting the target.\n\
                 3. RANGE: present the full range neutrally, \"from [5th] to [95th]\".\n\
                 NEVER open with the pessimistic percentile or a worst-case framing.\n\n\
                 {}\n\nQuestion: {{query}}\n\nExplanation: ",
                BREVITY_RULES
            ),
            description: "Monte Carlo interpreter with citations".to_string(),
            default_for: Some(Intent::MonteCarlo),
        },
        PromptTemplate {
            name: "esg_analysis_cited".to_string(),
            template: "You are an ESG (Environmental, Social, Governance) analyst.\n\n\
                 Numbered sources:\n---------------------\n{context}\n---------------------\n\n\
                 FORMULA QUERY DETECTION:\n\
                 If the question contains any of: formula, calculation, calculate, methodology, \
                 method, compute, derive, equation, \"how to measure\", \"how is it measured\" \
                 (or variations), respond with ALL FOUR parts in this exact order:\n\n\
                 1. COMPONENTS - a table defining each variable with units\n\
                 2. FORMULA - displayed in a fenced code block with a fraction bar\n\
                 3. EXAMPLE - a worked calculation with real numbers from the sources\n\
                 4. INTERPRETATION - one sentence on what the metric measures and why it matters\n\n\
                 For non-formula questions, give a standard analysis: highlight environmental, \
                 social, and governance factors, reference specific metrics, maximum 80 words, \
                 no preamble.\n\n\
                 Always cite sources inline as [1], [2], ... matching the numbered sources.\n\n\
                 Question: {query}\n\nResponse: "
                .to_string(),
            description: "ESG analysis with citations and formula support".to_string(),
            default_for: Some(Intent::Esg),
        },
    ]
}

/// Keywords that switch `esg`-family templates into the fixed
/// COMPONENTS/FORMULA/EXAMPLE/INTERPRETATION structure
const FORMULA_KEYWORDS: [&str; 9] = [
    "formula",
    "calculat",
    "methodolog",
    "method",
    "compute",
    "derive",
    "equation",
    "how to measure",
    "measured",
];

/// Whether a query triggers the formula response contract. The generator
/// uses this to widen its token budget so the structured four-part reply
/// is not truncated mid-table.
pub fn is_formula_query(query: &str) -> bool {
    let lowered = query.to_lowercase();
    FORMULA_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}
