//! Prism - Wealth-Management Document Q&A
//!
//! An agentic retrieval-and-grading pipeline: a staged state machine that
//! takes a user query, retrieves candidate passages via hybrid search,
//! grades each candidate for relevance with a language model, reranks the
//! survivors, and generates a cited answer — with caching, circuit
//! breaking, and graceful degradation to a simpler linear path.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod prompts;
pub mod resilience;
pub mod retrieval;
pub mod service;
pub mod store;

pub use error::{PrismError, Result};
