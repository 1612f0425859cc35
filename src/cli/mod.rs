//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "prism",
    version,
    about = "Agentic retrieval-and-grading pipeline for wealth-management document Q&A",
    long_about = "Prism answers natural-language questions over a corpus of wealth-management \
                  documents by retrieving candidate passages with hybrid search, grading each \
                  one for relevance, and synthesising a cited answer grounded in the survivors."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/prism/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Answer a question against a loaded corpus
    Query {
        /// The question to answer
        text: String,

        /// Pre-chunked corpus file (JSONL) to load before querying
        #[arg(long, value_name = "FILE")]
        corpus: PathBuf,

        /// Domain selecting which collection to search
        #[arg(short, long)]
        domain: Option<String>,

        /// Prompt template name (e.g. monte_carlo_interpreter_cited)
        #[arg(short, long)]
        prompt: Option<String>,

        /// User-computed results as a JSON object, injected into the answer
        #[arg(long, value_name = "JSON")]
        app_context: Option<String>,

        /// Stream the answer token by token
        #[arg(long)]
        stream: bool,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load a corpus and run the readiness warmup
    Warmup {
        /// Pre-chunked corpus file (JSONL)
        #[arg(long, value_name = "FILE")]
        corpus: PathBuf,

        /// Domain to load into
        #[arg(short, long)]
        domain: Option<String>,
    },

    /// Show collection, cache, and breaker statistics
    Stats {
        /// Pre-chunked corpus file (JSONL)
        #[arg(long, value_name = "FILE")]
        corpus: PathBuf,

        /// Domain to inspect
        #[arg(short, long)]
        domain: Option<String>,
    },

    /// List available prompt templates
    Prompts,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the active configuration
    Show,

    /// Validate the configuration file and report errors
    Validate,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
