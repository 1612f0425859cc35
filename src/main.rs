use prism::cli::{Cli, Commands, ConfigAction};
use prism::config::{Config, ConfigValidator};
use prism::embedding::FastEmbedProvider;
use prism::error::{PrismError, Result};
use prism::llm::OpenAiChatModel;
use prism::metrics::{FeedbackSink, JsonlSink, MetricsSink};
use prism::pipeline::AppContext;
use prism::service::{AnswerEvent, PrismService, QueryInput};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Query {
            text,
            corpus,
            domain,
            prompt,
            app_context,
            stream,
            json,
        } => {
            cmd_query(
                cli.config, text, corpus, domain, prompt, app_context, stream, json,
            )
            .await?;
        }
        Commands::Warmup { corpus, domain } => {
            cmd_warmup(cli.config, corpus, domain).await?;
        }
        Commands::Stats { corpus, domain } => {
            cmd_stats(cli.config, corpus, domain).await?;
        }
        Commands::Prompts => {
            cmd_prompts(cli.config)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "prism=debug" } else { "prism=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if path.exists() {
        Config::load(&path)
    } else {
        tracing::debug!("No config file at {:?}, using defaults", path);
        let mut config = Config::default();
        config.apply_env_overrides();
        Ok(config)
    }
}

fn build_service(config: Config) -> Result<Arc<PrismService>> {
    let embedder = Arc::new(
        FastEmbedProvider::from_config(&config.embedding)
            .map_err(|e| PrismError::Config(format!("Embedder init failed: {}", e)))?,
    );

    let chat = Arc::new(OpenAiChatModel::from_config(&config.llm)?);
    let utility_chat: Option<Arc<dyn prism::llm::ChatModel>> =
        if config.llm.utility_model != config.llm.model {
            let mut utility_config = config.llm.clone();
            utility_config.model = config.llm.utility_model.clone();
            Some(Arc::new(OpenAiChatModel::from_config(&utility_config)?))
        } else {
            None
        };

    let metrics: Arc<dyn MetricsSink> = Arc::new(
        JsonlSink::open(&config.service.log_dir.join("metrics.jsonl"))
            .map_err(|e| PrismError::Config(e.to_string()))?,
    );
    let feedback: Arc<dyn FeedbackSink> = Arc::new(
        JsonlSink::open(&config.service.log_dir.join("feedback.jsonl"))
            .map_err(|e| PrismError::Config(e.to_string()))?,
    );

    Ok(Arc::new(PrismService::new(
        config,
        embedder,
        chat,
        utility_chat,
        metrics,
        feedback,
    )?))
}

#[allow(clippy::too_many_arguments)]
async fn cmd_query(
    config_path: Option<PathBuf>,
    text: String,
    corpus: PathBuf,
    domain: Option<String>,
    prompt: Option<String>,
    app_context: Option<String>,
    stream: bool,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let service = build_service(config)?;

    let domain_name = domain
        .clone()
        .unwrap_or_else(|| service.config().service.default_domain.clone());
    let loaded = service.load_corpus(&domain_name, &corpus).await?;
    tracing::info!(chunks = loaded, "Corpus ready");

    let app_context: Option<AppContext> = match app_context {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| PrismError::Json {
            source: e,
            context: "Failed to parse --app-context".to_string(),
        })?),
        None => None,
    };

    let input = QueryInput {
        text,
        domain,
        prompt_name: prompt,
        app_context,
        thread_id: None,
    };

    if stream {
        let mut events = service.query_stream(input);
        while let Some(event) = events.recv().await {
            match event {
                AnswerEvent::Token(token) => {
                    print!("{}", token);
                    use std::io::Write;
                    let _ = std::io::stdout().flush();
                }
                AnswerEvent::Complete {
                    id,
                    citations,
                    quality,
                    intent,
                    ..
                } => {
                    println!();
                    println!(
                        "\n[{}] intent={} quality={} citations={}",
                        id,
                        intent,
                        quality,
                        citations.len()
                    );
                }
                AnswerEvent::Error(message) => {
                    eprintln!("error: {}", message);
                }
            }
        }
    } else {
        let output = service.query(input).await?;

        if json {
            let payload = serde_json::json!({
                "id": output.id,
                "answer": output.answer,
                "citations": output.citations,
                "quality": output.quality,
                "intent": output.intent,
                "timings": output.timings,
            });
            println!("{}", serde_json::to_string_pretty(&payload).map_err(|e| PrismError::Json {
                source: e,
                context: "Failed to render response".to_string(),
            })?);
        } else {
            println!("{}", output.answer);
            if !output.citations.is_empty() {
                println!();
                for (i, citation) in output.citations.iter().enumerate() {
                    println!(
                        "  [{}] {} (chunk {}, score {:.2})",
                        i + 1,
                        citation.source_path,
                        citation.chunk_index,
                        citation.score
                    );
                }
            }
            println!(
                "\n[{}] intent={} quality={} total={}ms",
                output.id, output.intent, output.quality, output.timings.total_ms
            );
        }
    }

    service.shutdown().await;
    Ok(())
}

async fn cmd_warmup(
    config_path: Option<PathBuf>,
    corpus: PathBuf,
    domain: Option<String>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let service = build_service(config)?;

    let domain_name =
        domain.unwrap_or_else(|| service.config().service.default_domain.clone());
    let loaded = service.load_corpus(&domain_name, &corpus).await?;
    service.warmup().await?;

    println!("✓ Ready: {} chunks indexed in '{}'", loaded, domain_name);
    Ok(())
}

async fn cmd_stats(
    config_path: Option<PathBuf>,
    corpus: PathBuf,
    domain: Option<String>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let service = build_service(config)?;

    let domain_name =
        domain.unwrap_or_else(|| service.config().service.default_domain.clone());
    service.load_corpus(&domain_name, &corpus).await?;

    let collection = service.open_collection(&domain_name)?;
    let stats = collection.stats();
    let cache = service.cache_stats();

    println!("Collection '{}':", collection.name());
    println!("  documents:     {}", stats.doc_count);
    println!("  embedding dim: {}", stats.embedding_dim);
    println!(
        "Cache: {} entries ({} hits, {} misses, {} evictions)",
        cache.size, cache.hits, cache.misses, cache.evictions
    );
    for breaker in service.breaker_status() {
        println!(
            "Breaker '{}': {} ({} failures)",
            breaker.name,
            breaker.state.as_str(),
            breaker.failure_count
        );
    }

    Ok(())
}

fn cmd_prompts(config_path: Option<PathBuf>) -> Result<()> {
    // The registry is static; config is only needed for error parity
    let _ = load_config(config_path)?;
    let registry = prism::prompts::PromptRegistry::builtin()?;

    println!("Available prompt templates:");
    for name in registry.names() {
        println!("  {}", name);
    }
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                return Err(PrismError::Config(format!(
                    "Config file already exists at {:?} (use --force to overwrite)",
                    path
                )));
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| PrismError::Io {
                    source: e,
                    context: format!("Failed to create config directory {:?}", parent),
                })?;
            }
            let config = Config::default();
            config.save(&path)?;
            println!("✓ Wrote default config to {:?}", path);
        }
        ConfigAction::Show => {
            let config = load_config(Some(path))?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Validate => {
            let config = Config::load(&path)?;
            ConfigValidator::validate(&config)?;
            println!("✓ Configuration is valid");
        }
    }

    Ok(())
}
