use anyhow::{Context, Result};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use taxrag::{
    AgentRegistry, AppState, ConfigManager, TaxragConfig,
    cli::{Cli, Commands, output::Output},
    retrieval::Corpus,
    types::{AgentKind, Query, QueryComplexity, StreamEvent},
    utils::toml_config::LoggingConfig,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    let config_manager = match ConfigManager::new(&cli.config) {
        Ok(manager) => Arc::new(manager),
        Err(e) => {
            output.error(&format!("Failed to load {}: {}", cli.config.display(), e));
            return Err(e.into());
        }
    };
    init_tracing(&config_manager.config().logging, cli.verbose);

    match cli.command {
        None => serve(config_manager, None, None, &output).await,
        Some(Commands::Serve { host, port }) => serve(config_manager, host, port, &output).await,
        Some(Commands::Query {
            text,
            complexity,
            agents,
            no_web,
            json,
        }) => run_query(config_manager, text, complexity, agents, no_web, json, &output).await,
        Some(Commands::Config { full, validate }) => {
            show_config(&cli.config, &config_manager.config(), full, validate, &output)
        }
        Some(Commands::Agents) => list_agents(&config_manager.config(), &output),
    }
}

/// `RUST_LOG` wins over the configured level; `--verbose` raises the default to debug.
/// Logs go to stderr so query output on stdout stays clean.
fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format.eq_ignore_ascii_case("json") {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn serve(
    config_manager: Arc<ConfigManager>,
    host: Option<String>,
    port: Option<u16>,
    output: &Output,
) -> Result<()> {
    if let Err(e) = config_manager.start_watching() {
        tracing::warn!("Configuration hot reload disabled: {}", e);
    }

    let state = AppState::from_config(Arc::clone(&config_manager)).await?;
    let config = config_manager.config();
    let addr = format!(
        "{}:{}",
        host.unwrap_or_else(|| config.server.host.clone()),
        port.unwrap_or(config.server.port)
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    output.banner();
    output.success(&format!("Listening on http://{}", addr));
    output.info(&format!(
        "OpenAPI document at http://{}/api-docs/openapi.json",
        addr
    ));
    if state.corpus.is_empty() {
        output.warning("No corpus loaded; only external agents can retrieve");
    }
    if state.llm.is_none() {
        output.warning("Generation disabled; answers are extractive summaries");
    }
    tracing::info!(%addr, agents = state.registry.len(), "Server started");

    axum::serve(listener, taxrag::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    config_manager.stop_watching();
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn run_query(
    config_manager: Arc<ConfigManager>,
    text: String,
    complexity: Option<QueryComplexity>,
    agents: Vec<AgentKind>,
    no_web: bool,
    json: bool,
    output: &Output,
) -> Result<()> {
    let state = AppState::from_config(config_manager).await?;
    let coordinator = state.coordinator();

    let mut query = Query::new(&text)
        .with_preferred_agents(agents)
        .with_external_search(!no_web);
    if let Some(complexity) = complexity {
        query = query.with_complexity_hint(complexity);
    }
    query.validate(coordinator.config().max_query_length)?;

    let mut events = coordinator.handle_query(query, coordinator.default_deadline());
    let mut failed = false;
    while let Some(event) = events.next().await {
        failed |= matches!(event, StreamEvent::Error { .. });
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            output.event(&event);
        }
    }

    if failed {
        anyhow::bail!("query did not produce an answer");
    }
    Ok(())
}

fn show_config(
    path: &Path,
    config: &TaxragConfig,
    full: bool,
    validate: bool,
    output: &Output,
) -> Result<()> {
    if validate {
        match TaxragConfig::load(path) {
            Ok(_) => output.success(&format!("{} is valid", path.display())),
            Err(e) => {
                output.warning(&format!("{} is not valid", path.display()));
                output.error(&e.to_string());
                anyhow::bail!("invalid configuration");
            }
        }
    }

    if full {
        println!("{}", toml::to_string_pretty(config)?);
        return Ok(());
    }

    let p = &config.pipeline;
    output.header("Configuration");
    output.kv("file", &path.display().to_string());
    output.kv(
        "server",
        &format!("{}:{}", config.server.host, config.server.port),
    );
    output.kv(
        "llm",
        &if config.llm.enabled {
            format!("{} ({})", config.llm.model, config.llm.provider)
        } else {
            "disabled".to_string()
        },
    );
    output.kv(
        "corpus",
        &config
            .corpus
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string()),
    );
    output.kv(
        "quality gate",
        &format!(
            "confidence >= {}, evidence >= {}",
            p.confidence_threshold, p.min_evidence
        ),
    );
    output.kv(
        "timeouts",
        &format!(
            "agent {}s, overall {}s, synthesis {}s",
            p.agent_timeout_secs, p.overall_timeout_secs, p.synthesis_timeout_secs
        ),
    );
    output.hint("Use --full to print every setting");
    Ok(())
}

fn list_agents(config: &TaxragConfig, output: &Output) -> Result<()> {
    let corpus = match &config.corpus.path {
        Some(path) => Corpus::load(path)?,
        None => Corpus::from_documents(Vec::new()),
    };
    let registry = AgentRegistry::standard(Arc::new(corpus), &config.pipeline, &config.corpus);

    output.header("Agents");
    output.table_header(&["Agent", "Source", "Specialty"]);
    for kind in registry.kinds() {
        let terms = kind.specialty_terms().iter().take(3).copied().collect::<Vec<_>>().join(", ");
        output.table_row(&[kind.as_str(), kind.source_type().as_str(), terms.as_str()]);
    }
    Ok(())
}
