//! # taxrag - multi-agent retrieval and synthesis for tax research
//!
//! Answers natural-language tax research questions by dispatching specialized
//! retrieval agents (regulations, case law, precedent transactions, expert
//! commentary, external web search) in parallel, fusing their evidence under
//! a quality gate, and streaming a cited answer whose depth follows the
//! complexity of the question.
//!
//! ## Overview
//!
//! taxrag can be used in two ways:
//!
//! 1. **As a standalone server** - Run the `taxrag-server` binary
//! 2. **As a library** - Drive [`ResearchCoordinator`] from your own code
//!
//! ### Basic Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use std::sync::Arc;
//! use taxrag::{AgentRegistry, ResearchCoordinator, TaxragConfig};
//! use taxrag::retrieval::Corpus;
//! use taxrag::types::{Query, StreamEvent};
//!
//! let config = TaxragConfig::load("taxrag.toml")?;
//! let corpus = Arc::new(Corpus::load("data/corpus.json")?);
//! let registry = Arc::new(AgentRegistry::standard(corpus, &config.pipeline, &config.corpus));
//!
//! let coordinator = ResearchCoordinator::new(registry, None, config.pipeline.clone());
//! let mut events = coordinator.handle_query(
//!     Query::new("Is boot taxable in a section 1031 exchange?"),
//!     coordinator.default_deadline(),
//! );
//! while let Some(event) = events.next().await {
//!     if let StreamEvent::Final { answer, citations, .. } = event {
//!         println!("{} ({} citations)", answer, citations.len());
//!     }
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ollama` | Ollama generation backend (default) |
//!
//! ## Modules
//!
//! - [`planner`] - Complexity classification and per-agent query refinement
//! - [`agents`] - Retrieval agents and the agent registry
//! - [`retrieval`] - Vector, lexical, graph and web search backends
//! - [`orchestrator`] - Parallel dispatch, deadlines and the quality gate
//! - [`fusion`] - Deduplication, ranking and conflict detection
//! - [`synthesis`] - Strategy selection and answer streaming
//! - [`research`] - The per-query pipeline driver
//! - [`api`] - REST API handlers and routes
//! - [`llm`] - Generation clients
//! - [`types`] - Common types and error handling

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// Retrieval agents and the agent registry.
pub mod agents;
/// HTTP API handlers and routes.
pub mod api;
/// Command-line interface.
pub mod cli;
/// Evidence fusion: dedup, ranking, conflicts, aggregate confidence.
pub mod fusion;
/// LLM provider clients and abstractions.
pub mod llm;
/// Agent dispatch, deadlines and quality gating.
pub mod orchestrator;
/// Query planning.
pub mod planner;
/// Per-query pipeline coordination.
pub mod research;
/// Retrieval backends over the knowledge base and the web.
pub mod retrieval;
/// Synthesis strategy selection and streaming.
pub mod synthesis;
/// Core types (requests, events, errors).
pub mod types;
/// Configuration and metrics.
pub mod utils;

// Re-export commonly used types
pub use agents::AgentRegistry;
pub use llm::{LLMClient, LLMClientFactory, Provider};
pub use research::ResearchCoordinator;
pub use types::{AppError, Result};
pub use utils::metrics::MetricsCollector;
pub use utils::toml_config::{ConfigManager, TaxragConfig};

use crate::retrieval::Corpus;
use axum::{Router, extract::DefaultBodyLimit, http::HeaderValue};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

/// Largest accepted request body. Queries are capped far below this.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// TOML configuration with hot-reload support
    pub config_manager: Arc<ConfigManager>,
    /// Knowledge base behind the in-memory backends
    pub corpus: Arc<Corpus>,
    /// Agents available to the planner and orchestrator
    pub registry: Arc<AgentRegistry>,
    /// Generation client; `None` when generation is disabled
    pub llm: Option<Arc<dyn LLMClient>>,
    pub metrics: Arc<MetricsCollector>,
}

impl AppState {
    pub fn new(
        config_manager: Arc<ConfigManager>,
        corpus: Arc<Corpus>,
        registry: Arc<AgentRegistry>,
        llm: Option<Arc<dyn LLMClient>>,
    ) -> Self {
        Self {
            config_manager,
            corpus,
            registry,
            llm,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// Loads the knowledge base, builds the standard agent set and the
    /// configured generation client.
    ///
    /// Agents and the generation client are built once; pipeline thresholds
    /// are re-read from the configuration for every query.
    pub async fn from_config(config_manager: Arc<ConfigManager>) -> Result<Self> {
        let config = config_manager.config();

        let corpus = match &config.corpus.path {
            Some(path) => Corpus::load(path)?,
            None => {
                tracing::warn!("No knowledge base configured; only web search can return evidence");
                Corpus::from_documents(Vec::new())
            }
        };
        let corpus = Arc::new(corpus);
        let registry = AgentRegistry::standard(Arc::clone(&corpus), &config.pipeline, &config.corpus);

        let llm: Option<Arc<dyn LLMClient>> = LLMClientFactory::from_config(&config.llm)?
            .create_default()
            .await?
            .map(Arc::from);

        tracing::info!(
            documents = corpus.len(),
            agents = registry.len(),
            model = llm.as_ref().map(|l| l.model_name()).unwrap_or("disabled"),
            "Application state ready"
        );

        Ok(Self::new(config_manager, corpus, Arc::new(registry), llm))
    }

    /// A coordinator over the current configuration snapshot.
    pub fn coordinator(&self) -> ResearchCoordinator {
        let config = self.config_manager.config();
        ResearchCoordinator::new(
            Arc::clone(&self.registry),
            self.llm.clone(),
            config.pipeline.clone(),
        )
        .with_metrics(Arc::clone(&self.metrics))
    }
}

/// The complete HTTP application: `/api` routes, probes and the OpenAPI
/// document behind tracing, CORS and compression.
///
/// Bodies over 64 KiB are refused with 413 by the extractors. Compression
/// skips `text/event-stream`, so streamed answers are not buffered.
pub fn app(state: AppState) -> Router {
    let config = state.config_manager.config();
    let origins = &config.server.cors_origins;
    let cors = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(AllowOrigin::list(
            origins.iter().filter_map(|o| o.parse::<HeaderValue>().ok()),
        ))
    }
    .allow_methods(Any)
    .allow_headers(Any);

    Router::new()
        .merge(api::routes::health_router())
        .nest("/api", api::routes::create_router())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}
