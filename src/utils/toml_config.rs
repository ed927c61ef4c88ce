//! TOML-based configuration for the research server
//!
//! Every threshold the pipeline uses lives here as a named value with a
//! documented default, loaded from `taxrag.toml`. All sections are optional.
//!
//! # Hot Reloading
//!
//! Configuration changes are detected and applied at runtime. Use
//! [`ConfigManager`] for thread-safe access; each query takes one snapshot
//! and keeps it for its whole lifetime.

use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::types::QueryComplexity;

/// Root configuration structure loaded from taxrag.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxragConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
}

// ============= Server =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins; empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// ============= Generation =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Set to false to run without a generation capability (fallback answers only).
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_true() -> bool {
    true
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    2000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: default_provider(),
            base_url: default_ollama_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

// ============= Pipeline =============

/// Thresholds and limits for planning, retrieval, gating, fusion and synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Minimum aggregate confidence for the quality gate to accept.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Minimum number of fused evidence items for the quality gate to accept.
    #[serde(default = "default_min_evidence")]
    pub min_evidence: usize,
    /// Per-backend relevance floor for the first round.
    #[serde(default = "default_relevance_floor")]
    pub relevance_floor: f32,
    /// Per-backend relevance floor for the re-query round.
    #[serde(default = "default_relaxed_relevance_floor")]
    pub relaxed_relevance_floor: f32,
    #[serde(default = "default_hybrid_weight")]
    pub semantic_weight: f32,
    #[serde(default = "default_hybrid_weight")]
    pub lexical_weight: f32,
    /// Items kept per agent in the first round.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Items kept per agent in the re-query round.
    #[serde(default = "default_relaxed_top_k")]
    pub relaxed_top_k: usize,
    /// Result count at which an agent's confidence stops being discounted.
    #[serde(default = "default_confidence_saturation")]
    pub confidence_saturation: usize,
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    #[serde(default = "default_overall_timeout_secs")]
    pub overall_timeout_secs: u64,
    #[serde(default = "default_synthesis_timeout_secs")]
    pub synthesis_timeout_secs: u64,
    /// Budget for one per-agent query refinement call.
    #[serde(default = "default_refinement_timeout_secs")]
    pub refinement_timeout_secs: u64,
    /// Token overlap above which two items of the same source type are merged.
    #[serde(default = "default_dedup_similarity")]
    pub dedup_similarity: f32,
    /// Number of top-ranked items examined for conflicts.
    #[serde(default = "default_conflict_window")]
    pub conflict_window: usize,
    /// Confidence multiplier applied when any conflict is found.
    #[serde(default = "default_conflict_penalty")]
    pub conflict_penalty: f32,
    /// Confidence multiplier applied when more than half the agents failed.
    #[serde(default = "default_degraded_penalty")]
    pub degraded_penalty: f32,
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
    /// Evidence items placed in the synthesis prompt, per complexity tier.
    #[serde(default)]
    pub context_documents: ContextDocuments,
    /// Characters of each item's content placed in the synthesis prompt.
    #[serde(default = "default_content_chars")]
    pub content_chars: usize,
    #[serde(default = "default_max_citations")]
    pub max_citations: usize,
    /// Ask the generation capability to rewrite queries per agent.
    #[serde(default = "default_true")]
    pub llm_refinement: bool,
}

fn default_confidence_threshold() -> f32 {
    0.6
}

fn default_min_evidence() -> usize {
    3
}

fn default_relevance_floor() -> f32 {
    0.7
}

fn default_relaxed_relevance_floor() -> f32 {
    0.4
}

fn default_hybrid_weight() -> f32 {
    0.5
}

fn default_top_k() -> usize {
    10
}

fn default_relaxed_top_k() -> usize {
    20
}

fn default_confidence_saturation() -> usize {
    3
}

fn default_agent_timeout_secs() -> u64 {
    30
}

fn default_overall_timeout_secs() -> u64 {
    60
}

fn default_synthesis_timeout_secs() -> u64 {
    90
}

fn default_refinement_timeout_secs() -> u64 {
    5
}

fn default_dedup_similarity() -> f32 {
    0.85
}

fn default_conflict_window() -> usize {
    10
}

fn default_conflict_penalty() -> f32 {
    0.9
}

fn default_degraded_penalty() -> f32 {
    0.8
}

fn default_max_query_length() -> usize {
    2000
}

fn default_content_chars() -> usize {
    800
}

fn default_max_citations() -> usize {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            min_evidence: default_min_evidence(),
            relevance_floor: default_relevance_floor(),
            relaxed_relevance_floor: default_relaxed_relevance_floor(),
            semantic_weight: default_hybrid_weight(),
            lexical_weight: default_hybrid_weight(),
            top_k: default_top_k(),
            relaxed_top_k: default_relaxed_top_k(),
            confidence_saturation: default_confidence_saturation(),
            agent_timeout_secs: default_agent_timeout_secs(),
            overall_timeout_secs: default_overall_timeout_secs(),
            synthesis_timeout_secs: default_synthesis_timeout_secs(),
            refinement_timeout_secs: default_refinement_timeout_secs(),
            dedup_similarity: default_dedup_similarity(),
            conflict_window: default_conflict_window(),
            conflict_penalty: default_conflict_penalty(),
            degraded_penalty: default_degraded_penalty(),
            max_query_length: default_max_query_length(),
            context_documents: ContextDocuments::default(),
            content_chars: default_content_chars(),
            max_citations: default_max_citations(),
            llm_refinement: true,
        }
    }
}

impl PipelineConfig {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }

    pub fn refinement_timeout(&self) -> Duration {
        Duration::from_secs(self.refinement_timeout_secs)
    }

    /// Relevance floor and result window for a round.
    pub fn retrieval_window(&self, relaxed: bool) -> (f32, usize) {
        if relaxed {
            (self.relaxed_relevance_floor, self.relaxed_top_k)
        } else {
            (self.relevance_floor, self.top_k)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDocuments {
    #[serde(default = "default_simple_docs")]
    pub simple: usize,
    #[serde(default = "default_moderate_docs")]
    pub moderate: usize,
    #[serde(default = "default_complex_docs")]
    pub complex: usize,
    #[serde(default = "default_expert_docs")]
    pub expert: usize,
}

fn default_simple_docs() -> usize {
    10
}

fn default_moderate_docs() -> usize {
    15
}

fn default_complex_docs() -> usize {
    20
}

fn default_expert_docs() -> usize {
    25
}

impl Default for ContextDocuments {
    fn default() -> Self {
        Self {
            simple: default_simple_docs(),
            moderate: default_moderate_docs(),
            complex: default_complex_docs(),
            expert: default_expert_docs(),
        }
    }
}

impl ContextDocuments {
    pub fn for_complexity(&self, complexity: QueryComplexity) -> usize {
        match complexity {
            QueryComplexity::Simple => self.simple,
            QueryComplexity::Moderate => self.moderate,
            QueryComplexity::Complex => self.complex,
            QueryComplexity::Expert => self.expert,
        }
    }
}

// ============= Knowledge Sources =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// JSON knowledge base backing the vector, lexical and graph backends.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Register the external web search agent.
    #[serde(default = "default_true")]
    pub web_search: bool,
    /// Also register the irs.gov guidance agent. Ignored without `web_search`.
    #[serde(default = "default_true")]
    pub irs_search: bool,
    #[serde(default = "default_web_results")]
    pub web_results: usize,
}

fn default_web_results() -> usize {
    5
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: None,
            web_search: true,
            irs_search: true,
            web_results: default_web_results(),
        }
    }
}

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),
}

impl From<ConfigError> for crate::types::AppError {
    fn from(err: ConfigError) -> Self {
        crate::types::AppError::Configuration(err.to_string())
    }
}

impl TaxragConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: TaxragConfig = toml::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise use defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load(&path) {
            Err(ConfigError::FileNotFound(path)) => {
                warn!("No configuration at {:?}, using defaults", path);
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;

        for (name, value) in [
            ("confidence_threshold", p.confidence_threshold),
            ("relevance_floor", p.relevance_floor),
            ("relaxed_relevance_floor", p.relaxed_relevance_floor),
            ("semantic_weight", p.semantic_weight),
            ("lexical_weight", p.lexical_weight),
            ("dedup_similarity", p.dedup_similarity),
            ("conflict_penalty", p.conflict_penalty),
            ("degraded_penalty", p.degraded_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "pipeline.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if (p.semantic_weight + p.lexical_weight - 1.0).abs() > 1e-3 {
            return Err(ConfigError::ValidationError(format!(
                "pipeline.semantic_weight + pipeline.lexical_weight must equal 1, got {}",
                p.semantic_weight + p.lexical_weight
            )));
        }

        if p.relaxed_relevance_floor > p.relevance_floor {
            return Err(ConfigError::ValidationError(
                "pipeline.relaxed_relevance_floor cannot exceed pipeline.relevance_floor"
                    .to_string(),
            ));
        }

        if p.agent_timeout_secs == 0
            || p.overall_timeout_secs == 0
            || p.synthesis_timeout_secs == 0
            || p.refinement_timeout_secs == 0
        {
            return Err(ConfigError::ValidationError(
                "pipeline timeouts must be greater than zero".to_string(),
            ));
        }

        if p.top_k == 0 || p.relaxed_top_k < p.top_k {
            return Err(ConfigError::ValidationError(
                "pipeline.top_k must be positive and no larger than pipeline.relaxed_top_k"
                    .to_string(),
            ));
        }

        if p.confidence_saturation == 0 || p.max_query_length == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.confidence_saturation and pipeline.max_query_length must be positive"
                    .to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                self.logging.format
            )));
        }

        Ok(())
    }
}

// ============= Hot Reloading Configuration Manager =============

/// Thread-safe configuration manager with hot reloading support
pub struct ConfigManager {
    config: Arc<ArcSwap<TaxragConfig>>,
    config_path: PathBuf,
    watcher: RwLock<Option<RecommendedWatcher>>,
}

impl ConfigManager {
    /// Create a new configuration manager and load the initial config.
    /// A missing file yields the defaults.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        // Absolute path for reliable file watching
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(ConfigError::ReadError)?
                .join(path)
        };

        let config = TaxragConfig::load_or_default(&path)?;

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: path,
            watcher: RwLock::new(None),
        })
    }

    /// Create a config manager directly from a config, without file watching.
    pub fn from_config(config: TaxragConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: PathBuf::from("taxrag.toml"),
            watcher: RwLock::new(None),
        }
    }

    /// Current configuration snapshot (lockless read)
    pub fn config(&self) -> Arc<TaxragConfig> {
        self.config.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Manually reload the configuration from disk
    pub fn reload(&self) -> Result<(), ConfigError> {
        info!("Reloading configuration from {:?}", self.config_path);

        let new_config = TaxragConfig::load(&self.config_path)?;
        self.config.store(Arc::new(new_config));

        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Start watching for configuration file changes
    pub fn start_watching(&self) -> Result<(), ConfigError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let config_path = self.config_path.clone();
        let config_arc = Arc::clone(&self.config);
        let file_name = self.config_path.file_name().map(|n| n.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let touches_config = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if touches_config && (event.kind.is_modify() || event.kind.is_create()) {
                        // Debounced in the receiver
                        let _ = tx.send(());
                    }
                }
                Err(e) => {
                    error!("Config watcher error: {:?}", e);
                }
            }
        })?;

        // Editors replace files, so watch the parent directory
        if let Some(parent) = self.config_path.parent() {
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }

        *self.watcher.write() = Some(watcher);

        tokio::spawn(async move {
            let mut last_reload: Option<std::time::Instant> = None;
            let debounce_duration = Duration::from_millis(500);

            while rx.recv().await.is_some() {
                if last_reload.is_some_and(|at| at.elapsed() < debounce_duration) {
                    continue;
                }

                // Let the write finish
                tokio::time::sleep(Duration::from_millis(100)).await;

                match TaxragConfig::load(&config_path) {
                    Ok(new_config) => {
                        config_arc.store(Arc::new(new_config));
                        info!("Configuration hot-reloaded successfully");
                        last_reload = Some(std::time::Instant::now());
                    }
                    Err(e) => {
                        warn!(
                            "Failed to hot-reload config: {}. Keeping previous config.",
                            e
                        );
                    }
                }
            }
        });

        info!("Configuration hot-reload watcher started");
        Ok(())
    }

    /// Stop watching for configuration changes
    pub fn stop_watching(&self) {
        *self.watcher.write() = None;
        info!("Configuration hot-reload watcher stopped");
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            config_path: self.config_path.clone(),
            watcher: RwLock::new(None), // Watcher is not cloned
        }
    }
}
