use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ============= API Request/Response Types =============

/// Body of `POST /api/query`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity_hint: Option<QueryComplexity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_agents: Vec<AgentKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_external_search: Option<bool>,
    /// When false the server collects the stream and answers with a single JSON body.
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

/// Collected (non-streaming) answer to a query.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryResponse {
    /// The terminal event of the query.
    #[serde(flatten)]
    pub outcome: StreamEvent,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AgentInfo {
    pub name: AgentKind,
    pub source_type: SourceType,
    pub specialty_terms: Vec<String>,
}

// ============= Query Types =============

/// A validated research query. Shared read-only between the planner,
/// orchestrator and streamer once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub text: String,
    pub session_id: String,
    pub document_ids: Vec<String>,
    pub complexity_hint: Option<QueryComplexity>,
    pub preferred_agents: Vec<AgentKind>,
    pub external_search: bool,
}

impl Query {
    /// Creates a query from raw text, collapsing runs of whitespace.
    pub fn new(text: impl AsRef<str>) -> Self {
        Self {
            text: normalize_whitespace(text.as_ref()),
            session_id: uuid::Uuid::new_v4().to_string(),
            document_ids: Vec::new(),
            complexity_hint: None,
            preferred_agents: Vec::new(),
            external_search: true,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_documents(mut self, document_ids: Vec<String>) -> Self {
        self.document_ids = document_ids;
        self
    }

    pub fn with_complexity_hint(mut self, hint: QueryComplexity) -> Self {
        self.complexity_hint = Some(hint);
        self
    }

    pub fn with_preferred_agents(mut self, agents: Vec<AgentKind>) -> Self {
        self.preferred_agents = agents;
        self
    }

    pub fn with_external_search(mut self, enabled: bool) -> Self {
        self.external_search = enabled;
        self
    }

    /// Builds a query from an API request and checks its length.
    pub fn from_request(request: QueryRequest, max_length: usize) -> Result<Self> {
        let mut query = Query::new(&request.query);
        if let Some(session_id) = request.session_id {
            query.session_id = session_id;
        }
        query.document_ids = request.document_ids;
        query.complexity_hint = request.complexity_hint;
        query.preferred_agents = request.preferred_agents;
        query.external_search = request.enable_external_search.unwrap_or(true);
        query.validate(max_length)?;
        Ok(query)
    }

    pub fn validate(&self, max_length: usize) -> Result<()> {
        if self.text.is_empty() {
            return Err(AppError::InvalidInput("Query cannot be empty".to_string()));
        }
        let length = self.text.chars().count();
        if length > max_length {
            return Err(AppError::InvalidInput(format!(
                "Query is {} characters, maximum is {}",
                length, max_length
            )));
        }
        Ok(())
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum QueryComplexity {
    Simple,
    Moderate,
    Complex,
    Expert,
}

impl QueryComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryComplexity::Simple => "simple",
            QueryComplexity::Moderate => "moderate",
            QueryComplexity::Complex => "complex",
            QueryComplexity::Expert => "expert",
        }
    }
}

impl fmt::Display for QueryComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryComplexity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(QueryComplexity::Simple),
            "moderate" => Ok(QueryComplexity::Moderate),
            "complex" => Ok(QueryComplexity::Complex),
            "expert" => Ok(QueryComplexity::Expert),
            other => Err(AppError::InvalidInput(format!(
                "Unknown complexity '{}'",
                other
            ))),
        }
    }
}

// ============= Agent Types =============

/// Category of knowledge an evidence item comes from. Declaration order is
/// the tie-break order used when ranking.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Regulation,
    CaseLaw,
    Precedent,
    Expert,
    External,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Regulation => "regulation",
            SourceType::CaseLaw => "case_law",
            SourceType::Precedent => "precedent",
            SourceType::Expert => "expert",
            SourceType::External => "external",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a retrieval agent. Declaration order is the "original agent
/// order" used for deterministic tie-breaking.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Regulation,
    CaseLaw,
    Precedent,
    Expert,
    WebSearch,
    /// Web search restricted to irs.gov: forms, publications, rates and deadlines.
    IrsGuidance,
}

impl AgentKind {
    pub const ALL: [AgentKind; 6] = [
        AgentKind::Regulation,
        AgentKind::CaseLaw,
        AgentKind::Precedent,
        AgentKind::Expert,
        AgentKind::WebSearch,
        AgentKind::IrsGuidance,
    ];

    /// Whether this agent searches outside the loaded corpus.
    pub fn is_external(&self) -> bool {
        matches!(self, AgentKind::WebSearch | AgentKind::IrsGuidance)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Regulation => "regulation",
            AgentKind::CaseLaw => "case_law",
            AgentKind::Precedent => "precedent",
            AgentKind::Expert => "expert",
            AgentKind::WebSearch => "web_search",
            AgentKind::IrsGuidance => "irs_guidance",
        }
    }

    /// Source type assigned to hits that do not declare their own.
    pub fn source_type(&self) -> SourceType {
        match self {
            AgentKind::Regulation => SourceType::Regulation,
            AgentKind::CaseLaw => SourceType::CaseLaw,
            AgentKind::Precedent => SourceType::Precedent,
            AgentKind::Expert => SourceType::Expert,
            AgentKind::WebSearch | AgentKind::IrsGuidance => SourceType::External,
        }
    }

    /// Domain vocabulary appended to a query when reformulating it for this agent.
    pub fn specialty_terms(&self) -> &'static [&'static str] {
        match self {
            AgentKind::Regulation => &[
                "section",
                "code",
                "regulation",
                "IRC",
                "treasury regulation",
            ],
            AgentKind::CaseLaw => &[
                "revenue ruling",
                "case",
                "decision",
                "court",
                "PLR",
                "taxpayer",
            ],
            AgentKind::Precedent => &[
                "deal",
                "transaction",
                "merger",
                "acquisition",
                "election",
                "precedent",
            ],
            AgentKind::Expert => &[
                "analysis",
                "guidance",
                "interpretation",
                "technical advice",
                "commentary",
            ],
            AgentKind::WebSearch => &["IRS", "guidance", "update"],
            AgentKind::IrsGuidance => &["form", "instructions", "publication"],
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        AgentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .or(match normalized.as_str() {
                "caselaw" => Some(AgentKind::CaseLaw),
                "web" | "external" => Some(AgentKind::WebSearch),
                "irs" => Some(AgentKind::IrsGuidance),
                _ => None,
            })
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown agent '{}'", s)))
    }
}

/// Per-query constraints handed to every retrieval backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConstraints {
    /// Restrict retrieval to these documents when non-empty.
    pub document_ids: Vec<String>,
    /// Minimum per-backend score for a hit to count.
    pub relevance_floor: f32,
    /// Maximum hits requested from each backend and kept by the agent.
    pub limit: usize,
    /// Set on the re-query round.
    pub relaxed: bool,
}

impl Default for SearchConstraints {
    fn default() -> Self {
        Self {
            document_ids: Vec::new(),
            relevance_floor: 0.7,
            limit: 10,
            relaxed: false,
        }
    }
}

/// One unit of work for one agent. Never mutated after dispatch.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub agent: AgentKind,
    pub query: String,
    pub deadline: tokio::time::Instant,
    pub constraints: SearchConstraints,
}

impl AgentTask {
    /// Copy of this task for the re-query round: lower floor, wider window,
    /// fresh deadline.
    pub fn relaxed(
        &self,
        deadline: tokio::time::Instant,
        relevance_floor: f32,
        limit: usize,
    ) -> Self {
        Self {
            agent: self.agent,
            query: self.query.clone(),
            deadline,
            constraints: SearchConstraints {
                document_ids: self.constraints.document_ids.clone(),
                relevance_floor: relevance_floor.min(self.constraints.relevance_floor),
                limit: limit.max(self.constraints.limit),
                relaxed: true,
            },
        }
    }
}

// ============= Evidence Types =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Provenance {
    pub agent: AgentKind,
    pub retrieved_at: DateTime<Utc>,
    /// Citation reference, e.g. `IRC § 338(h)(10)` or `Rev. Rul. 2008-25`.
    pub citation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EvidenceItem {
    pub id: String,
    pub source_type: SourceType,
    pub title: String,
    pub content: String,
    /// Source-local relevance in [0, 1].
    pub score: f32,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Ok,
    Timeout,
    Error,
    Empty,
}

/// Everything one agent task produced.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub agent: AgentKind,
    pub items: Vec<Arc<EvidenceItem>>,
    pub confidence: f32,
    pub status: AgentStatus,
    pub elapsed: Duration,
    pub diagnostic: Option<String>,
}

impl AgentResult {
    pub fn timed_out(agent: AgentKind, elapsed: Duration) -> Self {
        Self {
            agent,
            items: Vec::new(),
            confidence: 0.0,
            status: AgentStatus::Timeout,
            elapsed,
            diagnostic: Some(format!("{} exceeded its deadline", agent)),
        }
    }

    pub fn failed(agent: AgentKind, diagnostic: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            agent,
            items: Vec::new(),
            confidence: 0.0,
            status: AgentStatus::Error,
            elapsed,
            diagnostic: Some(diagnostic.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == AgentStatus::Ok
    }
}

/// Summary of one agent's contribution, kept on the fused context for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AgentOutcome {
    pub agent: AgentKind,
    pub status: AgentStatus,
    pub confidence: f32,
    pub items: usize,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl From<&AgentResult> for AgentOutcome {
    fn from(result: &AgentResult) -> Self {
        Self {
            agent: result.agent,
            status: result.status,
            confidence: result.confidence,
            items: result.items.len(),
            elapsed_ms: result.elapsed.as_millis() as u64,
            diagnostic: result.diagnostic.clone(),
        }
    }
}

// ============= Fusion Types =============

/// An evidence item after deduplication, with every agent that returned it.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEvidence {
    pub item: Arc<EvidenceItem>,
    /// Origin agent first, then any agents whose duplicates were merged into it.
    pub contributors: Vec<AgentKind>,
    pub rank_score: f32,
}

/// Two ranked items that reach opposite conclusions about the same provision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Conflict {
    pub first: String,
    pub second: String,
    /// The shared statutory provision or case both items address.
    pub topic: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusedContext {
    pub evidence: Vec<RankedEvidence>,
    pub aggregate_confidence: f32,
    pub conflicts: Vec<Conflict>,
    pub evidence_count: usize,
    pub agents: Vec<AgentOutcome>,
}

impl FusedContext {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

// ============= Synthesis Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisStrategy {
    Simple,
    Moderate,
    Complex,
    Expert,
    Fallback,
}

impl SynthesisStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SynthesisStrategy::Simple => "simple",
            SynthesisStrategy::Moderate => "moderate",
            SynthesisStrategy::Complex => "complex",
            SynthesisStrategy::Expert => "expert",
            SynthesisStrategy::Fallback => "fallback",
        }
    }
}

impl From<QueryComplexity> for SynthesisStrategy {
    fn from(complexity: QueryComplexity) -> Self {
        match complexity {
            QueryComplexity::Simple => SynthesisStrategy::Simple,
            QueryComplexity::Moderate => SynthesisStrategy::Moderate,
            QueryComplexity::Complex => SynthesisStrategy::Complex,
            QueryComplexity::Expert => SynthesisStrategy::Expert,
        }
    }
}

impl fmt::Display for SynthesisStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Citation {
    /// Title of the cited document.
    pub source: String,
    /// Citation reference of the cited document.
    pub reference: String,
    pub source_type: SourceType,
    pub evidence_id: String,
}

/// Events delivered to the caller. Every query ends with exactly one
/// `Final` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Delta {
        text: String,
    },
    Final {
        answer: String,
        citations: Vec<Citation>,
        strategy: SynthesisStrategy,
        confidence: f32,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Delta { .. })
    }

    /// SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Delta { .. } => "delta",
            StreamEvent::Final { .. } => "final",
            StreamEvent::Error { .. } => "error",
        }
    }
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("LLM error: {0}")]
    LLM(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::Configuration(msg) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::LLM(msg) => (axum::http::StatusCode::BAD_GATEWAY, msg),
            AppError::Retrieval(msg) => (axum::http::StatusCode::BAD_GATEWAY, msg),
            AppError::Timeout(msg) => (axum::http::StatusCode::GATEWAY_TIMEOUT, msg),
            AppError::NotFound(msg) => (axum::http::StatusCode::NOT_FOUND, msg),
            AppError::InvalidInput(msg) => (axum::http::StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
