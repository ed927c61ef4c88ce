//! Query planning: complexity classification, agent selection and
//! per-agent query refinement.

pub mod entities;

use std::sync::Arc;

use futures::future::join_all;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::agents::{AgentRegistry, RetrievalAgent};
use crate::llm::LLMClient;
use crate::retrieval::tokenize;
use crate::types::{AgentKind, AgentTask, AppError, Query, QueryComplexity, Result, SearchConstraints};
use crate::utils::toml_config::PipelineConfig;

pub use entities::{extract_entities, extract_references, Reference};

const CONJUNCTIONS: &[&str] = &[
    " and ",
    " or ",
    " as well as ",
    " also ",
    " additionally ",
    " whereas ",
    "; ",
];

const COMPARISON_TERMS: &[&str] = &[
    "compare",
    "comparison",
    "versus",
    " vs ",
    " vs.",
    "difference",
    "differ",
    "contrast",
    "rather than",
    "instead of",
    "alternative",
];

const TEMPORAL_TERMS: &[&str] = &[
    "before",
    "after",
    "prior to",
    "since",
    "until",
    "timeline",
    "deadline",
    "retroactive",
    "transition",
    "effective date",
    "when",
];

const CURRENCY_TERMS: &[&str] = &[
    "current", "recent", "latest", "new ", "newly", "updated", "this year", "today", "2024",
    "2025", "2026",
];

/// Words asking for what the IRS publishes directly.
const IRS_TERMS: &[&str] = &[
    "rate",
    "rates",
    "deadline",
    "deadlines",
    "form",
    "forms",
    "publication",
    "pub",
    "filing",
    "extension",
    "instructions",
];

/// Lightweight features of a raw query driving its complexity tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFeatures {
    pub words: usize,
    pub conjunctions: usize,
    pub questions: usize,
    pub references: usize,
    pub comparison: bool,
    pub temporal: bool,
}

impl QueryFeatures {
    pub fn of(text: &str) -> Self {
        let padded = format!(" {} ", text.to_lowercase());
        let count = |terms: &[&str]| terms.iter().map(|t| padded.matches(t).count()).sum();
        let contains = |terms: &[&str]| terms.iter().any(|t| padded.contains(t));

        Self {
            words: text.split_whitespace().count(),
            conjunctions: count(CONJUNCTIONS),
            questions: text.matches('?').count(),
            references: extract_references(text).len(),
            comparison: contains(COMPARISON_TERMS),
            temporal: contains(TEMPORAL_TERMS),
        }
    }

    /// Points on a 0..=8 scale; higher is harder.
    pub fn points(&self) -> u32 {
        let length = match self.words {
            0..=20 => 0,
            21..=40 => 1,
            _ => 2,
        };
        let parts = self.conjunctions + self.questions.saturating_sub(1);
        let multi_part = match parts {
            0..=1 => 0,
            2..=3 => 1,
            _ => 2,
        };
        let references = match self.references {
            0 => 0,
            1 => 1,
            2..=3 => 2,
            _ => 3,
        };
        length + multi_part + references + u32::from(self.comparison) + u32::from(self.temporal)
    }
}

/// Pure, deterministic complexity classification of a raw query.
pub fn classify_complexity(text: &str) -> QueryComplexity {
    match QueryFeatures::of(text).points() {
        0..=1 => QueryComplexity::Simple,
        2..=3 => QueryComplexity::Moderate,
        4..=5 => QueryComplexity::Complex,
        _ => QueryComplexity::Expert,
    }
}

/// Whether the query asks about current or recent developments.
pub fn wants_current_information(text: &str) -> bool {
    let padded = format!(" {} ", text.to_lowercase());
    CURRENCY_TERMS.iter().any(|t| padded.contains(t))
}

/// Whether the query asks for rates, deadlines, forms or publications.
pub fn wants_irs_guidance(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("due date")
        || tokenize(&lowered)
            .iter()
            .any(|word| IRS_TERMS.contains(&word.as_str()))
}

/// How strongly a query matches an agent's specialty.
fn specialty_matches(kind: AgentKind, text: &str, references: &[Reference]) -> usize {
    let lowered = text.to_lowercase();
    let vocabulary = kind
        .specialty_terms()
        .iter()
        .filter(|term| lowered.contains(&term.to_lowercase()))
        .count();
    let authorities = references
        .iter()
        .filter(|r| match kind {
            AgentKind::Regulation => matches!(r, Reference::Section(_)),
            AgentKind::CaseLaw => matches!(
                r,
                Reference::Case(_) | Reference::RevenueRuling(_) | Reference::PrivateLetterRuling(_)
            ),
            AgentKind::Expert => matches!(r, Reference::RevenueProcedure(_)),
            _ => false,
        })
        .count();
    vocabulary + authorities
}

/// Output of planning one query.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub complexity: QueryComplexity,
    pub entities: Vec<String>,
    pub tasks: Vec<AgentTask>,
}

impl QueryPlan {
    pub fn agents(&self) -> Vec<AgentKind> {
        self.tasks.iter().map(|t| t.agent).collect()
    }
}

pub struct QueryPlanner {
    registry: Arc<AgentRegistry>,
    llm: Option<Arc<dyn LLMClient>>,
    config: PipelineConfig,
}

impl QueryPlanner {
    pub fn new(
        registry: Arc<AgentRegistry>,
        llm: Option<Arc<dyn LLMClient>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            llm,
            config,
        }
    }

    /// Agents to dispatch, in agent order.
    pub fn select_agents(&self, query: &Query, complexity: QueryComplexity) -> Vec<AgentKind> {
        let registered = self.registry.kinds();
        let preferred: Vec<AgentKind> = registered
            .iter()
            .copied()
            .filter(|k| query.preferred_agents.contains(k))
            .collect();
        let explicit = !preferred.is_empty();
        let pool = if explicit { preferred } else { registered };

        let current = wants_current_information(&query.text);
        let guidance = wants_irs_guidance(&query.text);
        let web = query.external_search
            && pool.contains(&AgentKind::WebSearch)
            && (explicit || current || complexity >= QueryComplexity::Complex);
        let irs = query.external_search
            && pool.contains(&AgentKind::IrsGuidance)
            && (explicit || guidance);
        let mut specialists: Vec<AgentKind> = pool
            .iter()
            .copied()
            .filter(|k| !k.is_external())
            .collect();

        if complexity == QueryComplexity::Simple && !explicit {
            let external: Vec<AgentKind> = [
                (web && current, AgentKind::WebSearch),
                (irs, AgentKind::IrsGuidance),
            ]
            .into_iter()
            .filter_map(|(wanted, kind)| wanted.then_some(kind))
            .collect();
            if !external.is_empty() {
                return external;
            }
            let references = extract_references(&query.text);
            // Ties keep agent order; the regulation agent wins when nothing matches.
            let best = specialists
                .iter()
                .copied()
                .max_by(|a, b| {
                    specialty_matches(*a, &query.text, &references)
                        .cmp(&specialty_matches(*b, &query.text, &references))
                        .then_with(|| b.cmp(a))
                });
            return match best {
                Some(kind) => vec![kind],
                None if web => vec![AgentKind::WebSearch],
                None => Vec::new(),
            };
        }

        if web {
            specialists.push(AgentKind::WebSearch);
        }
        if irs {
            specialists.push(AgentKind::IrsGuidance);
        }
        specialists
    }

    /// Classify, select and refine. Never fails: refinement problems fall
    /// back to the raw query.
    #[instrument(skip(self, query), fields(session = %query.session_id))]
    pub async fn plan(&self, query: &Query, overall_deadline: Instant) -> QueryPlan {
        let complexity = query
            .complexity_hint
            .unwrap_or_else(|| classify_complexity(&query.text));
        let entities = extract_entities(&query.text);
        let agents = self.select_agents(query, complexity);

        let task_deadline = (Instant::now() + self.config.agent_timeout()).min(overall_deadline);
        let (relevance_floor, limit) = self.config.retrieval_window(false);
        let constraints = SearchConstraints {
            document_ids: query.document_ids.clone(),
            relevance_floor,
            limit,
            relaxed: false,
        };

        let refinements = agents.iter().map(|kind| {
            let kind = *kind;
            let entities = &entities;
            async move {
                let refined = match self.registry.get(kind) {
                    Ok(agent) => self.refine(agent.as_ref(), query, entities, overall_deadline).await,
                    Err(_) => query.text.clone(),
                };
                (kind, refined)
            }
        });

        let tasks: Vec<AgentTask> = join_all(refinements)
            .await
            .into_iter()
            .map(|(agent, refined)| AgentTask {
                agent,
                query: refined,
                deadline: task_deadline,
                constraints: constraints.clone(),
            })
            .collect();

        info!(
            %complexity,
            agents = ?tasks.iter().map(|t| t.agent).collect::<Vec<_>>(),
            entities = entities.len(),
            "Query planned"
        );

        QueryPlan {
            complexity,
            entities,
            tasks,
        }
    }

    async fn refine(
        &self,
        agent: &dyn RetrievalAgent,
        query: &Query,
        entities: &[String],
        overall_deadline: Instant,
    ) -> String {
        let Some(llm) = self.llm.as_ref().filter(|_| self.config.llm_refinement) else {
            return agent.reformulate(&query.text, entities);
        };

        let deadline = (Instant::now() + self.config.refinement_timeout()).min(overall_deadline);
        let outcome = timeout_at(deadline, self.llm_refine(llm.as_ref(), agent, query, entities))
            .await
            .unwrap_or_else(|_| Err(AppError::Timeout("query refinement".to_string())));

        match outcome {
            Ok(refined) => {
                debug!(agent = %agent.kind(), %refined, "Refined query");
                refined
            }
            Err(e) => {
                warn!(agent = %agent.kind(), "Query refinement failed, using raw query: {}", e);
                query.text.clone()
            }
        }
    }

    async fn llm_refine(
        &self,
        llm: &dyn LLMClient,
        agent: &dyn RetrievalAgent,
        query: &Query,
        entities: &[String],
    ) -> Result<String> {
        let kind = agent.kind();
        let system = format!(
            "You rewrite tax research questions into search queries for a {} index. \
             Keep every statutory reference. Reply with the search query only, on one line.",
            kind.source_type()
        );
        let prompt = format!(
            "Question: {}\nReferences: {}\nUseful vocabulary: {}",
            query.text,
            if entities.is_empty() {
                "none".to_string()
            } else {
                entities.join(", ")
            },
            kind.specialty_terms().join(", ")
        );

        let response = llm.generate_with_system(&system, &prompt).await?;
        sanitize_refinement(&response)
            .ok_or_else(|| AppError::LLM("empty refinement".to_string()))
    }
}

/// First non-empty line, unquoted, bounded in length.
fn sanitize_refinement(response: &str) -> Option<String> {
    let line = response
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())?
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    if line.is_empty() {
        return None;
    }
    Some(line.chars().take(500).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TokenStream;
    use crate::retrieval::BackendKind;
    use crate::types::AgentResult;
    use async_trait::async_trait;
    use rstest::rstest;
    use std::time::Duration;

    struct StubAgent(AgentKind);

    #[async_trait]
    impl RetrievalAgent for StubAgent {
        fn kind(&self) -> AgentKind {
            self.0
        }

        fn capabilities(&self) -> Vec<BackendKind> {
            vec![BackendKind::Lexical]
        }

        async fn retrieve(&self, _task: &AgentTask) -> AgentResult {
            AgentResult::failed(self.0, "stub", Duration::ZERO)
        }
    }

    struct StubLlm {
        reply: Option<&'static str>,
    }

    #[async_trait]
    impl LLMClient for StubLlm {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.generate_with_system("", prompt).await
        }

        async fn generate_with_system(&self, _system: &str, _prompt: &str) -> Result<String> {
            self.reply
                .map(str::to_string)
                .ok_or_else(|| AppError::LLM("offline".to_string()))
        }

        async fn stream_with_system(&self, _: &str, _: &str) -> Result<TokenStream> {
            Err(AppError::LLM("offline".to_string()))
        }

        async fn is_available(&self) -> bool {
            self.reply.is_some()
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    fn registry() -> Arc<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        for kind in AgentKind::ALL {
            registry.register(Arc::new(StubAgent(kind)));
        }
        Arc::new(registry)
    }

    fn planner(llm: Option<Arc<dyn LLMClient>>) -> QueryPlanner {
        QueryPlanner::new(registry(), llm, PipelineConfig::default())
    }

    #[rstest]
    #[case("What is basis?", QueryComplexity::Simple)]
    #[case("What is Section 1031?", QueryComplexity::Simple)]
    #[case(
        "How does Section 1031 compare with Section 1033 for real property?",
        QueryComplexity::Moderate
    )]
    #[case(
        "Compare Section 338(h)(10) with Section 336(e) for an S corporation target and explain the consequences after closing",
        QueryComplexity::Complex
    )]
    #[case(
        "Compare Section 338(h)(10), Section 336(e), Section 1001 and Rev. Rul. 2008-25 for a target sold after a restructuring, and explain how the deemed asset sale rules interact with state conformity and the transition rules that apply to consolidated groups",
        QueryComplexity::Expert
    )]
    fn test_classify_complexity(#[case] query: &str, #[case] expected: QueryComplexity) {
        assert_eq!(classify_complexity(query), expected);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let query = "Does Section 351 apply before or after the merger?";
        assert_eq!(classify_complexity(query), classify_complexity(query));
    }

    #[rstest]
    #[case("What is the latest standard mileage rate?", true)]
    #[case("Recent changes to Section 174 amortization", true)]
    #[case("Define adjusted basis", false)]
    fn test_wants_current_information(#[case] query: &str, #[case] expected: bool) {
        assert_eq!(wants_current_information(query), expected);
    }

    #[test]
    fn test_simple_query_selects_single_matching_agent() {
        let planner = planner(None);

        let case_query = Query::new("What did the court decide in Rev. Rul. 99-6?");
        assert_eq!(
            planner.select_agents(&case_query, QueryComplexity::Simple),
            vec![AgentKind::CaseLaw]
        );

        let plain = Query::new("Define adjusted basis");
        assert_eq!(
            planner.select_agents(&plain, QueryComplexity::Simple),
            vec![AgentKind::Regulation]
        );
    }

    #[test]
    fn test_simple_current_query_uses_web() {
        let query = Query::new("latest changes to bonus depreciation");
        assert_eq!(
            planner(None).select_agents(&query, QueryComplexity::Simple),
            vec![AgentKind::WebSearch]
        );

        let query = Query::new("latest standard mileage rate");
        assert_eq!(
            planner(None).select_agents(&query, QueryComplexity::Simple),
            vec![AgentKind::WebSearch, AgentKind::IrsGuidance]
        );
    }

    #[rstest]
    #[case("What is the due date for Form 1120-S?", true)]
    #[case("Instructions for Form 8832 entity classification", true)]
    #[case("Standard mileage rate for business use", true)]
    #[case("Can I get a filing extension?", true)]
    #[case("Information reporting for corporate reorganizations", false)]
    #[case("Does a 338(h)(10) election step up basis?", false)]
    fn test_wants_irs_guidance(#[case] query: &str, #[case] expected: bool) {
        assert_eq!(wants_irs_guidance(query), expected);
    }

    #[test]
    fn test_irs_guidance_for_forms_and_deadlines() {
        let planner = planner(None);

        let simple = Query::new("What is the due date for Form 1065?");
        assert_eq!(
            planner.select_agents(&simple, QueryComplexity::Simple),
            vec![AgentKind::IrsGuidance]
        );

        let moderate = Query::new("Which form reports a Section 338(h)(10) election?");
        assert_eq!(
            planner.select_agents(&moderate, QueryComplexity::Moderate),
            vec![
                AgentKind::Regulation,
                AgentKind::CaseLaw,
                AgentKind::Precedent,
                AgentKind::Expert,
                AgentKind::IrsGuidance
            ]
        );

        let offline = moderate.clone().with_external_search(false);
        assert!(!planner
            .select_agents(&offline, QueryComplexity::Moderate)
            .iter()
            .any(AgentKind::is_external));
    }

    #[test]
    fn test_full_set_for_harder_queries() {
        let planner = planner(None);
        let query = Query::new("Section 338(h)(10) election consequences");

        assert_eq!(
            planner.select_agents(&query, QueryComplexity::Moderate),
            vec![
                AgentKind::Regulation,
                AgentKind::CaseLaw,
                AgentKind::Precedent,
                AgentKind::Expert
            ]
        );
        assert_eq!(
            planner.select_agents(&query, QueryComplexity::Expert),
            vec![
                AgentKind::Regulation,
                AgentKind::CaseLaw,
                AgentKind::Precedent,
                AgentKind::Expert,
                AgentKind::WebSearch
            ]
        );

        let offline = query.clone().with_external_search(false);
        assert!(!planner
            .select_agents(&offline, QueryComplexity::Expert)
            .contains(&AgentKind::WebSearch));
    }

    #[test]
    fn test_preferred_agents_restrict_selection() {
        let query = Query::new("Section 1031 exchange")
            .with_preferred_agents(vec![AgentKind::Precedent, AgentKind::CaseLaw]);
        assert_eq!(
            planner(None).select_agents(&query, QueryComplexity::Simple),
            vec![AgentKind::CaseLaw, AgentKind::Precedent]
        );
    }

    #[tokio::test]
    async fn test_plan_without_llm_appends_vocabulary() {
        let query = Query::new("Section 338(h)(10) election").with_complexity_hint(QueryComplexity::Moderate);
        let deadline = Instant::now() + Duration::from_secs(60);
        let plan = planner(None).plan(&query, deadline).await;

        assert_eq!(plan.complexity, QueryComplexity::Moderate);
        assert_eq!(plan.entities, vec!["Section 338(h)(10)"]);
        assert_eq!(plan.tasks.len(), 4);
        let case_law = plan.tasks.iter().find(|t| t.agent == AgentKind::CaseLaw).unwrap();
        assert!(case_law.query.starts_with("Section 338(h)(10) election"));
        assert!(case_law.query.contains("revenue ruling"));
        assert!(plan.tasks.iter().all(|t| t.deadline <= deadline));
        assert!(plan.tasks.iter().all(|t| t.constraints.relevance_floor == 0.7));
    }

    #[tokio::test]
    async fn test_task_deadline_never_exceeds_overall() {
        let query = Query::new("What is Section 1031?");
        let deadline = Instant::now() + Duration::from_secs(2);
        let plan = planner(None).plan(&query, deadline).await;

        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].deadline, deadline);
    }

    #[tokio::test]
    async fn test_llm_refinement_is_used() {
        let llm: Arc<dyn LLMClient> = Arc::new(StubLlm {
            reply: Some("\"section 1031 like-kind exchange regulations\"\nextra"),
        });
        let query = Query::new("What is Section 1031?");
        let plan = planner(Some(llm))
            .plan(&query, Instant::now() + Duration::from_secs(60))
            .await;

        assert_eq!(plan.tasks[0].query, "section 1031 like-kind exchange regulations");
    }

    #[tokio::test]
    async fn test_failed_refinement_falls_back_to_raw_query() {
        let llm: Arc<dyn LLMClient> = Arc::new(StubLlm { reply: None });
        let query = Query::new("What is Section 1031?");
        let plan = planner(Some(llm))
            .plan(&query, Instant::now() + Duration::from_secs(60))
            .await;

        assert_eq!(plan.tasks[0].query, "What is Section 1031?");
    }

    #[test]
    fn test_sanitize_refinement() {
        assert_eq!(sanitize_refinement("\n  `query`  \n"), Some("query".to_string()));
        assert_eq!(sanitize_refinement("   \n"), None);
        assert_eq!(sanitize_refinement("\"\""), None);
    }
}
