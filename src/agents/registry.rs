//! Agent Registry
//!
//! Lookup table from [`AgentKind`] to the agent implementing it. The
//! orchestrator dispatches through this table only.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{HybridWeights, RetrievalAgent, SpecialistAgent};
use crate::retrieval::{
    Corpus, GraphBackend, LexicalBackend, VectorBackend, WebSearchBackend, IRS_SITE,
};
use crate::types::{AgentKind, AppError, Result};
use crate::utils::toml_config::{CorpusConfig, PipelineConfig};

#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentKind, Arc<dyn RetrievalAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard agent set over a shared corpus: hybrid regulation, case law,
    /// precedent and expert agents (case law and precedent also follow the
    /// citation graph), plus the web and irs.gov agents when enabled.
    pub fn standard(corpus: Arc<Corpus>, pipeline: &PipelineConfig, sources: &CorpusConfig) -> Self {
        let weights = HybridWeights {
            semantic: pipeline.semantic_weight,
            lexical: pipeline.lexical_weight,
        };

        let mut registry = Self::new();
        for kind in [
            AgentKind::Regulation,
            AgentKind::CaseLaw,
            AgentKind::Precedent,
            AgentKind::Expert,
        ] {
            let source = Some(kind.source_type());
            let mut agent = SpecialistAgent::new(kind)
                .with_weights(weights)
                .with_saturation(pipeline.confidence_saturation)
                .with_backend(Arc::new(VectorBackend::new(Arc::clone(&corpus), source)))
                .with_backend(Arc::new(LexicalBackend::new(Arc::clone(&corpus), source)));
            if matches!(kind, AgentKind::CaseLaw | AgentKind::Precedent) {
                agent = agent.with_backend(Arc::new(GraphBackend::new(Arc::clone(&corpus), source)));
            }
            registry.register(Arc::new(agent));
        }

        if sources.web_search {
            registry.register(Arc::new(
                SpecialistAgent::new(AgentKind::WebSearch)
                    .with_saturation(pipeline.confidence_saturation)
                    .with_backend(Arc::new(WebSearchBackend::new(sources.web_results))),
            ));

            if sources.irs_search {
                registry.register(Arc::new(
                    SpecialistAgent::new(AgentKind::IrsGuidance)
                        .with_saturation(pipeline.confidence_saturation)
                        .with_backend(Arc::new(
                            WebSearchBackend::new(sources.web_results).scoped_to(IRS_SITE),
                        )),
                ));
            }
        }

        registry
    }

    /// Register an agent, replacing any agent of the same kind.
    pub fn register(&mut self, agent: Arc<dyn RetrievalAgent>) {
        self.agents.insert(agent.kind(), agent);
    }

    pub fn with_agent(mut self, agent: Arc<dyn RetrievalAgent>) -> Self {
        self.register(agent);
        self
    }

    pub fn get(&self, kind: AgentKind) -> Result<Arc<dyn RetrievalAgent>> {
        self.agents
            .get(&kind)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Agent '{}' is not registered", kind)))
    }

    pub fn contains(&self, kind: AgentKind) -> bool {
        self.agents.contains_key(&kind)
    }

    /// Registered kinds in agent order.
    pub fn kinds(&self) -> Vec<AgentKind> {
        self.agents.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
