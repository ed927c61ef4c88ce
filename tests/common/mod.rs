#![allow(dead_code)]

pub mod mocks;

use std::sync::Arc;
use taxrag::agents::{AgentRegistry, RetrievalAgent};
use taxrag::utils::toml_config::PipelineConfig;

/// Registry over the given agents.
pub fn registry(agents: &[Arc<mocks::ScriptedAgent>]) -> Arc<AgentRegistry> {
    let mut registry = AgentRegistry::new();
    for agent in agents {
        let agent: Arc<dyn RetrievalAgent> = agent.clone();
        registry.register(agent);
    }
    Arc::new(registry)
}

/// Default pipeline without LLM query refinement.
pub fn pipeline() -> PipelineConfig {
    PipelineConfig {
        llm_refinement: false,
        ..PipelineConfig::default()
    }
}
