pub mod registry;
pub mod specialist;

use crate::retrieval::BackendKind;
use crate::types::{AgentKind, AgentResult, AgentTask};
use async_trait::async_trait;

// Re-export commonly used types
pub use registry::AgentRegistry;
pub use specialist::{HybridWeights, SpecialistAgent};

/// A retrieval agent specialised in one category of knowledge.
///
/// `retrieve` never fails: backend errors become `AgentStatus::Error` with a
/// diagnostic, so one agent cannot abort a query.
#[async_trait]
pub trait RetrievalAgent: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// Backend capabilities this agent composes.
    fn capabilities(&self) -> Vec<BackendKind>;

    /// Source-specific reformulation: the query plus this agent's domain vocabulary.
    fn reformulate(&self, query: &str, entities: &[String]) -> String {
        let mut refined = query.to_string();
        let lowered = query.to_lowercase();
        for entity in entities {
            if !lowered.contains(&entity.to_lowercase()) {
                refined.push(' ');
                refined.push_str(entity);
            }
        }
        for term in self.kind().specialty_terms() {
            if !lowered.contains(&term.to_lowercase()) {
                refined.push(' ');
                refined.push_str(term);
            }
        }
        refined
    }

    async fn retrieve(&self, task: &AgentTask) -> AgentResult;
}
