use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{info, info_span, Instrument};

use crate::agents::AgentRegistry;
use crate::llm::LLMClient;
use crate::orchestrator::Orchestrator;
use crate::planner::QueryPlanner;
use crate::synthesis::{EventStream, SynthesisRequest, Synthesizer};
use crate::types::{Query, StreamEvent};
use crate::utils::metrics::{MetricsCollector, QueryRecord};
use crate::utils::toml_config::PipelineConfig;

/// Drives one query from raw text to a finished event stream.
///
/// Built from one configuration snapshot; cheap to clone and to rebuild
/// when the configuration changes.
#[derive(Clone)]
pub struct ResearchCoordinator {
    planner: Arc<QueryPlanner>,
    orchestrator: Arc<Orchestrator>,
    synthesizer: Synthesizer,
    config: PipelineConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ResearchCoordinator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        llm: Option<Arc<dyn LLMClient>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            planner: Arc::new(QueryPlanner::new(
                Arc::clone(&registry),
                llm.clone(),
                config.clone(),
            )),
            orchestrator: Arc::new(Orchestrator::new(registry, config.clone())),
            synthesizer: Synthesizer::new(llm, config.clone()),
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Deadline for a query starting now.
    pub fn default_deadline(&self) -> Instant {
        Instant::now() + self.config.overall_timeout()
    }

    /// Plans, retrieves, fuses and synthesizes `query`.
    ///
    /// Retrieval never runs past `overall_deadline`; synthesis then gets its
    /// own budget. The stream always ends with exactly one `final` or
    /// `error` event and yields nothing after it.
    pub fn handle_query(&self, query: Query, overall_deadline: Instant) -> EventStream {
        let planner = Arc::clone(&self.planner);
        let orchestrator = Arc::clone(&self.orchestrator);
        let synthesizer = self.synthesizer.clone();
        let synthesis_timeout = self.config.synthesis_timeout();
        let metrics = self.metrics.clone();
        let span = info_span!("query", session = %query.session_id);

        let events = stream! {
            let started = Instant::now();
            let plan = planner
                .plan(&query, overall_deadline)
                .instrument(span.clone())
                .await;
            let agents = plan.agents();
            let orchestration = orchestrator
                .run(plan.tasks, overall_deadline)
                .instrument(span.clone())
                .await;
            let rounds = orchestration.rounds;

            let request = SynthesisRequest {
                query: query.text.clone(),
                complexity: plan.complexity,
                forced: orchestration.forced(),
                context: orchestration.context,
            };
            let confidence = request.context.aggregate_confidence;
            let mut synthesis = synthesizer.stream(request, Instant::now() + synthesis_timeout);

            let mut terminal: Option<StreamEvent> = None;
            while let Some(event) = synthesis.next().await {
                if event.is_terminal() {
                    terminal = Some(event.clone());
                    yield event;
                    break;
                }
                yield event;
            }
            let terminal = match terminal {
                Some(event) => event,
                None => {
                    let event = StreamEvent::Error {
                        message: "Synthesis ended without an answer".to_string(),
                    };
                    yield event.clone();
                    event
                }
            };

            let strategy = match &terminal {
                StreamEvent::Final { strategy, .. } => Some(*strategy),
                _ => None,
            };
            info!(
                parent: &span,
                complexity = %plan.complexity,
                rounds,
                strategy = ?strategy,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Query finished"
            );
            if let Some(metrics) = &metrics {
                metrics.record(QueryRecord {
                    duration: started.elapsed(),
                    success: strategy.is_some(),
                    confidence,
                    strategy,
                    agents,
                    rounds,
                });
            }
        };

        Box::pin(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{RetrievalAgent, SpecialistAgent};
    use crate::retrieval::corpus::fixtures::tax_corpus;
    use crate::retrieval::{LexicalBackend, VectorBackend};
    use crate::types::{AgentKind, SynthesisStrategy};
    use std::time::Duration;

    fn registry() -> Arc<AgentRegistry> {
        let corpus = Arc::new(tax_corpus());
        let agent: Arc<dyn RetrievalAgent> = Arc::new(
            SpecialistAgent::new(AgentKind::Regulation)
                .with_backend(Arc::new(VectorBackend::new(Arc::clone(&corpus), None)))
                .with_backend(Arc::new(LexicalBackend::new(corpus, None))),
        );
        Arc::new(AgentRegistry::new().with_agent(agent))
    }

    #[tokio::test]
    async fn test_handle_query_ends_with_one_terminal_event() {
        let metrics = Arc::new(MetricsCollector::new());
        let coordinator = ResearchCoordinator::new(registry(), None, PipelineConfig::default())
            .with_metrics(Arc::clone(&metrics));

        let events: Vec<StreamEvent> = coordinator
            .handle_query(
                Query::new("section 338(h)(10) election"),
                Instant::now() + Duration::from_secs(10),
            )
            .collect()
            .await;

        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.last().is_some_and(StreamEvent::is_terminal));
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Final {
                strategy: SynthesisStrategy::Fallback,
                ..
            })
        ));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_queries, 1);
        assert_eq!(snapshot.agent_usage["regulation"], 1);
    }
}
