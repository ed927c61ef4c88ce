//! End-to-end orchestration scenarios: gating, bounded re-query, timeouts
//! and the single terminal event.

mod common;

use common::mocks::{MockLLMClient, Script, ScriptedAgent};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use taxrag::orchestrator::{GateDecision, Orchestrator};
use taxrag::research::ResearchCoordinator;
use taxrag::types::{
    AgentKind, AgentStatus, AgentTask, Query, QueryComplexity, SearchConstraints, StreamEvent,
    SynthesisStrategy,
};
use taxrag::utils::metrics::MetricsCollector;
use taxrag::utils::toml_config::PipelineConfig;
use tokio::time::Instant;

const SPECIALISTS: [AgentKind; 4] = [
    AgentKind::Regulation,
    AgentKind::CaseLaw,
    AgentKind::Precedent,
    AgentKind::Expert,
];

fn tasks(agents: &[AgentKind], deadline: Instant) -> Vec<AgentTask> {
    agents
        .iter()
        .map(|agent| AgentTask {
            agent: *agent,
            query: "section 338(h)(10) election".to_string(),
            deadline,
            constraints: SearchConstraints::default(),
        })
        .collect()
}

fn terminal_count(events: &[StreamEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

const EXPERT_ANSWER: &str = r#"{"executive_summary": "The election treats the stock sale as an asset sale [1].",
"strategic_options": ["Make the election [2]", "Keep carryover basis"],
"expert_opinion": "Worth pursuing where the seller is an S corporation [1]."}"#;

#[tokio::test]
async fn test_expert_query_accepted_in_one_round() {
    let agents: Vec<_> = [7, 6, 6, 6]
        .into_iter()
        .zip(SPECIALISTS)
        .map(|(items, kind)| ScriptedAgent::always(kind, Script::Ok { items, confidence: 0.82 }))
        .collect();
    let metrics = Arc::new(MetricsCollector::new());
    let llm = MockLLMClient::new(EXPERT_ANSWER);
    let coordinator = ResearchCoordinator::new(
        common::registry(&agents),
        Some(Arc::new(llm.clone())),
        common::pipeline(),
    )
    .with_metrics(Arc::clone(&metrics));

    let query = Query::new(
        "What are the tax implications of a Section 338(h)(10) election in an asset acquisition?",
    )
    .with_complexity_hint(QueryComplexity::Expert);
    let events: Vec<StreamEvent> = coordinator
        .handle_query(query, coordinator.default_deadline())
        .collect()
        .await;

    assert_eq!(terminal_count(&events), 1);
    match events.last() {
        Some(StreamEvent::Final {
            answer,
            citations,
            strategy,
            confidence,
        }) => {
            assert_eq!(*strategy, SynthesisStrategy::Expert);
            assert_eq!(answer, EXPERT_ANSWER);
            assert_eq!(citations.len(), 2);
            assert!((confidence - 0.82).abs() < 1e-6);
        }
        other => panic!("expected final event, got {:?}", other),
    }

    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Delta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, EXPERT_ANSWER);

    for agent in &agents {
        assert_eq!(agent.calls(), 1);
    }
    assert_eq!(llm.stream_calls(), 1);
    assert_eq!(metrics.snapshot().requery_rate, 0.0);
}

#[tokio::test]
async fn test_all_agents_empty_forces_fallback_after_two_rounds() {
    let agents: Vec<_> = SPECIALISTS
        .into_iter()
        .map(|kind| ScriptedAgent::always(kind, Script::Empty))
        .collect();
    let orchestrator = Orchestrator::new(common::registry(&agents), common::pipeline());

    let deadline = Instant::now() + Duration::from_secs(60);
    let outcome = orchestrator.run(tasks(&SPECIALISTS, deadline), deadline).await;

    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.decision, GateDecision::ForceAccept);
    assert!(outcome.forced());
    assert_eq!(outcome.context.evidence_count, 0);
    for agent in &agents {
        assert_eq!(agent.calls(), 2);
    }

    let coordinator = ResearchCoordinator::new(
        common::registry(&agents),
        Some(Arc::new(MockLLMClient::new("never streamed"))),
        common::pipeline(),
    );
    let events: Vec<StreamEvent> = coordinator
        .handle_query(
            Query::new("Compare the treatment of earnouts under 453 and 1001 for sellers")
                .with_complexity_hint(QueryComplexity::Complex),
            coordinator.default_deadline(),
        )
        .collect()
        .await;

    assert_eq!(terminal_count(&events), 1);
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Final {
            strategy: SynthesisStrategy::Fallback,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_agent_is_tolerated() {
    let agents = vec![
        ScriptedAgent::always(AgentKind::Regulation, Script::Ok { items: 4, confidence: 0.75 }),
        ScriptedAgent::always(AgentKind::CaseLaw, Script::Ok { items: 3, confidence: 0.75 }),
        ScriptedAgent::always(AgentKind::Precedent, Script::Ok { items: 3, confidence: 0.75 }),
        ScriptedAgent::always(AgentKind::Expert, Script::Sleep(Duration::from_secs(120))),
    ];
    let config = PipelineConfig {
        agent_timeout_secs: 5,
        ..common::pipeline()
    };

    let orchestrator = Orchestrator::new(common::registry(&agents), config.clone());
    let deadline = Instant::now() + Duration::from_secs(60);
    let outcome = orchestrator
        .run(tasks(&SPECIALISTS, Instant::now() + Duration::from_secs(5)), deadline)
        .await;

    assert_eq!(outcome.rounds, 1);
    assert_eq!(outcome.decision, GateDecision::Accept);
    assert_eq!(outcome.context.evidence_count, 10);
    assert!((outcome.context.aggregate_confidence - 0.75).abs() < 1e-6);
    let expert = outcome
        .context
        .agents
        .iter()
        .find(|a| a.agent == AgentKind::Expert)
        .unwrap();
    assert_eq!(expert.status, AgentStatus::Timeout);

    let coordinator = ResearchCoordinator::new(
        common::registry(&agents),
        Some(Arc::new(MockLLMClient::new("Boot is recognized [1] and [10]."))),
        config,
    );
    let events: Vec<StreamEvent> = coordinator
        .handle_query(
            Query::new("How is boot taxed in a reorganization?")
                .with_complexity_hint(QueryComplexity::Moderate),
            coordinator.default_deadline(),
        )
        .collect()
        .await;

    assert_eq!(terminal_count(&events), 1);
    match events.last() {
        Some(StreamEvent::Final {
            strategy, citations, ..
        }) => {
            assert_eq!(*strategy, SynthesisStrategy::Moderate);
            assert_eq!(citations.len(), 2);
            assert!(citations
                .iter()
                .all(|c| !c.evidence_id.starts_with("expert")));
        }
        other => panic!("expected final event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_requery_targets_weak_agents_with_relaxed_constraints() {
    let strong = ScriptedAgent::always(AgentKind::Regulation, Script::Ok { items: 1, confidence: 0.9 });
    let weak = ScriptedAgent::always(AgentKind::CaseLaw, Script::Ok { items: 1, confidence: 0.2 });
    let agents = vec![strong.clone(), weak.clone()];
    let orchestrator = Orchestrator::new(common::registry(&agents), common::pipeline());

    let deadline = Instant::now() + Duration::from_secs(60);
    let outcome = orchestrator
        .run(
            tasks(&[AgentKind::Regulation, AgentKind::CaseLaw], deadline),
            deadline,
        )
        .await;

    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.decision, GateDecision::ForceAccept);
    assert_eq!(strong.calls(), 1);
    assert_eq!(weak.calls(), 2);

    let retry = &weak.tasks()[1];
    let config = PipelineConfig::default();
    assert!(retry.constraints.relaxed);
    assert_eq!(retry.constraints.relevance_floor, config.relaxed_relevance_floor);
    assert_eq!(retry.constraints.limit, config.relaxed_top_k);
    assert!(retry.deadline <= deadline);
}

#[tokio::test]
async fn test_second_round_recovers() {
    let agents: Vec<_> = SPECIALISTS
        .into_iter()
        .map(|kind| {
            ScriptedAgent::new(
                kind,
                vec![Script::Empty, Script::Ok { items: 2, confidence: 0.8 }],
            )
        })
        .collect();
    let orchestrator = Orchestrator::new(common::registry(&agents), common::pipeline());

    let deadline = Instant::now() + Duration::from_secs(60);
    let outcome = orchestrator.run(tasks(&SPECIALISTS, deadline), deadline).await;

    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.decision, GateDecision::Accept);
    assert!(!outcome.forced());
    assert_eq!(outcome.context.evidence_count, 8);
}

#[tokio::test(start_paused = true)]
async fn test_overall_deadline_cancels_agents_and_forces_acceptance() {
    let agents: Vec<_> = SPECIALISTS
        .into_iter()
        .map(|kind| ScriptedAgent::always(kind, Script::Sleep(Duration::from_secs(600))))
        .collect();
    let orchestrator = Orchestrator::new(common::registry(&agents), common::pipeline());

    let started = Instant::now();
    let deadline = started + Duration::from_secs(2);
    let outcome = orchestrator
        .run(tasks(&SPECIALISTS, started + Duration::from_secs(30)), deadline)
        .await;

    assert!(Instant::now() - started <= Duration::from_secs(3));
    assert_eq!(outcome.rounds, 1);
    assert_eq!(outcome.decision, GateDecision::ForceAccept);
    assert!(outcome
        .context
        .agents
        .iter()
        .all(|a| a.status == AgentStatus::Timeout));
    for agent in &agents {
        assert_eq!(agent.calls(), 1);
    }
}

#[tokio::test]
async fn test_failures_are_contained() {
    let agents = vec![
        ScriptedAgent::always(AgentKind::Regulation, Script::Ok { items: 3, confidence: 0.9 }),
        ScriptedAgent::always(AgentKind::CaseLaw, Script::Error("index offline")),
    ];
    let orchestrator = Orchestrator::new(common::registry(&agents), common::pipeline());

    let deadline = Instant::now() + Duration::from_secs(60);
    let outcome = orchestrator
        .run(
            tasks(
                &[AgentKind::Regulation, AgentKind::CaseLaw, AgentKind::WebSearch],
                deadline,
            ),
            deadline,
        )
        .await;

    let statuses: Vec<(AgentKind, AgentStatus)> = outcome
        .context
        .agents
        .iter()
        .map(|a| (a.agent, a.status))
        .collect();
    assert!(statuses.contains(&(AgentKind::Regulation, AgentStatus::Ok)));
    assert!(statuses.contains(&(AgentKind::CaseLaw, AgentStatus::Error)));
    assert!(statuses.contains(&(AgentKind::WebSearch, AgentStatus::Error)));
    assert_eq!(outcome.context.evidence_count, 3);
}

#[tokio::test]
async fn test_generation_outage_mid_stream_yields_single_error() {
    let agents = vec![ScriptedAgent::always(
        AgentKind::Regulation,
        Script::Ok { items: 4, confidence: 0.9 },
    )];
    let llm = MockLLMClient::new("The deemed asset sale results in gain recognition.")
        .with_behavior(common::mocks::Behavior::FailsAfter(2));
    let coordinator =
        ResearchCoordinator::new(common::registry(&agents), Some(Arc::new(llm)), common::pipeline());

    let events: Vec<StreamEvent> = coordinator
        .handle_query(
            Query::new("What is a deemed asset sale?").with_complexity_hint(QueryComplexity::Simple),
            coordinator.default_deadline(),
        )
        .collect()
        .await;

    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], StreamEvent::Delta { .. }));
    assert!(matches!(events[2], StreamEvent::Error { .. }));
    assert_eq!(terminal_count(&events), 1);
}
