//! Fusion over several agents' results: determinism, shared evidence and
//! pluggable conflict detection.

mod common;

use common::mocks::evidence;
use std::sync::Arc;
use std::time::Duration;
use taxrag::fusion::{ConflictDetector, ContextFusion};
use taxrag::types::{AgentKind, AgentResult, AgentStatus, Conflict, RankedEvidence};

fn ok(agent: AgentKind, items: Vec<Arc<taxrag::types::EvidenceItem>>, confidence: f32) -> AgentResult {
    AgentResult {
        agent,
        items,
        confidence,
        status: AgentStatus::Ok,
        elapsed: Duration::from_millis(20),
        diagnostic: None,
    }
}

fn round() -> Vec<AgentResult> {
    let shared = evidence(AgentKind::Regulation, 0, 0.9);
    vec![
        ok(
            AgentKind::Regulation,
            vec![Arc::clone(&shared), evidence(AgentKind::Regulation, 1, 0.7)],
            0.8,
        ),
        ok(
            AgentKind::CaseLaw,
            vec![evidence(AgentKind::CaseLaw, 0, 0.85), evidence(AgentKind::CaseLaw, 1, 0.7)],
            0.7,
        ),
        ok(AgentKind::Expert, vec![shared, evidence(AgentKind::Expert, 2, 0.6)], 0.6),
        AgentResult::timed_out(AgentKind::Precedent, Duration::from_secs(30)),
    ]
}

fn permutations(items: Vec<AgentResult>) -> Vec<Vec<AgentResult>> {
    if items.len() <= 1 {
        return vec![items];
    }
    let mut all = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.clone();
        let head = rest.remove(i);
        for mut tail in permutations(rest) {
            tail.insert(0, head.clone());
            all.push(tail);
        }
    }
    all
}

#[test]
fn test_every_arrival_order_fuses_identically() {
    let fusion = ContextFusion::new(&common::pipeline());
    let expected = fusion.fuse(&round());

    let orders = permutations(round());
    assert_eq!(orders.len(), 24);
    for order in orders {
        assert_eq!(fusion.fuse(&order), expected);
    }
}

#[test]
fn test_evidence_shared_between_agents_is_kept_once() {
    let context = ContextFusion::new(&common::pipeline()).fuse(&round());

    assert_eq!(context.evidence_count, 5);
    let shared = context
        .evidence
        .iter()
        .find(|e| e.item.id == "regulation-0")
        .unwrap();
    assert_eq!(shared.contributors, vec![AgentKind::Regulation, AgentKind::Expert]);
    assert_eq!(context.evidence[0].item.id, "regulation-0");

    // Precedent timed out and does not count toward confidence.
    assert!((context.aggregate_confidence - 0.7).abs() < 1e-6);
    assert_eq!(context.agents.len(), 4);
}

struct FirstTwoConflict;

impl ConflictDetector for FirstTwoConflict {
    fn detect(&self, evidence: &[RankedEvidence]) -> Vec<Conflict> {
        match evidence {
            [first, second, ..] => vec![Conflict {
                first: first.item.id.clone(),
                second: second.item.id.clone(),
                topic: "Section 1001".to_string(),
            }],
            _ => Vec::new(),
        }
    }
}

#[test]
fn test_custom_detector_conflicts_discount_confidence() {
    let pipeline = common::pipeline();
    let context = ContextFusion::new(&pipeline)
        .with_detector(Arc::new(FirstTwoConflict))
        .fuse(&round());

    assert_eq!(context.conflicts.len(), 1);
    assert_eq!(context.conflicts[0].first, context.evidence[0].item.id);
    assert!((context.aggregate_confidence - 0.7 * pipeline.conflict_penalty).abs() < 1e-6);
}

#[test]
fn test_no_successful_agents_means_zero_confidence() {
    let results = vec![
        AgentResult::failed(AgentKind::Regulation, "index offline", Duration::ZERO),
        AgentResult::timed_out(AgentKind::CaseLaw, Duration::from_secs(30)),
    ];
    let context = ContextFusion::new(&common::pipeline()).fuse(&results);

    assert_eq!(context.evidence_count, 0);
    assert_eq!(context.aggregate_confidence, 0.0);
    assert!(context.conflicts.is_empty());
}
