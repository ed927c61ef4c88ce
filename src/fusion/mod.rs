//! Context Fusion
//!
//! Merges every agent's evidence for one round into a single ranked context.
//! The result depends only on the set of [`AgentResult`]s, never on the
//! order they arrived in:
//!
//! 1. results are put in agent order and items in a canonical order
//!    (score, agent, id) before anything else happens;
//! 2. duplicates (same id, or same source type with near-identical content)
//!    collapse onto the highest-scored instance, keeping every contributor;
//! 3. rank = relevance x source weight + a small recency bonus, quantized so
//!    float noise cannot reorder near-equal items, with ties broken by
//!    source type, origin agent and id;
//! 4. conflicts are detected over the top of the ranking;
//! 5. aggregate confidence is the mean over successful agents, discounted
//!    for conflicts and for a mostly-failed agent set.

pub mod conflict;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::retrieval::tokenize;
use crate::types::{
    AgentKind, AgentOutcome, AgentResult, AgentStatus, EvidenceItem, FusedContext, RankedEvidence,
    SourceType,
};
use crate::utils::toml_config::PipelineConfig;

pub use conflict::{ConflictDetector, LexicalConflictDetector, Polarity};

/// Maximum rank bonus for the most recent dated item.
const RECENCY_BONUS: f32 = 0.05;
/// Age, relative to the newest dated item, at which the bonus reaches zero.
const RECENCY_HORIZON_DAYS: f32 = 3650.0;
const RANK_SCALE: f32 = 1_000_000.0;

/// Priority of a source category when relevance scores are close.
pub fn source_weight(source_type: SourceType) -> f32 {
    match source_type {
        SourceType::Regulation | SourceType::Precedent => 1.0,
        SourceType::CaseLaw => 0.98,
        SourceType::Expert => 0.95,
        SourceType::External => 0.85,
    }
}

fn quantize(rank: f32) -> i64 {
    (rank * RANK_SCALE).round() as i64
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

struct Merged {
    item: Arc<EvidenceItem>,
    contributors: Vec<AgentKind>,
    tokens: HashSet<String>,
}

pub struct ContextFusion {
    dedup_similarity: f32,
    conflict_penalty: f32,
    degraded_penalty: f32,
    detector: Arc<dyn ConflictDetector>,
}

impl ContextFusion {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            dedup_similarity: config.dedup_similarity,
            conflict_penalty: config.conflict_penalty,
            degraded_penalty: config.degraded_penalty,
            detector: Arc::new(LexicalConflictDetector::new(config.conflict_window)),
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn ConflictDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn fuse(&self, results: &[AgentResult]) -> FusedContext {
        let mut ordered: Vec<&AgentResult> = results.iter().collect();
        ordered.sort_by_key(|r| r.agent);

        let mut items: Vec<(AgentKind, &Arc<EvidenceItem>)> = ordered
            .iter()
            .copied()
            .flat_map(|r| r.items.iter().map(move |item| (r.agent, item)))
            .collect();
        items.sort_by(|(agent_a, a), (agent_b, b)| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| agent_a.cmp(agent_b))
                .then_with(|| a.id.cmp(&b.id))
        });

        let merged = self.deduplicate(items);
        let evidence = rank(merged);
        let conflicts = self.detector.detect(&evidence);
        let aggregate_confidence = self.aggregate(&ordered, !conflicts.is_empty());

        debug!(
            evidence = evidence.len(),
            conflicts = conflicts.len(),
            aggregate_confidence,
            "Fused agent results"
        );

        FusedContext {
            evidence_count: evidence.len(),
            evidence,
            aggregate_confidence,
            conflicts,
            agents: ordered.iter().map(|r| AgentOutcome::from(*r)).collect(),
        }
    }

    fn deduplicate(&self, items: Vec<(AgentKind, &Arc<EvidenceItem>)>) -> Vec<Merged> {
        let mut merged: Vec<Merged> = Vec::new();
        for (agent, item) in items {
            let tokens: HashSet<String> = tokenize(&item.content).into_iter().collect();
            let existing = merged.iter_mut().find(|m| {
                m.item.id == item.id
                    || (m.item.source_type == item.source_type
                        && jaccard(&m.tokens, &tokens) >= self.dedup_similarity)
            });
            match existing {
                Some(kept) => {
                    if !kept.contributors.contains(&agent) {
                        kept.contributors.push(agent);
                    }
                }
                None => merged.push(Merged {
                    item: Arc::clone(item),
                    contributors: vec![agent],
                    tokens,
                }),
            }
        }
        merged
    }

    fn aggregate(&self, results: &[&AgentResult], conflicted: bool) -> f32 {
        let ok: Vec<f32> = results
            .iter()
            .filter(|r| r.status == AgentStatus::Ok)
            .map(|r| r.confidence)
            .collect();
        if ok.is_empty() {
            return 0.0;
        }

        let mut confidence = ok.iter().sum::<f32>() / ok.len() as f32;
        if conflicted {
            confidence *= self.conflict_penalty;
        }
        let not_ok = results.len() - ok.len();
        if not_ok * 2 > results.len() {
            confidence *= self.degraded_penalty;
        }
        confidence.clamp(0.0, 1.0)
    }
}

fn rank(merged: Vec<Merged>) -> Vec<RankedEvidence> {
    let newest: Option<NaiveDate> = merged
        .iter()
        .filter_map(|m| m.item.provenance.published)
        .max();

    let mut evidence: Vec<RankedEvidence> = merged
        .into_iter()
        .map(|m| {
            let recency = match (newest, m.item.provenance.published) {
                (Some(newest), Some(published)) => {
                    let age = (newest - published).num_days().max(0) as f32;
                    RECENCY_BONUS * (1.0 - age / RECENCY_HORIZON_DAYS).max(0.0)
                }
                _ => 0.0,
            };
            RankedEvidence {
                rank_score: m.item.score * source_weight(m.item.source_type) + recency,
                item: m.item,
                contributors: m.contributors,
            }
        })
        .collect();

    evidence.sort_by(|a, b| {
        quantize(b.rank_score)
            .cmp(&quantize(a.rank_score))
            .then_with(|| a.item.source_type.cmp(&b.item.source_type))
            .then_with(|| a.contributors.first().cmp(&b.contributors.first()))
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
    evidence
}
