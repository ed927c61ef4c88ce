//! Hybrid retrieval agent composing any set of backends.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::RetrievalAgent;
use crate::retrieval::{BackendKind, RawHit, RetrievalBackend};
use crate::types::{AgentKind, AgentResult, AgentStatus, AgentTask, EvidenceItem, Provenance};

/// Weights for blending semantic and lexical scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridWeights {
    pub semantic: f32,
    pub lexical: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            semantic: 0.5,
            lexical: 0.5,
        }
    }
}

/// Per-item scores gathered from each backend, already clamped to [0, 1].
#[derive(Debug, Default)]
struct Candidate {
    hit: Option<RawHit>,
    semantic: Option<f32>,
    lexical: Option<f32>,
    /// Best score from graph or external backends
    other: Option<f32>,
    cleared_floor: bool,
}

fn max_score(a: Option<f32>, b: Option<f32>) -> Option<f32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

pub struct SpecialistAgent {
    kind: AgentKind,
    backends: Vec<Arc<dyn RetrievalBackend>>,
    weights: HybridWeights,
    /// Result count at which confidence stops being discounted; also the K
    /// of the top-K score mean.
    saturation: usize,
}

impl SpecialistAgent {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            backends: Vec::new(),
            weights: HybridWeights::default(),
            saturation: 3,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn RetrievalBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn with_weights(mut self, weights: HybridWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_saturation(mut self, saturation: usize) -> Self {
        self.saturation = saturation.max(1);
        self
    }

    /// Whether both a semantic and a lexical backend are present, so their
    /// scores are blended rather than maxed.
    fn is_hybrid(&self) -> bool {
        let kinds = self.capabilities();
        kinds.iter().any(BackendKind::is_semantic) && kinds.contains(&BackendKind::Lexical)
    }

    /// Blend per-backend hit lists into one ranked list of (hit, score).
    fn combine(&self, lists: Vec<(BackendKind, Vec<RawHit>)>, floor: f32) -> Vec<(RawHit, f32)> {
        let mut candidates: HashMap<String, Candidate> = HashMap::new();

        for (kind, hits) in lists {
            for hit in hits {
                let score = hit.score.clamp(0.0, 1.0);
                let entry = candidates.entry(hit.id.clone()).or_default();
                entry.cleared_floor |= score >= floor;
                let slot = if kind.is_semantic() {
                    &mut entry.semantic
                } else if kind == BackendKind::Lexical {
                    &mut entry.lexical
                } else {
                    &mut entry.other
                };
                *slot = Some(slot.map_or(score, |s: f32| s.max(score)));
                if entry.hit.is_none() {
                    entry.hit = Some(hit);
                }
            }
        }

        let hybrid = self.is_hybrid();
        let mut combined: Vec<(RawHit, f32)> = candidates
            .into_values()
            .filter(|c| c.cleared_floor)
            .filter_map(|c| {
                let direct = if hybrid {
                    match (c.semantic, c.lexical) {
                        (None, None) => None,
                        (s, l) => Some(
                            self.weights.semantic * s.unwrap_or(0.0)
                                + self.weights.lexical * l.unwrap_or(0.0),
                        ),
                    }
                } else {
                    max_score(c.semantic, c.lexical)
                };
                let score = max_score(direct, c.other)?;
                c.hit.map(|hit| (hit, score.clamp(0.0, 1.0)))
            })
            .collect();

        combined.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        combined
    }

    /// Mean of the top-K scores, discounted when fewer than K items were found.
    pub fn confidence(&self, scores: &[f32]) -> f32 {
        if scores.is_empty() {
            return 0.0;
        }
        let k = self.saturation;
        let top = &scores[..scores.len().min(k)];
        let mean = top.iter().sum::<f32>() / top.len() as f32;
        let coverage = (scores.len() as f32 / k as f32).min(1.0);
        (mean * coverage).clamp(0.0, 1.0)
    }

    fn to_evidence(&self, hit: RawHit, score: f32) -> EvidenceItem {
        let citation = if hit.citation.is_empty() {
            hit.title.clone()
        } else {
            hit.citation
        };
        EvidenceItem {
            id: hit.id,
            source_type: hit.source_type.unwrap_or(self.kind.source_type()),
            title: hit.title,
            content: hit.content,
            score,
            provenance: Provenance {
                agent: self.kind,
                retrieved_at: Utc::now(),
                citation,
                url: hit.url,
                published: hit.published,
            },
        }
    }
}

#[async_trait]
impl RetrievalAgent for SpecialistAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    fn capabilities(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    #[instrument(skip(self, task), fields(agent = %self.kind, relaxed = task.constraints.relaxed))]
    async fn retrieve(&self, task: &AgentTask) -> AgentResult {
        let started = Instant::now();
        let constraints = &task.constraints;

        let calls = self.backends.iter().map(|backend| async move {
            let outcome = backend
                .search(&task.query, constraints, constraints.limit)
                .await;
            (backend.kind(), outcome)
        });

        let mut lists = Vec::new();
        let mut failures = Vec::new();
        for (kind, outcome) in join_all(calls).await {
            match outcome {
                Ok(hits) => lists.push((kind, hits)),
                Err(e) => {
                    warn!(backend = %kind, "Backend call failed: {}", e);
                    failures.push(format!("{} backend: {}", kind, e));
                }
            }
        }

        if lists.is_empty() {
            let diagnostic = if failures.is_empty() {
                "no retrieval backends configured".to_string()
            } else {
                failures.join("; ")
            };
            return AgentResult::failed(self.kind, diagnostic, started.elapsed());
        }

        let mut combined = self.combine(lists, constraints.relevance_floor);
        combined.truncate(constraints.limit);

        let scores: Vec<f32> = combined.iter().map(|(_, score)| *score).collect();
        let confidence = self.confidence(&scores);
        let items: Vec<Arc<EvidenceItem>> = combined
            .into_iter()
            .map(|(hit, score)| Arc::new(self.to_evidence(hit, score)))
            .collect();

        let status = if items.is_empty() {
            AgentStatus::Empty
        } else {
            AgentStatus::Ok
        };

        debug!(
            items = items.len(),
            confidence,
            ?status,
            "Agent retrieval finished"
        );

        AgentResult {
            agent: self.kind,
            items,
            confidence,
            status,
            elapsed: started.elapsed(),
            diagnostic: (!failures.is_empty()).then(|| failures.join("; ")),
        }
    }
}
