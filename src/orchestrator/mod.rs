//! Orchestrator
//!
//! Runs one query's agent tasks through the collection and gating state
//! machine:
//!
//! ```text
//! Dispatched -> Collecting -> Gated -> Accepted
//!                               |-> Requerying -> Collecting -> Gated -> Accepted | ForcedAccept
//!                               |-> ForcedAccept
//! ```
//!
//! Every task is spawned on its own tokio task and bounded by the earlier of
//! its own deadline and the query's overall deadline. Each task reports
//! exactly once; tasks still running at the overall deadline are aborted and
//! recorded as timeouts. At most two rounds run per query.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::agents::AgentRegistry;
use crate::fusion::ContextFusion;
use crate::types::{AgentKind, AgentResult, AgentTask, FusedContext};
use crate::utils::toml_config::PipelineConfig;

/// Outcome of evaluating the quality gate on one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Accept,
    Requery,
    ForceAccept,
}

/// Confidence and completeness thresholds a fused context must meet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    pub confidence_threshold: f32,
    pub min_evidence: usize,
}

impl QualityGate {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            min_evidence: config.min_evidence,
        }
    }

    pub fn passes(&self, context: &FusedContext) -> bool {
        context.aggregate_confidence >= self.confidence_threshold
            && context.evidence_count >= self.min_evidence
    }

    /// Decision for `round` (1-based). Only the first round may re-query,
    /// and only while the overall deadline has not passed.
    pub fn decide(&self, context: &FusedContext, round: u8, time_left: bool) -> GateDecision {
        if self.passes(context) {
            GateDecision::Accept
        } else if round == 1 && time_left {
            GateDecision::Requery
        } else {
            GateDecision::ForceAccept
        }
    }
}

/// What the orchestrator hands to synthesis.
#[derive(Debug, Clone)]
pub struct Orchestration {
    pub context: FusedContext,
    /// Number of collection rounds run: 1 or 2.
    pub rounds: u8,
    /// `Accept` or `ForceAccept`.
    pub decision: GateDecision,
}

impl Orchestration {
    pub fn forced(&self) -> bool {
        self.decision == GateDecision::ForceAccept
    }
}

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    fusion: ContextFusion,
    gate: QualityGate,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(registry: Arc<AgentRegistry>, config: PipelineConfig) -> Self {
        Self {
            registry,
            fusion: ContextFusion::new(&config),
            gate: QualityGate::from_config(&config),
            config,
        }
    }

    pub fn with_fusion(mut self, fusion: ContextFusion) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn gate(&self) -> QualityGate {
        self.gate
    }

    #[instrument(skip(self, tasks), fields(tasks = tasks.len()))]
    pub async fn run(&self, tasks: Vec<AgentTask>, overall_deadline: Instant) -> Orchestration {
        let first = self.collect(&tasks, overall_deadline).await;
        let context = self.fusion.fuse(&first);
        let decision = self
            .gate
            .decide(&context, 1, Instant::now() < overall_deadline);
        info!(
            round = 1,
            ?decision,
            confidence = context.aggregate_confidence,
            evidence = context.evidence_count,
            "Quality gate evaluated"
        );

        if decision != GateDecision::Requery {
            return Orchestration {
                context,
                rounds: 1,
                decision,
            };
        }

        let relaxed = self.requery_tasks(&tasks, &first, overall_deadline);
        let second = self.collect(&relaxed, overall_deadline).await;
        let merged = merge_rounds(first, second);
        let context = self.fusion.fuse(&merged);
        let decision = self.gate.decide(&context, 2, false);
        info!(
            round = 2,
            ?decision,
            confidence = context.aggregate_confidence,
            evidence = context.evidence_count,
            "Quality gate evaluated"
        );

        Orchestration {
            context,
            rounds: 2,
            decision,
        }
    }

    /// Relaxed copies of the tasks whose agents came back empty, failed or
    /// under the confidence threshold; all tasks when every agent was
    /// individually confident but the round as a whole was not.
    fn requery_tasks(
        &self,
        tasks: &[AgentTask],
        results: &[AgentResult],
        overall_deadline: Instant,
    ) -> Vec<AgentTask> {
        let weak: BTreeSet<AgentKind> = results
            .iter()
            .filter(|r| !r.is_ok() || r.confidence < self.gate.confidence_threshold)
            .map(|r| r.agent)
            .collect();

        let deadline = (Instant::now() + self.config.agent_timeout()).min(overall_deadline);
        let (relevance_floor, limit) = self.config.retrieval_window(true);

        tasks
            .iter()
            .filter(|t| weak.is_empty() || weak.contains(&t.agent))
            .map(|t| t.relaxed(deadline, relevance_floor, limit))
            .collect()
    }

    /// Dispatches every task concurrently and waits for all of them, never
    /// past `overall_deadline`. Returns exactly one result per task.
    async fn collect(&self, tasks: &[AgentTask], overall_deadline: Instant) -> Vec<AgentResult> {
        let started = Instant::now();
        let mut results = Vec::with_capacity(tasks.len());
        let mut set = JoinSet::new();
        let mut spawned: HashMap<tokio::task::Id, AgentKind> = HashMap::new();

        for task in tasks {
            let agent = match self.registry.get(task.agent) {
                Ok(agent) => agent,
                Err(e) => {
                    warn!(agent = %task.agent, "Cannot dispatch: {}", e);
                    results.push(AgentResult::failed(task.agent, e.to_string(), started.elapsed()));
                    continue;
                }
            };
            let kind = task.agent;
            let task = task.clone();
            let deadline = task.deadline.min(overall_deadline);
            debug!(agent = %kind, query = %task.query, relaxed = task.constraints.relaxed, "Dispatching agent");

            let handle = set.spawn(async move {
                let begun = Instant::now();
                match timeout_at(deadline, agent.retrieve(&task)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(agent = %task.agent, "Agent exceeded its deadline");
                        AgentResult::timed_out(task.agent, begun.elapsed())
                    }
                }
            });
            spawned.insert(handle.id(), kind);
        }

        loop {
            match timeout_at(overall_deadline, set.join_next_with_id()).await {
                Ok(Some(Ok((id, result)))) => {
                    spawned.remove(&id);
                    results.push(result);
                }
                Ok(Some(Err(e))) => {
                    if let Some(agent) = spawned.remove(&e.id()) {
                        warn!(%agent, "Agent task failed: {}", e);
                        results.push(AgentResult::failed(
                            agent,
                            format!("agent task failed: {}", e),
                            started.elapsed(),
                        ));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(pending = spawned.len(), "Overall deadline reached, cancelling agents");
                    set.abort_all();
                    break;
                }
            }
        }

        for agent in spawned.into_values() {
            results.push(AgentResult::timed_out(agent, started.elapsed()));
        }
        results.sort_by_key(|r| r.agent);
        results
    }
}

/// Second-round results replace first-round ones when they succeeded or
/// the first-round result had not.
fn merge_rounds(first: Vec<AgentResult>, second: Vec<AgentResult>) -> Vec<AgentResult> {
    let mut merged: BTreeMap<AgentKind, AgentResult> =
        first.into_iter().map(|r| (r.agent, r)).collect();
    for result in second {
        let replace = match merged.get(&result.agent) {
            Some(previous) => result.is_ok() || !previous.is_ok(),
            None => true,
        };
        if replace {
            merged.insert(result.agent, result);
        }
    }
    merged.into_values().collect()
}
