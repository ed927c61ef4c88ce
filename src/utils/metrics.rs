//! In-process query metrics: latency percentiles over a rolling window,
//! success rate, confidence and strategy/agent usage.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::{AgentKind, SynthesisStrategy};

const DEFAULT_WINDOW: usize = 1000;

/// One finished query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
    pub duration: Duration,
    /// `false` when the query ended with an error event.
    pub success: bool,
    pub confidence: f32,
    pub strategy: Option<SynthesisStrategy>,
    pub agents: Vec<AgentKind>,
    pub rounds: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub success_rate: f64,
    pub avg_response_ms: f64,
    pub median_response_ms: f64,
    pub p95_response_ms: f64,
    pub p99_response_ms: f64,
    pub avg_confidence: f64,
    /// Share of queries that needed a re-query round.
    pub requery_rate: f64,
    pub strategy_usage: BTreeMap<String, u64>,
    pub agent_usage: BTreeMap<String, u64>,
    pub uptime_secs: u64,
}

#[derive(Debug, Default)]
struct Totals {
    queries: u64,
    successes: u64,
    requeried: u64,
    confidence_sum: f64,
    durations: VecDeque<Duration>,
    strategies: BTreeMap<String, u64>,
    agents: BTreeMap<String, u64>,
}

#[derive(Debug)]
pub struct MetricsCollector {
    totals: Mutex<Totals>,
    window: usize,
    started: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn percentile(sorted_ms: &[f64], p: f64) -> f64 {
    if sorted_ms.is_empty() {
        return 0.0;
    }
    let idx = ((p * (sorted_ms.len() - 1) as f64).round() as usize).min(sorted_ms.len() - 1);
    sorted_ms[idx]
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Keep at most `window` response times for percentile calculation.
    pub fn with_window(window: usize) -> Self {
        Self {
            totals: Mutex::new(Totals::default()),
            window: window.max(1),
            started: Instant::now(),
        }
    }

    pub fn record(&self, record: QueryRecord) {
        tracing::debug!(
            duration_ms = record.duration.as_millis() as u64,
            success = record.success,
            confidence = record.confidence,
            strategy = ?record.strategy,
            rounds = record.rounds,
            "Query recorded"
        );

        let mut totals = self.totals.lock();
        totals.queries += 1;
        if record.success {
            totals.successes += 1;
        }
        if record.rounds > 1 {
            totals.requeried += 1;
        }
        totals.confidence_sum += f64::from(record.confidence);
        totals.durations.push_back(record.duration);
        while totals.durations.len() > self.window {
            totals.durations.pop_front();
        }
        if let Some(strategy) = record.strategy {
            *totals.strategies.entry(strategy.to_string()).or_default() += 1;
        }
        for agent in record.agents {
            *totals.agents.entry(agent.to_string()).or_default() += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let totals = self.totals.lock();
        let mut sorted: Vec<f64> = totals
            .durations
            .iter()
            .map(|d| d.as_nanos() as f64 / 1_000_000.0)
            .collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let ratio = |n: u64| {
            if totals.queries == 0 {
                0.0
            } else {
                n as f64 / totals.queries as f64
            }
        };

        MetricsSnapshot {
            total_queries: totals.queries,
            successful_queries: totals.successes,
            success_rate: ratio(totals.successes),
            avg_response_ms: if sorted.is_empty() {
                0.0
            } else {
                sorted.iter().sum::<f64>() / sorted.len() as f64
            },
            median_response_ms: percentile(&sorted, 0.5),
            p95_response_ms: percentile(&sorted, 0.95),
            p99_response_ms: percentile(&sorted, 0.99),
            avg_confidence: if totals.queries == 0 {
                0.0
            } else {
                totals.confidence_sum / totals.queries as f64
            },
            requery_rate: ratio(totals.requeried),
            strategy_usage: totals.strategies.clone(),
            agent_usage: totals.agents.clone(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Clears all counters; uptime keeps counting.
    pub fn reset(&self) {
        *self.totals.lock() = Totals::default();
    }
}
