use crate::{AppState, types::AgentKind};
use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use utoipa::ToSchema;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy` when every dependency answers, `degraded` otherwise.
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub agents: Vec<AgentKind>,
    /// Dependency name to reachability.
    pub dependencies: BTreeMap<String, bool>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProbeResponse {
    pub status: String,
}

/// System health with dependency checks
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Health report", body = HealthResponse)),
    tag = "health"
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut dependencies = BTreeMap::new();
    dependencies.insert("corpus".to_string(), !state.corpus.is_empty());
    if let Some(llm) = &state.llm {
        let available = tokio::time::timeout(PROBE_TIMEOUT, llm.is_available())
            .await
            .unwrap_or(false);
        dependencies.insert("llm".to_string(), available);
    }

    let healthy = dependencies.values().all(|ok| *ok);
    if !healthy {
        tracing::warn!(?dependencies, "Health check degraded");
    }

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        agents: state.registry.kinds(),
        dependencies,
    })
}

/// Readiness probe: ready once at least one agent is registered
#[utoipa::path(
    get,
    path = "/readiness",
    responses(
        (status = 200, description = "Ready to accept queries", body = ProbeResponse),
        (status = 503, description = "No agents registered", body = ProbeResponse)
    ),
    tag = "health"
)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ProbeResponse>) {
    if state.registry.is_empty() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ProbeResponse {
                status: "not ready".to_string(),
            }),
        );
    }
    (
        StatusCode::OK,
        Json(ProbeResponse {
            status: "ready".to_string(),
        }),
    )
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/liveness",
    responses((status = 200, description = "Process is alive", body = ProbeResponse)),
    tag = "health"
)]
pub async fn liveness() -> Json<ProbeResponse> {
    Json(ProbeResponse {
        status: "alive".to_string(),
    })
}
