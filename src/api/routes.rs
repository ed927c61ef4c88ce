use crate::AppState;
use crate::api::handlers::{agents, health, metrics, query};
use axum::{
    Json, Router,
    routing::{get, post},
};
use utoipa::OpenApi;

/// OpenAPI description of every route below.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "taxrag-server",
        description = "Multi-agent retrieval and streamed synthesis for tax research"
    ),
    paths(
        query::handle_query,
        agents::list_agents,
        metrics::get_metrics,
        metrics::reset_metrics,
        health::health,
        health::readiness,
        health::liveness,
    ),
    components(schemas(
        crate::types::QueryRequest,
        crate::types::QueryResponse,
        crate::types::StreamEvent,
        crate::types::Citation,
        crate::types::AgentInfo,
        crate::utils::metrics::MetricsSnapshot,
        health::HealthResponse,
        health::ProbeResponse,
    )),
    tags(
        (name = "query", description = "Research queries"),
        (name = "agents", description = "Retrieval agents"),
        (name = "metrics", description = "Query metrics"),
        (name = "health", description = "Health probes")
    )
)]
pub struct ApiDoc;

/// Routes mounted under `/api`.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/query", post(query::handle_query))
        .route("/agents", get(agents::list_agents))
        .route("/metrics", get(metrics::get_metrics))
        .route("/metrics/reset", post(metrics::reset_metrics))
}

/// Probe routes mounted at the root.
pub fn health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/readiness", get(health::readiness))
        .route("/liveness", get(health::liveness))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
}
