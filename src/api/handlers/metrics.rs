use crate::{AppState, utils::metrics::MetricsSnapshot};
use axum::{Json, extract::State};

/// Query metrics since start-up or the last reset
#[utoipa::path(
    get,
    path = "/api/metrics",
    responses((status = 200, description = "Metrics snapshot", body = MetricsSnapshot)),
    tag = "metrics"
)]
pub async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Reset all query metrics
#[utoipa::path(
    post,
    path = "/api/metrics/reset",
    responses((status = 200, description = "Metrics after the reset", body = MetricsSnapshot)),
    tag = "metrics"
)]
pub async fn reset_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    state.metrics.reset();
    tracing::info!("Query metrics reset");
    Json(state.metrics.snapshot())
}
