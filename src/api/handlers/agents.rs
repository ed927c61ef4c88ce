use crate::{AppState, types::AgentInfo};
use axum::{Json, extract::State};

/// List the registered retrieval agents
#[utoipa::path(
    get,
    path = "/api/agents",
    responses((status = 200, description = "Registered agents", body = Vec<AgentInfo>)),
    tag = "agents"
)]
pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentInfo>> {
    Json(
        state
            .registry
            .kinds()
            .into_iter()
            .map(|kind| AgentInfo {
                name: kind,
                source_type: kind.source_type(),
                specialty_terms: kind
                    .specialty_terms()
                    .iter()
                    .map(|term| term.to_string())
                    .collect(),
            })
            .collect(),
    )
}
