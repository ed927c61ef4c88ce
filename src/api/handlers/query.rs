use crate::{
    AppState,
    types::{Query, QueryRequest, QueryResponse, Result, StreamEvent},
};
use axum::{
    Json,
    extract::State,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use std::time::Instant;

/// Run a research query
///
/// Streams `delta` events followed by exactly one `final` or `error` event
/// as server-sent events. With `"stream": false` the stream is collected and
/// only the terminal event is returned.
#[utoipa::path(
    post,
    path = "/api/query",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Event stream (text/event-stream), or the collected answer", body = QueryResponse),
        (status = 400, description = "Empty or oversized query")
    ),
    tag = "query"
)]
pub async fn handle_query(
    State(state): State<AppState>,
    Json(payload): Json<QueryRequest>,
) -> Result<Response> {
    let start = Instant::now();
    let coordinator = state.coordinator();
    let stream = payload.stream;
    let query = Query::from_request(payload, coordinator.config().max_query_length)?;

    tracing::debug!(session = %query.session_id, stream, "Query accepted");
    let events = coordinator.handle_query(query, coordinator.default_deadline());

    if stream {
        let events = events.map(|event| Event::default().event(event.kind()).json_data(&event));
        return Ok(Sse::new(events)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let collected: Vec<StreamEvent> = events.collect().await;
    let outcome = collected
        .into_iter()
        .rev()
        .find(StreamEvent::is_terminal)
        .unwrap_or_else(|| StreamEvent::Error {
            message: "Query ended without an answer".to_string(),
        });

    Ok(Json(QueryResponse {
        outcome,
        duration_ms: start.elapsed().as_millis() as u64,
    })
    .into_response())
}
