// JSON read API.
//
// GET /api/data   the whole snapshot tree, crowds and groups in key order
// GET /api/status poller liveness plus pool and loop counts

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::web::{api_error, AppState};

pub async fn get_data(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.collector.get_data())
}

pub async fn get_status(State(state): State<AppState>) -> Response {
    let liveness = state.collector.is_running();
    let tokens = match state.collector.pool().count().await {
        Ok(n) => n,
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };
    let data = state.collector.get_data();

    Json(serde_json::json!({
        "running": liveness.last_feed().is_some(),
        "last_feed": liveness.last_feed().map(|t| t.to_rfc3339()),
        "tokens": tokens,
        "active_loops": state.collector.active_count(),
        "configured_groups": state.collector.groups().len(),
        "groups_with_data": data.group_count(),
    }))
    .into_response()
}
