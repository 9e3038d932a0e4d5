//! REST surface consumed by the chat frontend: archived call history and
//! the live call for a user. Response shapes match what the frontend's api
//! service already expects (`success` + payload).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::history::CallHistory;
use crate::router::RouterHandle;
use crate::ws;

const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub router: RouterHandle,
    pub history: Arc<dyn CallHistory>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/calls/history/:user_id", get(call_history))
        .route("/calls/active/:user_id", get(active_call))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn call_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let calls = state.history.for_user(&user_id, limit);
    Json(json!({ "success": true, "calls": calls }))
}

async fn active_call(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<serde_json::Value> {
    let session = state.router.active_call(&user_id).await;
    Json(json!({ "success": true, "callData": session }))
}
