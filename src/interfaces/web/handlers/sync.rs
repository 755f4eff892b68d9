use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::json;

use super::super::AppState;
use super::{ApiResult, internal};

#[derive(Deserialize)]
pub struct TriggerQuery {
    reset: Option<bool>,
}

/// Returns immediately; the pass itself runs in the background.
pub async fn trigger_sync(
    State(state): State<AppState>,
    Query(query): Query<TriggerQuery>,
) -> ApiResult {
    let outcome = state
        .engine
        .gate
        .request_sync(query.reset.unwrap_or(false))
        .await
        .map_err(internal)?;

    let message = match outcome.dispatched {
        Some(reason) => format!("Sync started ({})", reason.as_str()),
        None => "Mirror is fresh; sync not needed".to_string(),
    };
    Ok(Json(json!({
        "message": message,
        "dispatched": outcome.dispatched,
        "sync_state": outcome.state,
    })))
}

pub async fn get_sync_state(State(state): State<AppState>) -> ApiResult {
    let sync_state = state.engine.store.get_sync_state().await.map_err(internal)?;
    Ok(Json(json!(sync_state)))
}
