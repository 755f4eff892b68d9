use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;

use super::super::AppState;
use super::{ApiError, ApiResult, bad_request, error, internal, not_found, upstream};
use crate::core::commands::RunUpdate;
use crate::core::pr_status::PrTarget;
use crate::core::remote::NewRunRequest;
use crate::core::store::RunRecord;

#[derive(Deserialize)]
pub struct ListRunsQuery {
    archived: Option<bool>,
}

#[derive(Deserialize)]
pub struct CreateRunRequest {
    pub site_id: String,
    #[serde(flatten)]
    pub run: NewRunRequest,
}

#[derive(Deserialize)]
pub struct AddSessionRequest {
    pub prompt: String,
}

async fn existing_run(state: &AppState, id: &str) -> Result<RunRecord, ApiError> {
    state
        .engine
        .store
        .get_run(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Run"))
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> ApiResult {
    let runs = state
        .engine
        .store
        .list_runs(query.archived.unwrap_or(false))
        .await
        .map_err(internal)?;
    Ok(Json(json!(runs)))
}

pub async fn get_run(Path(id): Path<String>, State(state): State<AppState>) -> ApiResult {
    match state.engine.store.get_run_with_sessions(&id).await {
        Ok(Some(run)) => Ok(Json(json!(run))),
        Ok(None) => Err(not_found("Run")),
        Err(e) => Err(internal(e)),
    }
}

pub async fn create_run(
    State(state): State<AppState>,
    Json(body): Json<CreateRunRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if body.site_id.trim().is_empty() {
        return Err(bad_request("site_id is required"));
    }
    if body.run.prompt.trim().is_empty() {
        return Err(bad_request("prompt is required"));
    }

    match state.engine.commands.create_run(&body.site_id, &body.run).await {
        Ok(Some(run)) => Ok((StatusCode::CREATED, Json(json!(run)))),
        Ok(None) => Err(not_found("Site")),
        Err(e) => Err(upstream(e)),
    }
}

pub async fn update_run(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<RunUpdate>,
) -> ApiResult {
    match state.engine.commands.update_run(&id, &body).await {
        Ok(Some(run)) => Ok(Json(json!(run))),
        Ok(None) => Err(not_found("Run")),
        Err(e) => Err(internal(e)),
    }
}

pub async fn add_session(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<AddSessionRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if body.prompt.trim().is_empty() {
        return Err(bad_request("prompt is required"));
    }
    match state.engine.commands.add_session(&id, &body.prompt).await {
        Ok(Some(session)) => Ok((StatusCode::CREATED, Json(json!(session)))),
        Ok(None) => Err(not_found("Run")),
        Err(e) => Err(upstream(e)),
    }
}

/// Per-card refresh for runs that are still moving.
pub async fn sync_run(Path(id): Path<String>, State(state): State<AppState>) -> ApiResult {
    let engine = &state.engine;
    match engine.reconciler.sync_run(&engine.credentials, &id).await {
        Ok(Some(run)) => Ok(Json(json!(run))),
        Ok(None) => Err(not_found("Run")),
        Err(e) => Err(upstream(e)),
    }
}

pub async fn create_pull_request(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult {
    let run = existing_run(&state, &id).await?;
    if run.has_pull_request() {
        return Err(error(
            StatusCode::CONFLICT,
            "Run already has a pull request",
        ));
    }
    match state.engine.commands.create_pull_request(&id).await {
        Ok(Some(run)) => Ok(Json(json!(run))),
        Ok(None) => Err(not_found("Run")),
        Err(e) => Err(upstream(e)),
    }
}

pub async fn commit_to_pull_request(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult {
    let run = existing_run(&state, &id).await?;
    if !run.has_pull_request() {
        return Err(error(StatusCode::CONFLICT, "Run has no pull request"));
    }
    match state.engine.commands.commit_to_pull_request(&id).await {
        Ok(Some(run)) => Ok(Json(json!(run))),
        Ok(None) => Err(not_found("Run")),
        Err(e) => Err(upstream(e)),
    }
}

pub async fn merge_pull_request(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult {
    let run = existing_run(&state, &id).await?;
    if !run.has_pull_request() {
        return Err(error(StatusCode::CONFLICT, "Run has no pull request"));
    }
    match state.engine.commands.merge_pull_request(&id).await {
        Ok(Some(run)) => Ok(Json(json!(run))),
        Ok(None) => Err(not_found("Run")),
        Err(e) => Err(upstream(e)),
    }
}

/// `null` means the status is unknown right now, not an error.
pub async fn get_pr_status(Path(id): Path<String>, State(state): State<AppState>) -> ApiResult {
    existing_run(&state, &id).await?;
    let engine = &state.engine;
    let status = engine
        .pr_status
        .get_pr_status(PrTarget::Run(&id), &engine.credentials)
        .await;
    Ok(Json(json!(status)))
}
