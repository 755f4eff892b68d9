use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::json;

use super::super::AppState;
use super::{ApiResult, internal, not_found, upstream};

#[derive(Deserialize)]
pub struct UpdateSiteRequest {
    #[serde(alias = "syncEnabled")]
    pub sync_enabled: bool,
}

pub async fn list_sites(State(state): State<AppState>) -> ApiResult {
    let sites = state.engine.store.list_sites().await.map_err(internal)?;
    Ok(Json(json!(sites)))
}

pub async fn refresh_sites(State(state): State<AppState>) -> ApiResult {
    let engine = &state.engine;
    let sites = engine
        .reconciler
        .refresh_sites(&engine.credentials)
        .await
        .map_err(upstream)?;
    Ok(Json(json!(sites)))
}

pub async fn update_site(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<UpdateSiteRequest>,
) -> ApiResult {
    let store = &state.engine.store;
    let updated = store
        .set_site_sync_enabled(&id, body.sync_enabled)
        .await
        .map_err(internal)?;
    if !updated {
        return Err(not_found("Site"));
    }
    match store.get_site(&id).await.map_err(internal)? {
        Some(site) => Ok(Json(json!(site))),
        None => Err(not_found("Site")),
    }
}
