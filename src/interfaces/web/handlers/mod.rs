pub mod runs;
pub mod sites;
pub mod sync;

use axum::Json;
use axum::http::StatusCode;
use serde_json::{Value, json};
use tracing::warn;

pub(crate) type ApiError = (StatusCode, Json<Value>);
pub(crate) type ApiResult = Result<Json<Value>, ApiError>;

pub(crate) fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

pub(crate) fn not_found(what: &str) -> ApiError {
    error(StatusCode::NOT_FOUND, format!("{} not found", what))
}

pub(crate) fn bad_request(message: &str) -> ApiError {
    error(StatusCode::BAD_REQUEST, message)
}

/// Store failures.
pub(crate) fn internal(e: anyhow::Error) -> ApiError {
    warn!("Request failed: {:#}", e);
    error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
}

/// Failures calling the run or review source.
pub(crate) fn upstream(e: anyhow::Error) -> ApiError {
    warn!("Upstream call failed: {:#}", e);
    error(StatusCode::BAD_GATEWAY, format!("{:#}", e))
}
