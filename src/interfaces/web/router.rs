use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{runs, sites, sync};

/// Vite's default dev-server port, where the dashboard runs during development.
const DEV_UI_PORT: u16 = 5173;

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
        format!("http://127.0.0.1:{}", DEV_UI_PORT),
        format!("http://localhost:{}", DEV_UI_PORT),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/runs", get(runs::list_runs).post(runs::create_run))
        .route(
            "/api/runs/{id}",
            get(runs::get_run).patch(runs::update_run),
        )
        .route("/api/runs/{id}/sessions", post(runs::add_session))
        .route("/api/runs/{id}/sync", post(runs::sync_run))
        .route("/api/runs/{id}/pr-status", get(runs::get_pr_status))
        .route(
            "/api/runs/{id}/pull-request",
            post(runs::create_pull_request),
        )
        .route(
            "/api/runs/{id}/pull-request/commit",
            post(runs::commit_to_pull_request),
        )
        .route(
            "/api/runs/{id}/pull-request/merge",
            post(runs::merge_pull_request),
        )
        .route("/api/sites", get(sites::list_sites))
        .route("/api/sites/refresh", post(sites::refresh_sites))
        .route("/api/sites/{id}", axum::routing::patch(sites::update_site))
        .route("/api/sync/trigger", post(sync::trigger_sync))
        .route("/api/sync/state", get(sync::get_sync_state))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
