#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Path as UrlPath, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub const NETLIFY_TOKEN: &str = "nf-e2e-token";

pub struct DaemonHarness {
    child: Child,
    pub api_port: u16,
    pub api_base: String,
    data_dir: LocalTempDir,
}

impl DaemonHarness {
    pub async fn spawn(upstream: &MockUpstream) -> TestResult<Self> {
        let api_port = find_free_port()?;
        let data_dir = LocalTempDir::new("runmirror-e2e-data")?;
        write_config(data_dir.path(), api_port, upstream)?;

        let bin = runmirror_binary_path()?;
        let log_file = std::fs::File::create(data_dir.path().join("daemon.log"))?;
        let log_file_err = log_file.try_clone()?;

        let child = Command::new(bin)
            .arg("serve")
            .env("RUNMIRROR_DATA_DIR", data_dir.path())
            .env_remove("NETLIFY_AUTH_TOKEN")
            .env_remove("GITHUB_TOKEN")
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .spawn()?;

        let mut harness = Self {
            child,
            api_port,
            api_base: format!("http://127.0.0.1:{}", api_port),
            data_dir,
        };

        harness.wait_until_ready().await?;
        Ok(harness)
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    async fn wait_until_ready(&mut self) -> TestResult<()> {
        for _ in 0..80 {
            if let Some(status) = self.child.try_wait()? {
                return Err(format!("runmirror exited early with status: {}", status).into());
            }

            let res = reqwest::Client::new()
                .get(format!("{}/api/sync/state", self.api_base))
                .timeout(Duration::from_millis(700))
                .send()
                .await;

            if let Ok(resp) = res
                && resp.status().is_success()
            {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        Err("Timed out waiting for runmirror API readiness".into())
    }

    pub async fn request_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> TestResult<(u16, Value)> {
        let url = format!("{}{}", self.api_base, path);
        let mut req = reqwest::Client::new()
            .request(method, &url)
            .timeout(Duration::from_secs(30));
        if let Some(payload) = body {
            req = req.json(&payload);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        let parsed = serde_json::from_str::<Value>(&text).unwrap_or_else(|_| json!({ "raw": text }));
        Ok((status, parsed))
    }

    /// Polls `path` until `done` accepts the body or the deadline passes.
    pub async fn wait_for(
        &self,
        path: &str,
        done: impl Fn(&Value) -> bool,
    ) -> TestResult<Value> {
        let mut last = Value::Null;
        for _ in 0..60 {
            let (status, body) = self.request_json(reqwest::Method::GET, path, None).await?;
            if status == 200 && done(&body) {
                return Ok(body);
            }
            last = body;
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Err(format!("timed out waiting on {}; last body: {}", path, last).into())
    }
}

impl Drop for DaemonHarness {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// In-memory stand-in for the agent-runner API and the GitHub REST API,
/// mounted under `/netlify` and `/github` on one port.
#[derive(Default)]
pub struct UpstreamData {
    pub sites: Vec<Value>,
    pub runs: HashMap<String, Vec<Value>>,
    pub sessions: HashMap<String, Vec<Value>>,
    pub list_runs_calls: usize,
    pub unauthorized_calls: usize,
}

pub struct MockUpstream {
    pub port: u16,
    pub data: Arc<Mutex<UpstreamData>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

#[derive(Deserialize)]
struct SiteQuery {
    site_id: String,
}

type Shared = Arc<Mutex<UpstreamData>>;

fn authorized(headers: &HeaderMap, data: &Shared) -> bool {
    let expected = format!("Bearer {}", NETLIFY_TOKEN);
    let ok = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !ok {
        data.lock().unwrap_or_else(|e| e.into_inner()).unauthorized_calls += 1;
    }
    ok
}

async fn list_sites(State(data): State<Shared>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if !authorized(&headers, &data) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    let data = data.lock().unwrap_or_else(|e| e.into_inner());
    (StatusCode::OK, Json(Value::Array(data.sites.clone())))
}

async fn list_runs(
    State(data): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<SiteQuery>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers, &data) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    let mut data = data.lock().unwrap_or_else(|e| e.into_inner());
    data.list_runs_calls += 1;
    let runs = data.runs.get(&query.site_id).cloned().unwrap_or_default();
    (StatusCode::OK, Json(Value::Array(runs)))
}

async fn get_run(
    State(data): State<Shared>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers, &data) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    let data = data.lock().unwrap_or_else(|e| e.into_inner());
    match data.runs.values().flatten().find(|r| r["id"] == id.as_str()) {
        Some(run) => (StatusCode::OK, Json(run.clone())),
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))),
    }
}

async fn list_sessions(
    State(data): State<Shared>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers, &data) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    let data = data.lock().unwrap_or_else(|e| e.into_inner());
    let sessions = data.sessions.get(&id).cloned().unwrap_or_default();
    (StatusCode::OK, Json(Value::Array(sessions)))
}

async fn pull_request(UrlPath((_owner, _repo, _number)): UrlPath<(String, String, u64)>) -> Json<Value> {
    Json(json!({
        "head": { "sha": "abc123", "ref": "agent/r1" },
        "base": { "sha": "def456", "ref": "main" },
        "mergeable": true,
        "mergeable_state": "clean"
    }))
}

async fn reviews(UrlPath((_owner, _repo, _number)): UrlPath<(String, String, u64)>) -> Json<Value> {
    Json(json!([
        { "user": { "login": "octo" }, "state": "COMMENTED" },
        { "user": { "login": "octo" }, "state": "APPROVED" }
    ]))
}

async fn check_runs(UrlPath((_owner, _repo, _sha)): UrlPath<(String, String, String)>) -> Json<Value> {
    Json(json!({
        "total_count": 1,
        "check_runs": [{
            "name": "build",
            "status": "completed",
            "conclusion": "success",
            "html_url": "https://github.com/acme/site/runs/1"
        }]
    }))
}

async fn statuses(UrlPath((_owner, _repo, _sha)): UrlPath<(String, String, String)>) -> Json<Value> {
    Json(json!([{
        "context": "netlify/site/deploy-preview",
        "state": "success",
        "target_url": "https://deploy-preview-7--site.netlify.app"
    }]))
}

async fn compare(UrlPath((_owner, _repo, _range)): UrlPath<(String, String, String)>) -> Json<Value> {
    Json(json!({ "behind_by": 2, "ahead_by": 1 }))
}

impl MockUpstream {
    pub async fn start(data: UpstreamData) -> TestResult<Self> {
        let port = find_free_port()?;
        let data = Arc::new(Mutex::new(data));
        let app = Router::new()
            .route("/netlify/sites", get(list_sites))
            .route("/netlify/agent_runners", get(list_runs))
            .route("/netlify/agent_runners/{id}", get(get_run))
            .route("/netlify/agent_runners/{id}/sessions", get(list_sessions))
            .route("/github/repos/{owner}/{repo}/pulls/{number}", get(pull_request))
            .route(
                "/github/repos/{owner}/{repo}/pulls/{number}/reviews",
                get(reviews),
            )
            .route(
                "/github/repos/{owner}/{repo}/commits/{sha}/check-runs",
                get(check_runs),
            )
            .route(
                "/github/repos/{owner}/{repo}/commits/{sha}/statuses",
                get(statuses),
            )
            .route("/github/repos/{owner}/{repo}/compare/{range}", get(compare))
            .with_state(Arc::clone(&data));

        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Ok(Self {
            port,
            data,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn netlify_base(&self) -> String {
        format!("http://127.0.0.1:{}/netlify", self.port)
    }

    pub fn github_base(&self) -> String {
        format!("http://127.0.0.1:{}/github", self.port)
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&mut UpstreamData) -> R) -> R {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut data)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

pub fn find_free_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

pub fn is_bind_denied(err: &(dyn std::error::Error + Send + Sync)) -> bool {
    err.to_string().contains("Operation not permitted")
}

fn runmirror_binary_path() -> TestResult<PathBuf> {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_runmirror") {
        return Ok(PathBuf::from(path));
    }

    let candidate = PathBuf::from("target")
        .join("debug")
        .join(if cfg!(windows) { "runmirror.exe" } else { "runmirror" });
    if candidate.exists() {
        return Ok(candidate);
    }

    Err("Could not locate runmirror test binary path".into())
}

fn write_config(data_dir: &Path, api_port: u16, upstream: &MockUpstream) -> TestResult<()> {
    let config = format!(
        r#"api_host = "127.0.0.1"
api_port = {api_port}
log_level = "debug"
netlify_api_base = "{netlify}"
github_api_base = "{github}"
netlify_token = "{token}"
http_timeout_secs = 5

[sync]
background_tick_secs = 0
"#,
        api_port = api_port,
        netlify = upstream.netlify_base(),
        github = upstream.github_base(),
        token = NETLIFY_TOKEN,
    );
    std::fs::write(data_dir.join("config.toml"), config)?;
    Ok(())
}

struct LocalTempDir {
    path: PathBuf,
}

impl LocalTempDir {
    fn new(prefix: &str) -> TestResult<Self> {
        let path = std::env::temp_dir().join(format!("{}-{}", prefix, Uuid::new_v4().simple()));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LocalTempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}
