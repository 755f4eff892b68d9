//! The upstream job platform: lists and reads agent runs and their sessions
//! for a site, and accepts the explicit create commands issued by users.

#[cfg(test)]
pub(crate) mod fake;
mod netlify;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use netlify::NetlifyClient;

/// A run as returned by the list or detail endpoint. The list endpoint may
/// leave any of the optional fields empty.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RemoteRun {
    pub id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub pr_state: Option<String>,
    #[serde(default)]
    pub pr_branch: Option<String>,
    #[serde(default)]
    pub latest_session_deploy_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RemoteSession {
    pub id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RemoteSite {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NewRunRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

#[async_trait]
pub trait RunSource: Send + Sync {
    async fn list_runs(&self, token: &str, site_id: &str) -> Result<Vec<RemoteRun>>;

    /// Detail endpoint; may carry fields the list endpoint omits.
    async fn get_run(&self, token: &str, run_id: &str) -> Result<RemoteRun>;

    async fn list_sessions(&self, token: &str, run_id: &str) -> Result<Vec<RemoteSession>>;

    async fn list_sites(&self, token: &str) -> Result<Vec<RemoteSite>>;

    async fn create_run(
        &self,
        token: &str,
        site_id: &str,
        request: &NewRunRequest,
    ) -> Result<RemoteRun>;

    async fn create_session(
        &self,
        token: &str,
        run_id: &str,
        prompt: &str,
    ) -> Result<RemoteSession>;

    async fn create_pull_request(&self, token: &str, run_id: &str) -> Result<RemoteRun>;

    /// Pushes the run's latest work onto its already-open pull request.
    async fn commit_to_pull_request(&self, token: &str, run_id: &str) -> Result<RemoteRun>;
}

/// Treats blank strings the same as absent ones.
pub(crate) fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
