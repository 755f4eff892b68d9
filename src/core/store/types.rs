use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse lifecycle of a remote run, as reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    New,
    Running,
    Done,
    Error,
    Archived,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::New => "NEW",
            RunState::Running => "RUNNING",
            RunState::Done => "DONE",
            RunState::Error => "ERROR",
            RunState::Archived => "ARCHIVED",
        }
    }

    /// Upstream spells states in lowercase; the mirror stores them uppercased.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NEW" => Some(RunState::New),
            "RUNNING" => Some(RunState::Running),
            "DONE" => Some(RunState::Done),
            "ERROR" => Some(RunState::Error),
            "ARCHIVED" => Some(RunState::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub site_id: String,
    pub site_name: Option<String>,
    pub title: Option<String>,
    pub state: RunState,
    pub branch: Option<String>,
    pub pull_request_url: Option<String>,
    pub pull_request_state: Option<String>,
    pub pull_request_branch: Option<String>,
    pub deploy_preview_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub pr_committed_at: Option<DateTime<Utc>>,
    pub pr_needs_update: bool,
    pub pr_check_status: Option<String>,
    pub custom_notes: Option<String>,
}

impl RunRecord {
    pub fn has_pull_request(&self) -> bool {
        self.pull_request_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }
}

/// The remote-derived fields reconciliation tracks on an existing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRemoteFields {
    pub state: RunState,
    pub pull_request_url: Option<String>,
    pub pull_request_state: Option<String>,
    pub pull_request_branch: Option<String>,
    pub deploy_preview_url: Option<String>,
}

impl RunRemoteFields {
    pub fn of(run: &RunRecord) -> Self {
        Self {
            state: run.state,
            pull_request_url: run.pull_request_url.clone(),
            pull_request_state: run.pull_request_state.clone(),
            pull_request_branch: run.pull_request_branch.clone(),
            deploy_preview_url: run.deploy_preview_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub run_id: String,
    pub state: String,
    pub prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRecord {
    pub id: String,
    pub name: String,
    pub updated_at: DateTime<Utc>,
    pub sync_enabled: bool,
}

/// The single row driving the adaptive polling cadence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStateRecord {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub next_sync_at: Option<DateTime<Utc>>,
    pub backoff_seconds: u64,
    pub consecutive_no_change: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunWithSessions {
    #[serde(flatten)]
    pub run: RunRecord,
    pub sessions: Vec<SessionRecord>,
}
