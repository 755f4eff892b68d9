//! Explicit user commands. Each one goes to the remote first and mirrors the
//! result locally, so the change shows up before the next reconciliation
//! pass picks it up.

use anyhow::{Result, anyhow};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::config::Credentials;
use crate::core::github::{PrRef, ReviewSource};
use crate::core::pr_status::PrStatusEnricher;
use crate::core::remote::{NewRunRequest, RemoteRun, RunSource, present};
use crate::core::store::{MirrorStore, RunRecord, RunState, SessionRecord};
use crate::core::sync::TriggerGate;

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RunUpdate {
    #[serde(default)]
    pub custom_notes: Option<String>,
    #[serde(default)]
    pub archived: Option<bool>,
}

pub struct RunCommands {
    store: MirrorStore,
    runs: Arc<dyn RunSource>,
    reviews: Arc<dyn ReviewSource>,
    gate: Arc<TriggerGate>,
    pr_status: Arc<PrStatusEnricher>,
    credentials: Credentials,
}

impl RunCommands {
    pub fn new(
        store: MirrorStore,
        runs: Arc<dyn RunSource>,
        reviews: Arc<dyn ReviewSource>,
        gate: Arc<TriggerGate>,
        pr_status: Arc<PrStatusEnricher>,
        credentials: Credentials,
    ) -> Self {
        Self {
            store,
            runs,
            reviews,
            gate,
            pr_status,
            credentials,
        }
    }

    fn netlify_token(&self) -> Result<&str> {
        self.credentials
            .netlify()
            .ok_or_else(|| anyhow!("missing Netlify access token"))
    }

    /// New work should become visible fast; the gate resets the backoff.
    async fn request_fresh_sync(&self) {
        if let Err(e) = self.gate.request_sync(true).await {
            warn!("Could not request sync after command: {:#}", e);
        }
    }

    /// `None` when the site is unknown locally.
    pub async fn create_run(
        &self,
        site_id: &str,
        request: &NewRunRequest,
    ) -> Result<Option<RunRecord>> {
        let token = self.netlify_token()?;
        let Some(site) = self.store.get_site(site_id).await? else {
            return Ok(None);
        };

        let remote = self.runs.create_run(token, site_id, request).await?;
        let now = Utc::now();
        let record = RunRecord {
            id: remote.id.clone(),
            site_id: site.id.clone(),
            site_name: Some(site.name.clone()),
            title: present(remote.title.as_deref())
                .map(str::to_string)
                .or_else(|| Some(request.prompt.clone())),
            state: remote
                .state
                .as_deref()
                .and_then(RunState::parse)
                .unwrap_or(RunState::New),
            branch: present(remote.branch.as_deref())
                .map(str::to_string)
                .or_else(|| request.branch.clone()),
            pull_request_url: None,
            pull_request_state: None,
            pull_request_branch: None,
            deploy_preview_url: None,
            created_at: remote.created_at.unwrap_or(now),
            updated_at: remote.updated_at.unwrap_or(now),
            synced_at: Some(now),
            archived_at: None,
            pr_committed_at: None,
            pr_needs_update: false,
            pr_check_status: None,
            custom_notes: None,
        };
        self.store.insert_run(&record).await?;
        info!("Created run {} on site '{}'", record.id, site.name);

        self.request_fresh_sync().await;
        self.store.get_run(&record.id).await
    }

    pub async fn add_session(&self, run_id: &str, prompt: &str) -> Result<Option<SessionRecord>> {
        let token = self.netlify_token()?;
        let Some(run) = self.store.get_run(run_id).await? else {
            return Ok(None);
        };

        let remote = self.runs.create_session(token, run_id, prompt).await?;
        let now = Utc::now();
        let created_at = remote.created_at.unwrap_or(now);
        let session = SessionRecord {
            id: remote.id.clone(),
            run_id: run_id.to_string(),
            state: present(remote.state.as_deref())
                .unwrap_or("new")
                .to_string(),
            prompt: remote.prompt.clone().or_else(|| Some(prompt.to_string())),
            created_at,
            updated_at: remote.updated_at.unwrap_or(created_at),
        };
        self.store.insert_session(&session).await?;
        if run.has_pull_request() {
            self.store.set_pr_needs_update(run_id, true).await?;
        }
        info!("Added session {} to run {}", session.id, run_id);

        self.request_fresh_sync().await;
        self.store.get_session(&session.id).await
    }

    pub async fn create_pull_request(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let token = self.netlify_token()?;
        if self.store.get_run(run_id).await?.is_none() {
            return Ok(None);
        }
        let remote = self.runs.create_pull_request(token, run_id).await?;
        self.record_pull_request(run_id, &remote).await
    }

    pub async fn commit_to_pull_request(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let token = self.netlify_token()?;
        let Some(run) = self.store.get_run(run_id).await? else {
            return Ok(None);
        };
        if !run.has_pull_request() {
            return Err(anyhow!("run {} has no pull request to update", run_id));
        }
        let remote = self.runs.commit_to_pull_request(token, run_id).await?;
        self.record_pull_request(run_id, &remote).await
    }

    async fn record_pull_request(
        &self,
        run_id: &str,
        remote: &RemoteRun,
    ) -> Result<Option<RunRecord>> {
        self.store
            .record_pull_request(
                run_id,
                present(remote.pr_url.as_deref()),
                present(remote.pr_state.as_deref()),
                present(remote.pr_branch.as_deref()),
                Utc::now(),
            )
            .await?;
        let run = self.store.get_run(run_id).await?;
        if let Some(url) = run.as_ref().and_then(|r| r.pull_request_url.as_deref()) {
            self.pr_status.invalidate(url);
            info!("Pull request for run {} is at {}", run_id, url);
        }
        Ok(run)
    }

    pub async fn merge_pull_request(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let Some(run) = self.store.get_run(run_id).await? else {
            return Ok(None);
        };
        let Some(url) = run.pull_request_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            return Err(anyhow!("run {} has no pull request to merge", run_id));
        };

        let pr = PrRef::parse(url)?;
        let outcome = self
            .reviews
            .merge_pull_request(self.credentials.github(), &pr)
            .await?;
        if !outcome.merged {
            return Err(anyhow!(
                "GitHub refused to merge {}: {}",
                url,
                outcome.message.unwrap_or_default()
            ));
        }

        self.store
            .set_pull_request_state(run_id, "merged", Utc::now())
            .await?;
        self.pr_status.invalidate(url);
        info!("Merged pull request {} for run {}", url, run_id);
        self.store.get_run(run_id).await
    }

    pub async fn update_run(&self, run_id: &str, update: &RunUpdate) -> Result<Option<RunRecord>> {
        if self.store.get_run(run_id).await?.is_none() {
            return Ok(None);
        }
        if let Some(notes) = update.custom_notes.as_deref() {
            let notes = Some(notes).filter(|n| !n.trim().is_empty());
            self.store.set_custom_notes(run_id, notes).await?;
        }
        if let Some(archived) = update.archived {
            self.store.set_archived(run_id, archived, Utc::now()).await?;
        }
        self.store.get_run(run_id).await
    }
}
