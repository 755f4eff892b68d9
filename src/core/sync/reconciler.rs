use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span, warn};

use super::backoff;
use crate::core::config::Credentials;
use crate::core::remote::{RemoteRun, RemoteSession, RunSource, present};
use crate::core::store::{
    MirrorStore, RunRecord, RunRemoteFields, RunState, SessionRecord, SiteRecord, SyncStateRecord,
};

/// What one reconciliation pass saw and did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassReport {
    pub sites_polled: usize,
    pub sites_failed: usize,
    pub runs_discovered: usize,
    pub runs_updated: usize,
    pub runs_unchanged: usize,
    pub sessions_discovered: usize,
    pub sessions_updated: usize,
    pub session_fetch_failures: usize,
    pub changed: bool,
    pub consecutive_no_change: u32,
    pub backoff_seconds: u64,
    pub next_sync_at: Option<DateTime<Utc>>,
}

impl PassReport {
    fn observed_change(&self) -> bool {
        self.runs_discovered + self.runs_updated + self.sessions_discovered + self.sessions_updated
            > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunChange {
    Discovered,
    Updated,
    Unchanged,
}

/// Mirrors remote runs and sessions of every sync-enabled site into the
/// store and advances the adaptive schedule.
pub struct Reconciler {
    store: MirrorStore,
    source: Arc<dyn RunSource>,
}

impl Reconciler {
    pub fn new(store: MirrorStore, source: Arc<dyn RunSource>) -> Self {
        Self { store, source }
    }

    pub async fn reconcile(&self, credentials: &Credentials) -> Result<PassReport> {
        self.reconcile_at(credentials, Utc::now()).await
    }

    /// Runs one full pass with `now` as the pass clock. Fails only when no
    /// token is configured or the store itself is unusable; upstream errors
    /// are contained per site, per run and per session fetch.
    pub async fn reconcile_at(
        &self,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<PassReport> {
        let pass_id = uuid::Uuid::new_v4();
        self.run_pass(credentials, now)
            .instrument(info_span!("sync_pass", pass = %pass_id))
            .await
    }

    async fn run_pass(&self, credentials: &Credentials, now: DateTime<Utc>) -> Result<PassReport> {
        // SyncState stays untouched so the next trigger retries on the same cadence.
        let Some(token) = credentials.netlify() else {
            warn!("No Netlify access token configured; skipping sync pass");
            return Err(anyhow!("missing Netlify access token"));
        };

        let sites = self.store.list_sync_enabled_sites().await?;
        let mut report = PassReport::default();

        for site in &sites {
            report.sites_polled += 1;
            if let Err(e) = self.reconcile_site(token, site, now, &mut report).await {
                report.sites_failed += 1;
                warn!("Sync of site '{}' ({}) failed: {:#}", site.name, site.id, e);
            }
        }

        report.changed = report.observed_change();
        self.finish_pass(now, &mut report).await?;

        info!(
            "Sync pass done: {} site(s), {} new run(s), {} updated run(s), {} new session(s); next in {}s",
            report.sites_polled,
            report.runs_discovered,
            report.runs_updated,
            report.sessions_discovered,
            report.backoff_seconds
        );
        Ok(report)
    }

    async fn finish_pass(&self, now: DateTime<Utc>, report: &mut PassReport) -> Result<()> {
        let previous = self.store.get_sync_state().await?;
        let consecutive_no_change = if report.changed {
            0
        } else {
            previous
                .as_ref()
                .map_or(0, |s| s.consecutive_no_change)
                .saturating_add(1)
        };
        let backoff_seconds = backoff::schedule_for(consecutive_no_change);
        let next_sync_at = backoff::next_sync_at(now, backoff_seconds);

        self.store
            .put_sync_state(&SyncStateRecord {
                last_sync_at: Some(now),
                next_sync_at: Some(next_sync_at),
                backoff_seconds,
                consecutive_no_change,
            })
            .await?;

        report.consecutive_no_change = consecutive_no_change;
        report.backoff_seconds = backoff_seconds;
        report.next_sync_at = Some(next_sync_at);
        Ok(())
    }

    async fn reconcile_site(
        &self,
        token: &str,
        site: &SiteRecord,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<()> {
        let remote_runs = self.source.list_runs(token, &site.id).await?;
        debug!(
            "Site '{}' reported {} run(s)",
            site.name,
            remote_runs.len()
        );

        for remote in &remote_runs {
            let change = match self.reconcile_run(site, remote, now).await {
                Ok(change) => change,
                Err(e) => {
                    warn!("Failed to mirror run {}: {:#}", remote.id, e);
                    continue;
                }
            };
            match change {
                RunChange::Discovered => report.runs_discovered += 1,
                RunChange::Updated => report.runs_updated += 1,
                RunChange::Unchanged => report.runs_unchanged += 1,
            }

            if let Err(e) = self
                .reconcile_sessions(token, &remote.id, now, report)
                .await
            {
                warn!("Failed to mirror sessions of run {}: {:#}", remote.id, e);
            }
        }
        Ok(())
    }

    async fn reconcile_run(
        &self,
        site: &SiteRecord,
        remote: &RemoteRun,
        now: DateTime<Utc>,
    ) -> Result<RunChange> {
        match self.store.get_run(&remote.id).await? {
            Some(local) => self.apply_to_existing(&local, remote, now).await,
            None => {
                let record = discovered_run(site, remote, now);
                if self.store.insert_run(&record).await? {
                    info!("Discovered run {} on site '{}'", record.id, site.name);
                    Ok(RunChange::Discovered)
                } else {
                    // Another pass inserted it first.
                    Ok(RunChange::Unchanged)
                }
            }
        }
    }

    async fn apply_to_existing(
        &self,
        local: &RunRecord,
        remote: &RemoteRun,
        now: DateTime<Utc>,
    ) -> Result<RunChange> {
        let merged = merge_remote_fields(local, remote);
        if merged != RunRemoteFields::of(local) {
            self.store
                .apply_remote_fields(&local.id, &merged, now)
                .await?;
            debug!(
                "Run {} changed: {} -> {}",
                local.id,
                local.state.as_str(),
                merged.state.as_str()
            );
            Ok(RunChange::Updated)
        } else {
            self.store.touch_run_synced(&local.id, now).await?;
            Ok(RunChange::Unchanged)
        }
    }

    async fn reconcile_sessions(
        &self,
        token: &str,
        run_id: &str,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<()> {
        let remote_sessions = match self.source.list_sessions(token, run_id).await {
            Ok(sessions) => sessions,
            Err(e) => {
                report.session_fetch_failures += 1;
                warn!("Could not fetch sessions for run {}: {:#}", run_id, e);
                return Ok(());
            }
        };

        let mut discovered = 0;
        for remote in &remote_sessions {
            match self.store.get_session(&remote.id).await? {
                None => {
                    if self
                        .store
                        .insert_session(&discovered_session(run_id, remote, now))
                        .await?
                    {
                        discovered += 1;
                    }
                }
                Some(local) => {
                    if let Some(state) = present(remote.state.as_deref())
                        && state != local.state
                    {
                        self.store
                            .update_session_state(
                                &remote.id,
                                state,
                                remote.updated_at.unwrap_or(now),
                            )
                            .await?;
                        report.sessions_updated += 1;
                    }
                }
            }
        }
        report.sessions_discovered += discovered;

        if discovered > 0 {
            self.flag_stale_pull_request(run_id).await?;
        }
        Ok(())
    }

    /// New sessions on a run that already carries a PR mean the PR lags
    /// behind the run, whether the run itself is new to the mirror or not.
    async fn flag_stale_pull_request(&self, run_id: &str) -> Result<()> {
        if let Some(run) = self.store.get_run(run_id).await?
            && run.has_pull_request()
            && !run.pr_needs_update
        {
            self.store.set_pr_needs_update(run_id, true).await?;
            info!("Run {} has new sessions since its PR; marked for update", run_id);
        }
        Ok(())
    }

    /// Refreshes one mirrored run from the detail endpoint, cascading into
    /// its sessions. Leaves the sync schedule alone. `None` when the run is
    /// not mirrored.
    pub async fn sync_run(
        &self,
        credentials: &Credentials,
        run_id: &str,
    ) -> Result<Option<RunRecord>> {
        let token = credentials
            .netlify()
            .ok_or_else(|| anyhow!("missing Netlify access token"))?;
        let Some(local) = self.store.get_run(run_id).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let remote = self.source.get_run(token, run_id).await?;
        self.apply_to_existing(&local, &remote, now).await?;

        let mut report = PassReport::default();
        if let Err(e) = self
            .reconcile_sessions(token, run_id, now, &mut report)
            .await
        {
            warn!("Failed to mirror sessions of run {}: {:#}", run_id, e);
        }
        self.store.get_run(run_id).await
    }

    /// Upserts the remote site list; each site keeps its `sync_enabled` flag.
    pub async fn refresh_sites(&self, credentials: &Credentials) -> Result<Vec<SiteRecord>> {
        let token = credentials
            .netlify()
            .ok_or_else(|| anyhow!("missing Netlify access token"))?;
        let now = Utc::now();
        let remote_sites = self.source.list_sites(token).await?;
        for site in &remote_sites {
            self.store.upsert_site(&site.id, &site.name, now).await?;
        }
        info!("Refreshed {} site(s)", remote_sites.len());
        self.store.list_sites().await
    }
}

fn prefer_remote(remote: Option<&str>, local: Option<&String>) -> Option<String> {
    present(remote)
        .map(str::to_string)
        .or_else(|| local.cloned())
}

/// Remote values win unless they are empty, in which case the mirror keeps
/// what it already knows.
pub(crate) fn merge_remote_fields(local: &RunRecord, remote: &RemoteRun) -> RunRemoteFields {
    RunRemoteFields {
        state: remote
            .state
            .as_deref()
            .and_then(RunState::parse)
            .unwrap_or(local.state),
        pull_request_url: prefer_remote(remote.pr_url.as_deref(), local.pull_request_url.as_ref()),
        pull_request_state: prefer_remote(
            remote.pr_state.as_deref(),
            local.pull_request_state.as_ref(),
        ),
        pull_request_branch: prefer_remote(
            remote.pr_branch.as_deref(),
            local.pull_request_branch.as_ref(),
        ),
        deploy_preview_url: prefer_remote(
            remote.latest_session_deploy_url.as_deref(),
            local.deploy_preview_url.as_ref(),
        ),
    }
}

pub(crate) fn discovered_run(site: &SiteRecord, remote: &RemoteRun, now: DateTime<Utc>) -> RunRecord {
    let owned = |v: Option<&String>| present(v.map(String::as_str)).map(str::to_string);
    RunRecord {
        id: remote.id.clone(),
        site_id: site.id.clone(),
        site_name: Some(site.name.clone()),
        title: owned(remote.title.as_ref()),
        state: remote
            .state
            .as_deref()
            .and_then(RunState::parse)
            .unwrap_or(RunState::New),
        branch: owned(remote.branch.as_ref()),
        pull_request_url: owned(remote.pr_url.as_ref()),
        pull_request_state: owned(remote.pr_state.as_ref()),
        pull_request_branch: owned(remote.pr_branch.as_ref()),
        deploy_preview_url: owned(remote.latest_session_deploy_url.as_ref()),
        created_at: remote.created_at.unwrap_or(now),
        updated_at: remote.updated_at.unwrap_or(now),
        synced_at: Some(now),
        archived_at: None,
        pr_committed_at: None,
        pr_needs_update: false,
        pr_check_status: None,
        custom_notes: None,
    }
}

pub(crate) fn discovered_session(
    run_id: &str,
    remote: &RemoteSession,
    now: DateTime<Utc>,
) -> SessionRecord {
    let created_at = remote.created_at.unwrap_or(now);
    SessionRecord {
        id: remote.id.clone(),
        run_id: run_id.to_string(),
        state: present(remote.state.as_deref())
            .unwrap_or("new")
            .to_string(),
        prompt: remote.prompt.clone(),
        created_at,
        updated_at: remote.updated_at.unwrap_or(created_at),
    }
}
