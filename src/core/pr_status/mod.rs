//! On-demand pull-request status for displayed runs.
//!
//! Independent of the adaptive sync schedule: every call either hits the
//! short-lived cache or fans out to the review source once. Any upstream
//! failure yields `None`, which callers render as "status unknown".

mod cache;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

pub use cache::TtlCache;

use crate::core::config::Credentials;
use crate::core::github::status::{
    CheckStatus, PrCheck, ReviewDecision, checks_from_runs, checks_from_statuses,
    deploy_preview_from_statuses, overall_check_status, review_decision,
};
use crate::core::github::{PrRef, ReviewSource};
use crate::core::store::{MirrorStore, RunRecord};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrStatus {
    pub mergeable: Option<bool>,
    pub mergeable_state: String,
    pub review_decision: Option<ReviewDecision>,
    pub overall_check_status: Option<CheckStatus>,
    pub checks: Vec<PrCheck>,
    pub checks_url: String,
    pub deploy_preview_url: Option<String>,
    /// Commits on the base branch the head lacks; `None` when the compare failed.
    pub behind_by: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub enum PrTarget<'a> {
    Run(&'a str),
    Url(&'a str),
}

pub struct PrStatusEnricher {
    store: MirrorStore,
    source: Arc<dyn ReviewSource>,
    cache: TtlCache<PrStatus>,
}

impl PrStatusEnricher {
    pub fn new(store: MirrorStore, source: Arc<dyn ReviewSource>, ttl: Duration) -> Self {
        Self {
            store,
            source,
            cache: TtlCache::new(ttl),
        }
    }

    pub async fn get_pr_status(
        &self,
        target: PrTarget<'_>,
        credentials: &Credentials,
    ) -> Option<PrStatus> {
        self.get_pr_status_at(target, credentials, Utc::now()).await
    }

    pub async fn get_pr_status_at(
        &self,
        target: PrTarget<'_>,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Option<PrStatus> {
        let (run, pr_url) = match self.resolve(target).await {
            Ok(Some(resolved)) => resolved,
            Ok(None) => return None,
            Err(e) => {
                warn!("Could not resolve PR target {:?}: {:#}", target, e);
                return None;
            }
        };

        if let Some(hit) = self.cache.get_at(&pr_url, now) {
            debug!("PR status cache hit for {}", pr_url);
            return Some(hit);
        }

        let mut status = match self.fetch(&pr_url, credentials.github()).await {
            Ok(status) => status,
            Err(e) => {
                warn!("PR status for {} unavailable: {:#}", pr_url, e);
                return None;
            }
        };
        if status.deploy_preview_url.is_none() {
            status.deploy_preview_url = run.as_ref().and_then(|r| r.deploy_preview_url.clone());
        }
        self.cache.insert_at(&pr_url, status.clone(), now);

        if let Some(run) = run
            && let Err(e) = self.persist_on_run(&run, &status).await
        {
            warn!("Failed to store PR status on run {}: {:#}", run.id, e);
        }
        Some(status)
    }

    /// Drops the cached status so the next read refetches.
    pub fn invalidate(&self, pr_url: &str) {
        self.cache.invalidate(pr_url);
    }

    async fn resolve(&self, target: PrTarget<'_>) -> Result<Option<(Option<RunRecord>, String)>> {
        match target {
            PrTarget::Run(run_id) => {
                let Some(run) = self.store.get_run(run_id).await? else {
                    return Ok(None);
                };
                let Some(url) = run
                    .pull_request_url
                    .clone()
                    .filter(|u| !u.trim().is_empty())
                else {
                    return Ok(None);
                };
                Ok(Some((Some(run), url)))
            }
            PrTarget::Url(url) => {
                let run = self.store.find_run_by_pull_request_url(url).await?;
                Ok(Some((run, url.to_string())))
            }
        }
    }

    async fn fetch(&self, pr_url: &str, token: Option<&str>) -> Result<PrStatus> {
        let pr = PrRef::parse(pr_url)?;
        let detail = self.source.pull_request(token, &pr).await?;
        let head = detail.head.sha.as_str();
        if head.is_empty() {
            return Err(anyhow!("pull request {} has no head commit", pr_url));
        }

        let (reviews, ci, comparison) = tokio::join!(
            self.source.reviews(token, &pr),
            async {
                tokio::try_join!(
                    self.source.check_runs(token, &pr, head),
                    self.source.commit_statuses(token, &pr, head)
                )
            },
            self.source
                .compare(token, &pr, &detail.base.ref_name, head)
        );
        let reviews = reviews?;
        let (check_runs, statuses) = ci?;
        let behind_by = match comparison {
            Ok(c) => Some(c.behind_by),
            Err(e) => {
                debug!("Compare for {} failed: {:#}", pr_url, e);
                None
            }
        };

        let mut checks = checks_from_runs(&check_runs);
        checks.extend(checks_from_statuses(&statuses));

        Ok(PrStatus {
            mergeable: detail.mergeable,
            mergeable_state: detail
                .mergeable_state
                .unwrap_or_else(|| "unknown".to_string()),
            review_decision: review_decision(&reviews),
            overall_check_status: overall_check_status(&checks),
            checks,
            checks_url: format!("{}/checks", pr_url.trim_end_matches('/')),
            deploy_preview_url: deploy_preview_from_statuses(&statuses),
            behind_by,
        })
    }

    async fn persist_on_run(&self, run: &RunRecord, status: &PrStatus) -> Result<()> {
        if let Some(overall) = status.overall_check_status
            && run.pr_check_status.as_deref() != Some(overall.as_str())
        {
            self.store
                .set_pr_check_status(&run.id, Some(overall.as_str()))
                .await?;
        }
        if let Some(url) = status.deploy_preview_url.as_deref()
            && run.deploy_preview_url.as_deref() != Some(url)
        {
            self.store.set_deploy_preview_url(&run.id, url).await?;
        }
        Ok(())
    }
}
