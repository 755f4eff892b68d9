//! Pull-request review, check and status data from GitHub.

mod client;
pub mod status;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

pub use client::GithubClient;

/// Owner/repo/number triple addressed by a pull-request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PrRef {
    /// Accepts `https://github.com/{owner}/{repo}/pull/{number}` with any
    /// trailing segments (`/files`, `/checks`, ...).
    pub fn parse(pr_url: &str) -> Result<Self> {
        let url = Url::parse(pr_url.trim())?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        match segments.as_slice() {
            [owner, repo, "pull", number, ..] => Ok(Self {
                owner: owner.to_string(),
                repo: repo.to_string(),
                number: number
                    .parse()
                    .map_err(|_| anyhow!("invalid pull request number in '{}'", pr_url))?,
            }),
            _ => Err(anyhow!("not a pull request URL: '{}'", pr_url)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitRef {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestDetail {
    pub head: GitRef,
    pub base: GitRef,
    #[serde(default)]
    pub mergeable: Option<bool>,
    #[serde(default)]
    pub mergeable_state: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewUser {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Review {
    #[serde(default)]
    pub user: Option<ReviewUser>,
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub details_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Legacy commit status; GitHub lists these newest first.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitStatus {
    pub context: String,
    pub state: String,
    #[serde(default)]
    pub target_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comparison {
    pub behind_by: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeOutcome {
    pub merged: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Read side of the code-review host, plus the one write the UI needs.
#[async_trait]
pub trait ReviewSource: Send + Sync {
    async fn pull_request(&self, token: Option<&str>, pr: &PrRef) -> Result<PullRequestDetail>;

    async fn reviews(&self, token: Option<&str>, pr: &PrRef) -> Result<Vec<Review>>;

    async fn check_runs(&self, token: Option<&str>, pr: &PrRef, sha: &str)
    -> Result<Vec<CheckRun>>;

    async fn commit_statuses(
        &self,
        token: Option<&str>,
        pr: &PrRef,
        sha: &str,
    ) -> Result<Vec<CommitStatus>>;

    async fn compare(
        &self,
        token: Option<&str>,
        pr: &PrRef,
        base: &str,
        head: &str,
    ) -> Result<Comparison>;

    async fn merge_pull_request(&self, token: Option<&str>, pr: &PrRef) -> Result<MergeOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_pull_request_url() {
        let pr = PrRef::parse("https://github.com/acme/site/pull/42").unwrap();
        assert_eq!(
            pr,
            PrRef {
                owner: "acme".to_string(),
                repo: "site".to_string(),
                number: 42
            }
        );
    }

    #[test]
    fn parses_url_with_trailing_segments() {
        let pr = PrRef::parse("https://github.com/acme/site/pull/7/checks/").unwrap();
        assert_eq!(pr.number, 7);
    }

    #[test]
    fn rejects_non_pull_request_urls() {
        assert!(PrRef::parse("https://github.com/acme/site/issues/7").is_err());
        assert!(PrRef::parse("https://github.com/acme/site/pull/abc").is_err());
        assert!(PrRef::parse("not a url").is_err());
    }

    #[test]
    fn pull_request_detail_reads_ref_names() {
        let detail: PullRequestDetail = serde_json::from_str(
            r#"{
                "head": {"sha": "abc123", "ref": "agent/run-1"},
                "base": {"sha": "def456", "ref": "main"},
                "mergeable": null,
                "mergeable_state": "unknown"
            }"#,
        )
        .unwrap();
        assert_eq!(detail.head.ref_name, "agent/run-1");
        assert_eq!(detail.base.ref_name, "main");
        assert!(detail.mergeable.is_none());
    }
}
