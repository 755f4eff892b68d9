use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::{
    CheckRun, CommitStatus, Comparison, MergeOutcome, PrRef, PullRequestDetail, Review,
    ReviewSource,
};

#[derive(Deserialize)]
struct CheckRunsPage {
    #[serde(default)]
    check_runs: Vec<CheckRun>,
}

/// REST client for the GitHub v3 API. Calls go out unauthenticated when no
/// token is configured, which only works for public repositories.
pub struct GithubClient {
    client: Client,
    base_url: String,
}

impl GithubClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("runmirror/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn repo_url(&self, pr: &PrRef, path: &str) -> String {
        format!("{}/repos/{}/{}{}", self.base_url, pr.owner, pr.repo, path)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        token: Option<&str>,
    ) -> Result<T> {
        let mut req = req
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(anyhow!(
                "GitHub API error ({}): {}",
                status,
                res.text().await.unwrap_or_default()
            ));
        }
        Ok(res.json().await?)
    }
}

#[async_trait]
impl ReviewSource for GithubClient {
    async fn pull_request(&self, token: Option<&str>, pr: &PrRef) -> Result<PullRequestDetail> {
        let req = self
            .client
            .get(self.repo_url(pr, &format!("/pulls/{}", pr.number)));
        self.send_json(req, token).await
    }

    async fn reviews(&self, token: Option<&str>, pr: &PrRef) -> Result<Vec<Review>> {
        let req = self
            .client
            .get(self.repo_url(pr, &format!("/pulls/{}/reviews", pr.number)))
            .query(&[("per_page", "100")]);
        self.send_json(req, token).await
    }

    async fn check_runs(
        &self,
        token: Option<&str>,
        pr: &PrRef,
        sha: &str,
    ) -> Result<Vec<CheckRun>> {
        let req = self
            .client
            .get(self.repo_url(pr, &format!("/commits/{}/check-runs", sha)))
            .query(&[("per_page", "100")]);
        let page: CheckRunsPage = self.send_json(req, token).await?;
        Ok(page.check_runs)
    }

    async fn commit_statuses(
        &self,
        token: Option<&str>,
        pr: &PrRef,
        sha: &str,
    ) -> Result<Vec<CommitStatus>> {
        let req = self
            .client
            .get(self.repo_url(pr, &format!("/commits/{}/statuses", sha)))
            .query(&[("per_page", "100")]);
        self.send_json(req, token).await
    }

    async fn compare(
        &self,
        token: Option<&str>,
        pr: &PrRef,
        base: &str,
        head: &str,
    ) -> Result<Comparison> {
        let req = self
            .client
            .get(self.repo_url(pr, &format!("/compare/{}...{}", base, head)));
        self.send_json(req, token).await
    }

    async fn merge_pull_request(&self, token: Option<&str>, pr: &PrRef) -> Result<MergeOutcome> {
        let req = self
            .client
            .put(self.repo_url(pr, &format!("/pulls/{}/merge", pr.number)))
            .json(&serde_json::json!({}));
        self.send_json(req, token).await
    }
}
