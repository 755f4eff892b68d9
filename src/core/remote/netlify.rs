use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::{NewRunRequest, RemoteRun, RemoteSession, RemoteSite, RunSource};

#[derive(Serialize)]
struct NewSessionBody<'a> {
    prompt: &'a str,
}

/// REST client for the agent-runner API.
pub struct NetlifyClient {
    client: Client,
    base_url: String,
}

impl NetlifyClient {
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

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder, token: &str) -> Result<T> {
        let res = req.bearer_auth(token).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(anyhow!(
                "Netlify API error ({}): {}",
                status,
                res.text().await.unwrap_or_default()
            ));
        }
        Ok(res.json().await?)
    }
}

#[async_trait]
impl RunSource for NetlifyClient {
    async fn list_runs(&self, token: &str, site_id: &str) -> Result<Vec<RemoteRun>> {
        let req = self
            .client
            .get(self.url("/agent_runners"))
            .query(&[("site_id", site_id)]);
        self.send_json(req, token).await
    }

    async fn get_run(&self, token: &str, run_id: &str) -> Result<RemoteRun> {
        let req = self
            .client
            .get(self.url(&format!("/agent_runners/{}", run_id)));
        self.send_json(req, token).await
    }

    async fn list_sessions(&self, token: &str, run_id: &str) -> Result<Vec<RemoteSession>> {
        let req = self
            .client
            .get(self.url(&format!("/agent_runners/{}/sessions", run_id)));
        self.send_json(req, token).await
    }

    async fn list_sites(&self, token: &str) -> Result<Vec<RemoteSite>> {
        let req = self.client.get(self.url("/sites"));
        self.send_json(req, token).await
    }

    async fn create_run(
        &self,
        token: &str,
        site_id: &str,
        request: &NewRunRequest,
    ) -> Result<RemoteRun> {
        let req = self
            .client
            .post(self.url("/agent_runners"))
            .query(&[("site_id", site_id)])
            .json(request);
        self.send_json(req, token).await
    }

    async fn create_session(
        &self,
        token: &str,
        run_id: &str,
        prompt: &str,
    ) -> Result<RemoteSession> {
        let req = self
            .client
            .post(self.url(&format!("/agent_runners/{}/sessions", run_id)))
            .json(&NewSessionBody { prompt });
        self.send_json(req, token).await
    }

    async fn create_pull_request(&self, token: &str, run_id: &str) -> Result<RemoteRun> {
        let req = self
            .client
            .post(self.url(&format!("/agent_runners/{}/pull_request", run_id)));
        self.send_json(req, token).await
    }

    async fn commit_to_pull_request(&self, token: &str, run_id: &str) -> Result<RemoteRun> {
        let req = self
            .client
            .post(self.url(&format!("/agent_runners/{}/commit", run_id)));
        self.send_json(req, token).await
    }
}
