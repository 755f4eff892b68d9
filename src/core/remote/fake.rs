//! In-memory [`RunSource`] for unit tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{NewRunRequest, RemoteRun, RemoteSession, RemoteSite, RunSource};

#[derive(Default)]
struct State {
    sites: Vec<RemoteSite>,
    runs: HashMap<String, Vec<RemoteRun>>,
    sessions: HashMap<String, Vec<RemoteSession>>,
    failing_sites: HashSet<String>,
    failing_sessions: HashSet<String>,
    list_runs_calls: usize,
    next_id: usize,
}

#[derive(Default)]
pub struct FakeRunSource {
    state: Mutex<State>,
}

pub fn remote_run(id: &str, state: &str) -> RemoteRun {
    RemoteRun {
        id: id.to_string(),
        state: Some(state.to_string()),
        title: Some(format!("Remote {}", id)),
        branch: Some("main".to_string()),
        ..Default::default()
    }
}

pub fn remote_session(id: &str, state: &str) -> RemoteSession {
    RemoteSession {
        id: id.to_string(),
        state: Some(state.to_string()),
        prompt: Some(format!("prompt for {}", id)),
        ..Default::default()
    }
}

impl FakeRunSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_site(&self, id: &str, name: &str) {
        self.state.lock().unwrap().sites.push(RemoteSite {
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    pub fn set_runs(&self, site_id: &str, runs: Vec<RemoteRun>) {
        self.state
            .lock()
            .unwrap()
            .runs
            .insert(site_id.to_string(), runs);
    }

    pub fn set_sessions(&self, run_id: &str, sessions: Vec<RemoteSession>) {
        self.state
            .lock()
            .unwrap()
            .sessions
            .insert(run_id.to_string(), sessions);
    }

    pub fn fail_site(&self, site_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_sites
            .insert(site_id.to_string());
    }

    pub fn fail_sessions(&self, run_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_sessions
            .insert(run_id.to_string());
    }

    pub fn list_runs_calls(&self) -> usize {
        self.state.lock().unwrap().list_runs_calls
    }

    fn find_run(state: &State, run_id: &str) -> Option<RemoteRun> {
        state
            .runs
            .values()
            .flatten()
            .find(|r| r.id == run_id)
            .cloned()
    }

    fn update_run(state: &mut State, run_id: &str, f: impl FnOnce(&mut RemoteRun)) -> Result<RemoteRun> {
        let run = state
            .runs
            .values_mut()
            .flatten()
            .find(|r| r.id == run_id)
            .ok_or_else(|| anyhow!("Netlify API error (404 Not Found): no run {}", run_id))?;
        f(run);
        Ok(run.clone())
    }
}

#[async_trait]
impl RunSource for FakeRunSource {
    async fn list_runs(&self, _token: &str, site_id: &str) -> Result<Vec<RemoteRun>> {
        let mut state = self.state.lock().unwrap();
        state.list_runs_calls += 1;
        if state.failing_sites.contains(site_id) {
            return Err(anyhow!("Netlify API error (502 Bad Gateway): upstream down"));
        }
        Ok(state.runs.get(site_id).cloned().unwrap_or_default())
    }

    async fn get_run(&self, _token: &str, run_id: &str) -> Result<RemoteRun> {
        let state = self.state.lock().unwrap();
        Self::find_run(&state, run_id)
            .ok_or_else(|| anyhow!("Netlify API error (404 Not Found): no run {}", run_id))
    }

    async fn list_sessions(&self, _token: &str, run_id: &str) -> Result<Vec<RemoteSession>> {
        let state = self.state.lock().unwrap();
        if state.failing_sessions.contains(run_id) {
            return Err(anyhow!("Netlify API error (500 Internal Server Error): boom"));
        }
        Ok(state.sessions.get(run_id).cloned().unwrap_or_default())
    }

    async fn list_sites(&self, _token: &str) -> Result<Vec<RemoteSite>> {
        Ok(self.state.lock().unwrap().sites.clone())
    }

    async fn create_run(
        &self,
        _token: &str,
        site_id: &str,
        request: &NewRunRequest,
    ) -> Result<RemoteRun> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let run = RemoteRun {
            id: format!("created-{}", state.next_id),
            state: Some("new".to_string()),
            title: Some(request.prompt.clone()),
            branch: request.branch.clone(),
            ..Default::default()
        };
        state
            .runs
            .entry(site_id.to_string())
            .or_default()
            .push(run.clone());
        Ok(run)
    }

    async fn create_session(
        &self,
        _token: &str,
        run_id: &str,
        prompt: &str,
    ) -> Result<RemoteSession> {
        let mut state = self.state.lock().unwrap();
        if Self::find_run(&state, run_id).is_none() {
            return Err(anyhow!("Netlify API error (404 Not Found): no run {}", run_id));
        }
        state.next_id += 1;
        let session = RemoteSession {
            id: format!("session-{}", state.next_id),
            state: Some("new".to_string()),
            prompt: Some(prompt.to_string()),
            ..Default::default()
        };
        state
            .sessions
            .entry(run_id.to_string())
            .or_default()
            .push(session.clone());
        Ok(session)
    }

    async fn create_pull_request(&self, _token: &str, run_id: &str) -> Result<RemoteRun> {
        let mut state = self.state.lock().unwrap();
        Self::update_run(&mut state, run_id, |run| {
            run.pr_url = Some(format!("https://github.com/acme/site/pull/{}", run_id.len()));
            run.pr_state = Some("open".to_string());
            run.pr_branch = Some(format!("agent/{}", run_id));
        })
    }

    async fn commit_to_pull_request(&self, _token: &str, run_id: &str) -> Result<RemoteRun> {
        let mut state = self.state.lock().unwrap();
        Self::update_run(&mut state, run_id, |_| {})
    }
}
