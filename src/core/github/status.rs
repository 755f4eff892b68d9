//! Normalization of GitHub review and CI data into the shapes the UI shows.
//!
//! Check runs and legacy commit statuses are folded into one [`PrCheck`]
//! list, then reduced with a strict priority: any failure wins, otherwise
//! anything unfinished is pending, otherwise success.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::{CheckRun, CommitStatus, Review};

const FAILING_CONCLUSIONS: &[&str] = &["failure", "timed_out", "action_required"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrCheck {
    pub name: String,
    pub status: String,
    pub conclusion: Option<String>,
    pub details_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pending,
    Success,
    Failure,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pending => "pending",
            CheckStatus::Success => "success",
            CheckStatus::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
    Pending,
}

pub fn checks_from_runs(runs: &[CheckRun]) -> Vec<PrCheck> {
    runs.iter()
        .map(|run| PrCheck {
            name: run.name.clone(),
            status: run.status.clone(),
            conclusion: run.conclusion.clone(),
            details_url: run.details_url.clone().or_else(|| run.html_url.clone()),
        })
        .collect()
}

/// Keeps the first (newest) status per context.
pub fn checks_from_statuses(statuses: &[CommitStatus]) -> Vec<PrCheck> {
    let mut seen = HashSet::new();
    statuses
        .iter()
        .filter(|s| seen.insert(s.context.as_str()))
        .map(|s| {
            let (status, conclusion) = match s.state.as_str() {
                "pending" => ("in_progress", None),
                "success" => ("completed", Some("success")),
                _ => ("completed", Some("failure")),
            };
            PrCheck {
                name: s.context.clone(),
                status: status.to_string(),
                conclusion: conclusion.map(str::to_string),
                details_url: s.target_url.clone(),
            }
        })
        .collect()
}

pub fn overall_check_status(checks: &[PrCheck]) -> Option<CheckStatus> {
    if checks.is_empty() {
        return None;
    }
    let failed = checks.iter().any(|c| {
        c.conclusion
            .as_deref()
            .is_some_and(|conclusion| FAILING_CONCLUSIONS.contains(&conclusion))
    });
    if failed {
        return Some(CheckStatus::Failure);
    }
    if checks.iter().any(|c| c.status != "completed") {
        return Some(CheckStatus::Pending);
    }
    Some(CheckStatus::Success)
}

/// Reduces each reviewer to their latest qualifying review. `reviews` must
/// be in chronological order, as GitHub returns them.
pub fn review_decision(reviews: &[Review]) -> Option<ReviewDecision> {
    let mut latest: HashMap<&str, &str> = HashMap::new();
    for review in reviews {
        let Some(user) = review.user.as_ref() else {
            continue;
        };
        if matches!(review.state.as_str(), "COMMENTED" | "DISMISSED") {
            continue;
        }
        latest.insert(user.login.as_str(), review.state.as_str());
    }

    if latest.values().any(|s| *s == "CHANGES_REQUESTED") {
        Some(ReviewDecision::ChangesRequested)
    } else if latest.values().any(|s| *s == "APPROVED") {
        Some(ReviewDecision::Approved)
    } else if !latest.is_empty() {
        Some(ReviewDecision::Pending)
    } else {
        None
    }
}

/// The newest successful deploy-preview status carries the preview URL.
pub fn deploy_preview_from_statuses(statuses: &[CommitStatus]) -> Option<String> {
    statuses
        .iter()
        .filter(|s| s.state == "success" && s.context.contains("deploy-preview"))
        .find_map(|s| s.target_url.clone())
        .filter(|url| !url.trim().is_empty())
}
