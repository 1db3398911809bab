//! Subsets of the REST API payloads that steward reads.

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Label {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct User {
    pub login: String,
}

/// Row of `GET /repos/{repo}/issues`; pull requests appear here too, with
/// `pull_request` set.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Issue {
    pub number: u64,
    pub state: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub user: Option<User>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PullHead {
    pub sha: String,
}

/// Row of `GET /repos/{repo}/pulls`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Pull {
    pub number: u64,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub head: PullHead,
}

/// `GET /repos/{repo}/commits/{ref}/status`. `state` is `pending` both when
/// contexts are still running and when there are none at all.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CombinedStatus {
    pub state: String,
    #[serde(default)]
    pub statuses: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CheckRun {
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
}

/// `GET /repos/{repo}/commits/{ref}/check-runs`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CheckRuns {
    #[serde(default)]
    pub check_runs: Vec<CheckRun>,
}

/// Error body returned on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiMessage {
    pub message: String,
}
