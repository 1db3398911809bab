//! Remote-API capability used by the executor for subject-level actions.

use serde::Serialize;

use crate::error::Result;

/// How the remote answered a mutation that reached it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RemoteResponse {
    Done,
    /// The remote refused on current state (head moved, already merged,
    /// unknown subject). Recorded as a failed outcome; the next cycle
    /// re-derives from fresh state.
    Rejected(String),
}

#[allow(async_fn_in_trait)]
pub trait RemoteClient {
    async fn comment(&self, subject: &str, body: &str) -> Result<RemoteResponse>;
    async fn add_labels(&self, subject: &str, labels: &[String]) -> Result<RemoteResponse>;
    async fn close(&self, subject: &str) -> Result<RemoteResponse>;
    async fn merge(&self, subject: &str, method: Option<&str>) -> Result<RemoteResponse>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectType {
    PullRequest,
    Issue,
}

/// Split `PR-42` / `ISSUE-7` into type and number.
pub fn parse_subject(id: &str) -> Option<(SubjectType, u64)> {
    let (ty, num) = if let Some(n) = id.strip_prefix("PR-") {
        (SubjectType::PullRequest, n)
    } else if let Some(n) = id.strip_prefix("ISSUE-") {
        (SubjectType::Issue, n)
    } else {
        return None;
    };
    num.parse().ok().map(|n| (ty, n))
}

pub fn subject_id(ty: SubjectType, number: u64) -> String {
    match ty {
        SubjectType::PullRequest => format!("PR-{number}"),
        SubjectType::Issue => format!("ISSUE-{number}"),
    }
}

/// Split a comma-separated `labels` parameter.
pub fn split_labels(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
