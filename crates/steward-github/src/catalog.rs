use steward_core::remote::{subject_id, SubjectType};
use steward_core::snapshot::{Subject, SubjectCatalog};
use steward_core::types::CheckStatus;
use tracing::debug;

use crate::client::{GitHubClient, PER_PAGE};
use crate::error::Result;
use crate::wire::{CheckRun, CheckRuns, CombinedStatus, Issue, Label, Pull};

/// Check-run conclusions that block a merge.
const FAILED_CONCLUSIONS: &[&str] = &[
    "failure",
    "timed_out",
    "cancelled",
    "action_required",
    "startup_failure",
];

fn label_names(labels: Vec<Label>) -> Vec<String> {
    labels.into_iter().map(|l| l.name).collect()
}

/// Map a combined commit status. A commit with no statuses reports
/// `pending`.
fn check_status(state: &str) -> CheckStatus {
    match state {
        "success" => CheckStatus::Passing,
        "failure" | "error" => CheckStatus::Failing,
        _ => CheckStatus::Pending,
    }
}

/// Fold legacy commit statuses and check runs into one verdict. Any
/// failure fails; otherwise anything still running is pending; a commit
/// nothing reported on is pending too.
fn fold_checks(status: &CombinedStatus, runs: &[CheckRun]) -> CheckStatus {
    let legacy = if status.statuses.is_empty() {
        None
    } else {
        Some(check_status(&status.state))
    };
    let run_failed = runs.iter().any(|r| {
        r.conclusion
            .as_deref()
            .is_some_and(|c| FAILED_CONCLUSIONS.contains(&c))
    });
    if legacy == Some(CheckStatus::Failing) || run_failed {
        return CheckStatus::Failing;
    }
    let run_pending = runs.iter().any(|r| r.status != "completed");
    if legacy == Some(CheckStatus::Pending) || run_pending {
        return CheckStatus::Pending;
    }
    if legacy.is_some() || !runs.is_empty() {
        CheckStatus::Passing
    } else {
        CheckStatus::Pending
    }
}

impl GitHubClient {
    async fn checks_for(&self, sha: &str) -> Result<CheckStatus> {
        let request = self.get(&format!("commits/{sha}/status"));
        let status: CombinedStatus = self.json("combined status", request).await?;

        let mut runs = Vec::new();
        let mut page = 1u32;
        loop {
            let request = self
                .get(&format!("commits/{sha}/check-runs"))
                .query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())]);
            let chunk: CheckRuns = self.json("list check runs", request).await?;
            let len = chunk.check_runs.len();
            runs.extend(chunk.check_runs);
            if len < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(fold_checks(&status, &runs))
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>> {
        let pulls: Vec<Pull> = self
            .paged("list pulls", "pulls", &[("state", "open")])
            .await?;
        let issues: Vec<Issue> = self
            .paged("list issues", "issues", &[("state", "open")])
            .await?;

        let mut subjects = Vec::with_capacity(pulls.len() + issues.len());
        for pull in pulls {
            let mut subject = Subject::new(subject_id(SubjectType::PullRequest, pull.number));
            subject.checks = self.checks_for(&pull.head.sha).await?;
            subject.labels = label_names(pull.labels);
            subjects.push(subject);
        }
        for issue in issues.into_iter().filter(|i| !i.is_pull_request()) {
            let mut subject = Subject::new(subject_id(SubjectType::Issue, issue.number));
            subject.labels = label_names(issue.labels);
            subjects.push(subject);
        }
        debug!(repo = self.repo(), subjects = subjects.len(), "listed open subjects");
        Ok(subjects)
    }
}

impl SubjectCatalog for GitHubClient {
    async fn open_subjects(&self) -> steward_core::Result<Vec<Subject>> {
        self.list_subjects().await.map_err(|e| e.into_source())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use std::time::Duration;
    use steward_core::StewardError;

    #[tokio::test]
    async fn lists_pulls_with_checks_and_plain_issues() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/repos/acme/widgets/pulls")
            .match_query(Matcher::UrlEncoded("state".into(), "open".into()))
            .with_status(200)
            .with_body(
                r#"[{"number": 42, "labels": [{"name": "ready"}], "head": {"sha": "abc"}}]"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/widgets/commits/abc/status")
            .with_status(200)
            .with_body(r#"{"state": "pending", "statuses": []}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/widgets/commits/abc/check-runs")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"total_count": 1, "check_runs": [{"status": "completed", "conclusion": "success"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/widgets/issues")
            .match_query(Matcher::UrlEncoded("state".into(), "open".into()))
            .with_status(200)
            .with_body(
                r#"[
                {"number": 42, "state": "open", "labels": [], "created_at": "2024-05-01T10:00:00Z",
                 "updated_at": "2024-05-01T10:00:00Z", "pull_request": {}},
                {"number": 7, "state": "open", "labels": [{"name": "bug"}],
                 "created_at": "2024-05-01T10:00:00Z", "updated_at": "2024-05-02T10:00:00Z"}
            ]"#,
            )
            .create_async()
            .await;

        let client =
            GitHubClient::new(&server.url(), "acme/widgets", "t", Duration::from_secs(5)).unwrap();
        let subjects = client.open_subjects().await.unwrap();
        assert_eq!(subjects.len(), 2);
        assert_eq!(subjects[0].id, "PR-42");
        assert_eq!(subjects[0].checks, CheckStatus::Passing);
        assert!(subjects[0].has_label("ready"));
        assert_eq!(subjects[1].id, "ISSUE-7");
        assert!(subjects[1].has_label("bug"));
    }

    #[tokio::test]
    async fn forbidden_listing_is_authentication_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/repos/acme/widgets/pulls")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"message": "Resource not accessible by integration"}"#)
            .create_async()
            .await;

        let client =
            GitHubClient::new(&server.url(), "acme/widgets", "t", Duration::from_secs(5)).unwrap();
        let err = client.open_subjects().await.unwrap_err();
        assert!(matches!(err, StewardError::Authentication(_)));
    }

    async fn checks(status: &str, runs: &str) -> CheckStatus {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/repos/acme/widgets/commits/abc/status")
            .with_status(200)
            .with_body(status)
            .create_async()
            .await;
        let runs_mock = server
            .mock("GET", "/repos/acme/widgets/commits/abc/check-runs")
            .match_query(Matcher::UrlEncoded("per_page".into(), "100".into()))
            .with_status(200)
            .with_body(runs)
            .create_async()
            .await;
        let client =
            GitHubClient::new(&server.url(), "acme/widgets", "t", Duration::from_secs(5)).unwrap();
        let verdict = client.checks_for("abc").await.unwrap();
        runs_mock.assert_async().await;
        verdict
    }

    const NO_STATUSES: &str = r#"{"state": "pending", "statuses": []}"#;

    #[tokio::test]
    async fn successful_check_runs_pass() {
        let runs = r#"{"check_runs": [
            {"status": "completed", "conclusion": "success"},
            {"status": "completed", "conclusion": "skipped"}
        ]}"#;
        assert_eq!(checks(NO_STATUSES, runs).await, CheckStatus::Passing);
    }

    #[tokio::test]
    async fn failed_check_run_fails_despite_green_status() {
        let status = r#"{"state": "success", "statuses": [{"context": "ci/legacy", "state": "success"}]}"#;
        let runs = r#"{"check_runs": [
            {"status": "completed", "conclusion": "success"},
            {"status": "completed", "conclusion": "timed_out"}
        ]}"#;
        assert_eq!(checks(status, runs).await, CheckStatus::Failing);
    }

    #[tokio::test]
    async fn running_check_run_is_pending() {
        let runs = r#"{"check_runs": [
            {"status": "completed", "conclusion": "success"},
            {"status": "in_progress", "conclusion": null}
        ]}"#;
        assert_eq!(checks(NO_STATUSES, runs).await, CheckStatus::Pending);
    }

    #[tokio::test]
    async fn legacy_status_still_counts_without_check_runs() {
        let failing = r#"{"state": "failure", "statuses": [{"context": "ci", "state": "failure"}]}"#;
        let passing = r#"{"state": "success", "statuses": [{"context": "ci", "state": "success"}]}"#;
        let empty = r#"{"total_count": 0, "check_runs": []}"#;
        assert_eq!(checks(failing, empty).await, CheckStatus::Failing);
        assert_eq!(checks(passing, empty).await, CheckStatus::Passing);
        assert_eq!(checks(NO_STATUSES, empty).await, CheckStatus::Pending);
    }

    #[test]
    fn maps_combined_status() {
        assert_eq!(check_status("success"), CheckStatus::Passing);
        assert_eq!(check_status("error"), CheckStatus::Failing);
        assert_eq!(check_status("pending"), CheckStatus::Pending);
    }
}
