//! Action executor: applies proposed actions idempotently.
//!
//! The ledger lookup in [`Executor::apply`] is the idempotency boundary: a
//! fingerprint already settled is reported as `skipped:already-applied`
//! without touching the working copy or the remote. Actions are grouped by
//! target; groups run concurrently, actions within a group run in order.

use std::path::{Component, Path};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::action::{Action, Fingerprint};
use crate::error::{Result, StewardError};
use crate::git::{GitError, GitRepo};
use crate::ledger::{Ledger, LedgerEntry, Outcome, SkipReason};
use crate::remote::{split_labels, RemoteClient, RemoteResponse};
use crate::snapshot::BRANCH_SUBJECT_PREFIX;
use crate::types::ActionKind;

#[derive(Debug, Clone, Serialize)]
pub struct Executed {
    pub action: Action,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub results: Vec<Executed>,
    /// Shutdown was requested before every action could start.
    pub interrupted: bool,
}

impl ExecutionReport {
    pub fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

pub struct Executor<'a, R> {
    ledger: &'a Ledger,
    remote: &'a R,
    git: Option<&'a GitRepo>,
    git_remote: Option<String>,
    dry_run: bool,
    deadline: Duration,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<'a, R: RemoteClient> Executor<'a, R> {
    pub fn new(ledger: &'a Ledger, remote: &'a R, deadline: Duration) -> Self {
        Self {
            ledger,
            remote,
            git: None,
            git_remote: None,
            dry_run: false,
            deadline,
            shutdown: None,
        }
    }

    pub fn with_git(mut self, git: &'a GitRepo, remote: Option<String>) -> Self {
        self.git = Some(git);
        self.git_remote = remote;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Apply every action, serialized per target.
    pub async fn apply_all(&self, actions: &[Action]) -> Result<ExecutionReport> {
        let mut groups: Vec<(&str, Vec<&Action>)> = Vec::new();
        for action in actions {
            match groups.iter_mut().find(|(t, _)| *t == action.target) {
                Some((_, group)) => group.push(action),
                None => groups.push((action.target.as_str(), vec![action])),
            }
        }

        let runs = groups.into_iter().map(|(_, group)| async move {
            let mut done = Vec::with_capacity(group.len());
            for action in group {
                // Cancellation is honored between actions, never inside one
                if self.shutdown_requested() {
                    return (done, true, None);
                }
                match self.apply(action).await {
                    Ok(outcome) => done.push(Executed {
                        action: action.clone(),
                        outcome,
                    }),
                    Err(e) => return (done, false, Some(e)),
                }
            }
            (done, false, None)
        });

        let mut report = ExecutionReport::default();
        let mut first_error = None;
        for (done, interrupted, error) in join_all(runs).await {
            report.results.extend(done);
            report.interrupted |= interrupted;
            if first_error.is_none() {
                first_error = error;
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Apply one action and record its outcome.
    pub async fn apply(&self, action: &Action) -> Result<Outcome> {
        let fp = &action.fingerprint;
        if let Some(prior) = self.lookup(fp).await? {
            if prior.outcome.is_settled() {
                info!(action = %action, fingerprint = fp.short(), "already applied, skipping");
                return Ok(Outcome::skipped(SkipReason::AlreadyApplied));
            }
            if self.dry_run && prior.outcome == Outcome::skipped(SkipReason::DryRun) {
                return Ok(prior.outcome);
            }
        }

        let outcome = if action.kind == ActionKind::NoOp {
            Outcome::skipped(SkipReason::NoOp)
        } else if self.dry_run {
            info!(action = %action, fingerprint = fp.short(), "dry run, not applying");
            Outcome::skipped(SkipReason::DryRun)
        } else {
            match self.perform(action).await {
                Ok(RemoteResponse::Done) => {
                    info!(action = %action, fingerprint = fp.short(), "applied");
                    Outcome::Applied
                }
                Ok(RemoteResponse::Rejected(reason)) => {
                    warn!(action = %action, fingerprint = fp.short(), reason = %reason, "action rejected");
                    Outcome::failed(reason)
                }
                Err(e) => return Err(e.in_action(action.event.to_string(), fp.to_string())),
            }
        };

        self.record(LedgerEntry::for_action(action, outcome.clone()))
            .await
            .map_err(|e| e.in_action(action.event.to_string(), fp.to_string()))?;
        Ok(outcome)
    }

    // redb calls block on fsync; keep them off the async workers

    async fn lookup(&self, fp: &Fingerprint) -> Result<Option<LedgerEntry>> {
        let ledger = self.ledger.clone();
        let fp = fp.clone();
        tokio::task::spawn_blocking(move || ledger.lookup(&fp))
            .await
            .map_err(|e| StewardError::Ledger(format!("ledger lookup task failed: {e}")))?
    }

    async fn record(&self, entry: LedgerEntry) -> Result<()> {
        let ledger = self.ledger.clone();
        tokio::task::spawn_blocking(move || ledger.record(&entry))
            .await
            .map_err(|e| StewardError::Ledger(format!("ledger record task failed: {e}")))?
    }

    async fn perform(&self, action: &Action) -> Result<RemoteResponse> {
        if action.kind.is_remote() {
            let call = self.perform_remote(action);
            return tokio::time::timeout(self.deadline, call)
                .await
                .map_err(|_| {
                    StewardError::TransientExecution(format!(
                        "{action} timed out after {}s",
                        self.deadline.as_secs()
                    ))
                })?;
        }
        match action.kind {
            ActionKind::CreateBranch => self.create_branch(action).await,
            ActionKind::Push => self.push(action).await,
            _ => Ok(RemoteResponse::Done),
        }
    }

    async fn perform_remote(&self, action: &Action) -> Result<RemoteResponse> {
        let target = action.target.as_str();
        match action.kind {
            ActionKind::Comment => {
                let Some(body) = action.param("body").filter(|b| !b.is_empty()) else {
                    return Ok(RemoteResponse::Rejected("comment has no body".into()));
                };
                self.remote.comment(target, body).await
            }
            ActionKind::Label => {
                let labels = split_labels(action.param("labels").unwrap_or_default());
                if labels.is_empty() {
                    return Ok(RemoteResponse::Rejected("label action has no labels".into()));
                }
                self.remote.add_labels(target, &labels).await
            }
            ActionKind::Close => self.remote.close(target).await,
            ActionKind::Merge => self.remote.merge(target, action.param("method")).await,
            _ => Ok(RemoteResponse::Done),
        }
    }

    // -----------------------------------------------------------------------
    // Working-copy actions
    // -----------------------------------------------------------------------

    fn git(&self) -> Result<&GitRepo> {
        self.git.ok_or_else(|| StewardError::RepositoryUnavailable {
            path: "<none>".into(),
            reason: "no working copy attached to executor".into(),
        })
    }

    async fn create_branch(&self, action: &Action) -> Result<RemoteResponse> {
        let git = self.git()?;
        let name = branch_name(action, "name");
        let from = action.param("from").unwrap_or("HEAD");
        if name.is_empty() {
            return Ok(RemoteResponse::Rejected("branch name is empty".into()));
        }
        if git.branch_exists(name).await.map_err(GitError::into_execution)? {
            return Ok(RemoteResponse::Rejected(format!("branch {name} already exists")));
        }
        rejected_on_failure(git.write(&["branch", name, from]).await)
    }

    async fn push(&self, action: &Action) -> Result<RemoteResponse> {
        let git = self.git()?;
        let Some(remote) = self.git_remote.as_deref() else {
            return Ok(RemoteResponse::Rejected("no git remote configured".into()));
        };
        let branch = branch_name(action, "branch");
        if branch.is_empty() {
            return Ok(RemoteResponse::Rejected("push has no branch".into()));
        }

        let guard = git.lock().await;
        let mut committed = false;

        if let (Some(rel), Some(line)) = (action.param("path"), action.param("append_line")) {
            if line.trim().is_empty() {
                return Ok(RemoteResponse::Rejected("append_line rendered empty".into()));
            }
            if !is_safe_relative(rel) {
                return Ok(RemoteResponse::Rejected(format!("refusing path {rel}")));
            }
            let current = git
                .exec_locked(&guard, &["rev-parse", "--abbrev-ref", "HEAD"])
                .await
                .map_err(GitError::into_execution)?;
            if current != branch {
                return Ok(RemoteResponse::Rejected(format!(
                    "working copy is on {current}, not {branch}"
                )));
            }
            let committed_copy = git
                .show_file("HEAD", rel)
                .await
                .map_err(GitError::into_execution)?;
            if committed_copy.is_some_and(|c| c.lines().any(|l| l == line)) {
                info!(path = rel, line, "line already committed, nothing to commit");
            } else {
                let file = git.path().join(rel);
                let original = match std::fs::read(&file) {
                    Ok(bytes) => Some(bytes),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => return Err(e.into()),
                };
                crate::io::append_line_if_missing(&file, line)?;
                let message = action
                    .param("message")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Add {line} to {rel}"));
                for args in [vec!["add", "--", rel], vec!["commit", "-m", message.as_str()]] {
                    if let Err(e) = git.exec_locked(&guard, &args).await {
                        // Working tree goes back to how it was found
                        restore_file(&file, original.as_deref())?;
                        if let Err(reset) =
                            git.exec_locked(&guard, &["reset", "-q", "--", rel]).await
                        {
                            warn!(error = %reset, path = rel, "could not unstage after failed commit");
                        }
                        return rejected_on_failure::<()>(Err(e));
                    }
                }
                committed = true;
            }
        }

        match git.exec_locked(&guard, &["push", remote, branch]).await {
            Ok(_) => Ok(RemoteResponse::Done),
            Err(GitError::Failed { stderr, .. }) => {
                if committed {
                    // Drop the unpublished commit so the next sync can fast-forward
                    if let Err(e) = git
                        .exec_locked(&guard, &["reset", "--hard", "HEAD~1"])
                        .await
                    {
                        warn!(error = %e, "could not undo local commit after rejected push");
                    }
                }
                Ok(RemoteResponse::Rejected(format!("push rejected: {stderr}")))
            }
            Err(e) => Err(e.into_execution()),
        }
    }
}

/// Branch for a working-copy action: explicit `param`, else the target with
/// any `branch/` prefix removed.
fn branch_name<'a>(action: &'a Action, param: &str) -> &'a str {
    action.param(param).unwrap_or_else(|| {
        action
            .target
            .strip_prefix(BRANCH_SUBJECT_PREFIX)
            .unwrap_or(&action.target)
    })
}

fn rejected_on_failure<T>(result: std::result::Result<T, GitError>) -> Result<RemoteResponse> {
    match result {
        Ok(_) => Ok(RemoteResponse::Done),
        Err(GitError::Failed { args, stderr, .. }) => {
            Ok(RemoteResponse::Rejected(format!("git {args}: {stderr}")))
        }
        Err(e) => Err(e.into_execution()),
    }
}

fn restore_file(path: &Path, original: Option<&[u8]>) -> Result<()> {
    match original {
        Some(bytes) => crate::io::atomic_write(path, bytes),
        None => match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        },
    }
}

fn is_safe_relative(path: &str) -> bool {
    let p = Path::new(path);
    !path.is_empty() && p.components().all(|c| matches!(c, Component::Normal(_)))
}
