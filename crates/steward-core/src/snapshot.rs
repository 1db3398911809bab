//! Repository state reader: turns a working copy plus the subject catalog
//! into an immutable [`RepositorySnapshot`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, StewardError};
use crate::git::{GitError, GitRepo};
use crate::types::CheckStatus;

/// Prefix of subject identifiers that name local branches.
pub const BRANCH_SUBJECT_PREFIX: &str = "branch/";

// ---------------------------------------------------------------------------
// Subject
// ---------------------------------------------------------------------------

/// A review or issue known to the maintainer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    #[serde(default = "default_open")]
    pub open: bool,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub checks: CheckStatus,
}

fn default_open() -> bool {
    true
}

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            open: true,
            labels: Vec::new(),
            checks: CheckStatus::Pending,
        }
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_checks(mut self, checks: CheckStatus) -> Self {
        self.checks = checks;
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

// ---------------------------------------------------------------------------
// RepositorySnapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of the working copy and the open subjects. Built fresh
/// each cycle and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    pub branch: String,
    pub head: String,
    /// Paths changed since the reference point, sorted.
    pub changed_paths: Vec<String>,
    pub subjects: BTreeMap<String, Subject>,
    pub branches: Vec<String>,
}

impl RepositorySnapshot {
    pub fn new(branch: impl Into<String>, head: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            head: head.into(),
            changed_paths: Vec::new(),
            subjects: BTreeMap::new(),
            branches: Vec::new(),
        }
    }

    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subjects.insert(subject.id.clone(), subject);
        self
    }

    pub fn with_changed_paths(mut self, paths: &[&str]) -> Self {
        self.changed_paths = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn subject(&self, id: &str) -> Option<&Subject> {
        self.subjects.get(id)
    }

    /// Whether `id` names something this snapshot knows about: an open
    /// subject or an existing local branch.
    pub fn knows(&self, id: &str) -> bool {
        if let Some(name) = id.strip_prefix(BRANCH_SUBJECT_PREFIX) {
            return self.branches.iter().any(|b| b == name);
        }
        self.subjects.get(id).map(|s| s.open).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Source of the subjects (reviews, issues) that are currently open.
#[allow(async_fn_in_trait)]
pub trait SubjectCatalog {
    async fn open_subjects(&self) -> Result<Vec<Subject>>;
}

/// Produces a snapshot of the repository.
#[allow(async_fn_in_trait)]
pub trait StateReader {
    /// `reference` is the head recorded at the previous commit; changed paths
    /// are computed against it.
    async fn snapshot(&self, reference: Option<&str>) -> Result<RepositorySnapshot>;
}

// ---------------------------------------------------------------------------
// GitStateReader
// ---------------------------------------------------------------------------

pub struct GitStateReader<'a, C> {
    repo: &'a GitRepo,
    catalog: &'a C,
    remote: Option<String>,
    branch: Option<String>,
    deadline: Duration,
}

impl<'a, C: SubjectCatalog> GitStateReader<'a, C> {
    pub fn new(repo: &'a GitRepo, catalog: &'a C, deadline: Duration) -> Self {
        Self {
            repo,
            catalog,
            remote: None,
            branch: None,
            deadline,
        }
    }

    /// Synchronize with `remote` before every snapshot.
    pub fn with_remote(mut self, remote: Option<String>) -> Self {
        self.remote = remote;
        self
    }

    /// Track `branch` instead of whatever is checked out.
    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    fn unavailable(&self, e: GitError) -> StewardError {
        StewardError::RepositoryUnavailable {
            path: self.repo.path().display().to_string(),
            reason: e.to_string(),
        }
    }
}

impl<C: SubjectCatalog> StateReader for GitStateReader<'_, C> {
    async fn snapshot(&self, reference: Option<&str>) -> Result<RepositorySnapshot> {
        let current = self
            .repo
            .current_branch()
            .await
            .map_err(|e| self.unavailable(e))?;
        let branch = self.branch.clone().unwrap_or_else(|| current.clone());

        if let Some(remote) = &self.remote {
            self.repo
                .sync(remote, &branch)
                .await
                .map_err(|e| StewardError::SynchronizationFailed(e.to_string()))?;
            info!(remote = %remote, branch = %branch, "synchronized working copy");
        }

        let head = if branch == current {
            self.repo.head().await
        } else {
            self.repo.rev_parse(&format!("refs/heads/{branch}")).await
        }
        .map_err(|e| self.unavailable(e))?;
        let branches = self
            .repo
            .local_branches()
            .await
            .map_err(|e| self.unavailable(e))?;

        let changed_paths = match reference {
            Some(reference) if reference != head => {
                // A reference that vanished (gc, force-push upstream) yields no diff
                if self
                    .repo
                    .has_commit(reference)
                    .await
                    .map_err(|e| self.unavailable(e))?
                {
                    self.repo
                        .changed_paths(reference, &head)
                        .await
                        .map_err(|e| self.unavailable(e))?
                } else {
                    debug!(reference, "reference commit not found, no changed paths");
                    Vec::new()
                }
            }
            _ => Vec::new(),
        };

        let subjects = tokio::time::timeout(self.deadline, self.catalog.open_subjects())
            .await
            .map_err(|_| {
                StewardError::TransientSource(format!(
                    "subject catalog timed out after {}s",
                    self.deadline.as_secs()
                ))
            })??;

        let mut snapshot = RepositorySnapshot {
            branch,
            head,
            changed_paths,
            subjects: BTreeMap::new(),
            branches,
        };
        for subject in subjects {
            snapshot.subjects.insert(subject.id.clone(), subject);
        }
        debug!(
            head = %snapshot.head,
            subjects = snapshot.subjects.len(),
            changed = snapshot.changed_paths.len(),
            "snapshot built"
        );
        Ok(snapshot)
    }
}
