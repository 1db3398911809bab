//! Thin async wrapper around the `git` binary for one working copy.
//!
//! Every invocation carries the configured deadline. Mutating commands take
//! `write_lock` so that actions on disjoint targets, which the executor runs
//! concurrently, never race on the index.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, StewardError};

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to spawn git: {0}")]
    Spawn(String),

    #[error("git {args} timed out after {secs}s")]
    TimedOut { args: String, secs: u64 },

    #[error("git {args} exited with {code}: {stderr}")]
    Failed {
        args: String,
        code: i32,
        stderr: String,
    },
}

impl GitError {
    /// Map into the execution side of the error taxonomy. Non-zero exits are
    /// left to the caller because whether they mean "rejected" depends on the
    /// command.
    pub fn into_execution(self) -> StewardError {
        StewardError::TransientExecution(self.to_string())
    }
}

pub struct GitRepo {
    path: PathBuf,
    deadline: Duration,
    write_lock: Mutex<()>,
}

impl GitRepo {
    /// Open a working copy. Fails with `RepositoryUnavailable` when git is not
    /// installed or `path` holds no `.git` entry.
    pub fn open(path: &Path, deadline: Duration) -> Result<Self> {
        let unavailable = |reason: &str| StewardError::RepositoryUnavailable {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };
        which::which("git").map_err(|_| unavailable("git executable not found on PATH"))?;
        if !path.is_dir() {
            return Err(unavailable("not a directory"));
        }
        // `.git` is a file for linked worktrees and submodules
        if !path.join(".git").exists() {
            return Err(unavailable("not a git working copy"));
        }
        Ok(Self {
            path: path.to_path_buf(),
            deadline,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a read-only git command and return trimmed stdout.
    pub async fn read(&self, args: &[&str]) -> std::result::Result<String, GitError> {
        self.exec(args).await
    }

    /// Run a mutating git command under the working-copy write lock.
    pub async fn write(&self, args: &[&str]) -> std::result::Result<String, GitError> {
        let _guard = self.write_lock.lock().await;
        self.exec(args).await
    }

    /// Run several mutating commands as one critical section. Stops at the
    /// first failure.
    pub async fn write_all(&self, steps: &[&[&str]]) -> std::result::Result<(), GitError> {
        let _guard = self.write_lock.lock().await;
        for args in steps {
            self.exec(args).await?;
        }
        Ok(())
    }

    /// Take the write lock for a sequence that edits files between commands.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Run a git command while the caller holds the guard from [`GitRepo::lock`].
    pub async fn exec_locked(
        &self,
        _guard: &tokio::sync::MutexGuard<'_, ()>,
        args: &[&str],
    ) -> std::result::Result<String, GitError> {
        self.exec(args).await
    }

    async fn exec(&self, args: &[&str]) -> std::result::Result<String, GitError> {
        let joined = args.join(" ");
        debug!(args = %joined, "git");
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| GitError::Spawn(e.to_string()))?;
        let output = tokio::time::timeout(self.deadline, child.wait_with_output())
            .await
            .map_err(|_| GitError::TimedOut {
                args: joined.clone(),
                secs: self.deadline.as_secs(),
            })?
            .map_err(|e| GitError::Spawn(e.to_string()))?;

        if !output.status.success() {
            return Err(GitError::Failed {
                args: joined,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn current_branch(&self) -> std::result::Result<String, GitError> {
        self.read(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    pub async fn head(&self) -> std::result::Result<String, GitError> {
        self.read(&["rev-parse", "HEAD"]).await
    }

    /// Commit id that `rev` names.
    pub async fn rev_parse(&self, rev: &str) -> std::result::Result<String, GitError> {
        self.read(&["rev-parse", "--verify", rev]).await
    }

    /// Contents of `path` at `rev`, or `None` when `rev` or the path does
    /// not exist.
    pub async fn show_file(
        &self,
        rev: &str,
        path: &str,
    ) -> std::result::Result<Option<String>, GitError> {
        let spec = format!("{rev}:{path}");
        match self.read(&["cat-file", "-p", &spec]).await {
            Ok(contents) => Ok(Some(contents)),
            Err(GitError::Failed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn local_branches(&self) -> std::result::Result<Vec<String>, GitError> {
        let out = self
            .read(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])
            .await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    pub async fn branch_exists(&self, name: &str) -> std::result::Result<bool, GitError> {
        let refname = format!("refs/heads/{name}");
        match self.read(&["show-ref", "--verify", "--quiet", &refname]).await {
            Ok(_) => Ok(true),
            Err(GitError::Failed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Paths changed between `from` and `to`, sorted.
    pub async fn changed_paths(
        &self,
        from: &str,
        to: &str,
    ) -> std::result::Result<Vec<String>, GitError> {
        let out = self.read(&["diff", "--name-only", from, to]).await?;
        let mut paths: Vec<String> = out
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        paths.sort();
        Ok(paths)
    }

    pub async fn has_commit(&self, rev: &str) -> std::result::Result<bool, GitError> {
        let spec = format!("{rev}^{{commit}}");
        match self.read(&["cat-file", "-e", &spec]).await {
            Ok(_) => Ok(true),
            Err(GitError::Failed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Synchronization
    // -----------------------------------------------------------------------

    /// Fetch `remote` and fast-forward `branch` to it. Never rewrites local
    /// history: a diverged branch is reported, not reset. A branch that is
    /// not checked out is updated by ref without touching the working tree.
    pub async fn sync(&self, remote: &str, branch: &str) -> std::result::Result<(), GitError> {
        let _guard = self.write_lock.lock().await;
        self.exec(&["fetch", "--prune", remote]).await?;
        let current = self.exec(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        if current == branch {
            let upstream = format!("{remote}/{branch}");
            self.exec(&["merge", "--ff-only", &upstream]).await?;
        } else {
            // fetch refuses non-fast-forward updates to local branches
            let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
            self.exec(&["fetch", remote, &refspec]).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{commit_file, git, init_repo, Upstream};
    use tempfile::TempDir;

    const DEADLINE: Duration = Duration::from_secs(10);

    #[test]
    fn open_rejects_plain_directory() {
        let dir = TempDir::new().unwrap();
        let err = GitRepo::open(dir.path(), Duration::from_secs(5))
            .err()
            .expect("plain dir must be rejected");
        assert!(matches!(err, StewardError::RepositoryUnavailable { .. }));
    }

    #[test]
    fn open_rejects_missing_path() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(GitRepo::open(&missing, Duration::from_secs(5)).is_err());
    }

    #[test]
    fn timeout_maps_to_transient_execution() {
        let err = GitError::TimedOut {
            args: "push origin main".into(),
            secs: 30,
        };
        assert!(err.into_execution().is_retryable());
    }

    #[tokio::test]
    async fn show_file_reads_committed_contents() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        commit_file(dir.path(), "MAINTAINERS", "alice\nbob\n", "add maintainers");
        std::fs::write(dir.path().join("MAINTAINERS"), "uncommitted\n").unwrap();

        let repo = GitRepo::open(dir.path(), DEADLINE).unwrap();
        assert_eq!(
            repo.show_file("HEAD", "MAINTAINERS").await.unwrap().as_deref(),
            Some("alice\nbob")
        );
        assert_eq!(repo.show_file("HEAD", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sync_fast_forwards_checked_out_branch() {
        let up = Upstream::new();
        let other = up.other_clone("other");
        let pushed = commit_file(&other, "a.txt", "a\n", "upstream change");
        git(&other, &["push", "-q", "origin", "main"]);

        let repo = GitRepo::open(&up.work, DEADLINE).unwrap();
        repo.sync("origin", "main").await.unwrap();
        assert_eq!(repo.head().await.unwrap(), pushed);
    }

    #[tokio::test]
    async fn sync_updates_other_branch_without_touching_checkout() {
        let up = Upstream::new();
        let main_head = git(&up.work, &["rev-parse", "HEAD"]);
        git(&up.work, &["push", "-q", "origin", "main:release"]);
        git(&up.work, &["fetch", "-q", "origin", "release:release"]);

        let other = up.other_clone("other");
        git(&other, &["checkout", "-q", "release"]);
        let pushed = commit_file(&other, "r.txt", "r\n", "release fix");
        git(&other, &["push", "-q", "origin", "release"]);

        let repo = GitRepo::open(&up.work, DEADLINE).unwrap();
        repo.sync("origin", "release").await.unwrap();

        assert_eq!(repo.current_branch().await.unwrap(), "main");
        assert_eq!(repo.head().await.unwrap(), main_head);
        assert_eq!(repo.rev_parse("refs/heads/release").await.unwrap(), pushed);
        assert!(!up.work.join("r.txt").exists());
    }

    #[tokio::test]
    async fn sync_refuses_diverged_branch() {
        let up = Upstream::new();
        let other = up.other_clone("other");
        commit_file(&other, "a.txt", "theirs\n", "upstream change");
        git(&other, &["push", "-q", "origin", "main"]);
        let local = commit_file(&up.work, "b.txt", "ours\n", "local change");

        let repo = GitRepo::open(&up.work, DEADLINE).unwrap();
        assert!(matches!(
            repo.sync("origin", "main").await,
            Err(GitError::Failed { .. })
        ));
        assert_eq!(repo.head().await.unwrap(), local);
    }
}
