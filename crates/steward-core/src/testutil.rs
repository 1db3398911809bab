//! Scratch git repositories for tests that drive the real `git` binary.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// Run git in `dir`, panicking on failure. Returns trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// Identity and signing settings so commits work on any machine.
pub fn configure(dir: &Path) {
    git(dir, &["config", "user.name", "Steward Test"]);
    git(dir, &["config", "user.email", "steward@example.com"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

/// Stage everything and commit, returning the new head.
pub fn commit_file(dir: &Path, rel: &str, contents: &str, message: &str) -> String {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
    git(dir, &["add", "--", rel]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

/// Make `dir` a repository on `main` with one empty commit.
pub fn init_repo(dir: &Path) {
    git(dir, &["init", "-q", "-b", "main"]);
    configure(dir);
    git(dir, &["commit", "-q", "--allow-empty", "-m", "init"]);
}

/// Install an executable hook script.
#[cfg(unix)]
pub fn install_hook(git_dir: &Path, name: &str, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    let hooks = git_dir.join("hooks");
    std::fs::create_dir_all(&hooks).unwrap();
    let path = hooks.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// A bare `origin` and a working clone on `main` that tracks it.
pub struct Upstream {
    _dir: TempDir,
    pub bare: PathBuf,
    pub work: PathBuf,
}

impl Upstream {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let bare = dir.path().join("origin.git");
        let work = dir.path().join("work");
        std::fs::create_dir_all(&bare).unwrap();
        std::fs::create_dir_all(&work).unwrap();
        git(&bare, &["init", "-q", "--bare", "-b", "main"]);
        init_repo(&work);
        git(&work, &["remote", "add", "origin", bare.to_str().unwrap()]);
        git(&work, &["push", "-q", "-u", "origin", "main"]);
        Self {
            _dir: dir,
            bare,
            work,
        }
    }

    /// A second clone of `origin`, for pushing changes the working clone has
    /// not seen.
    pub fn other_clone(&self, name: &str) -> PathBuf {
        let path = self.bare.parent().unwrap().join(name);
        let parent = self.bare.parent().unwrap();
        git(
            parent,
            &["clone", "-q", self.bare.to_str().unwrap(), path.to_str().unwrap()],
        );
        configure(&path);
        path
    }
}
