//! File-backed stand-in for a hosting service: `.steward/subjects.yaml`
//! holds the reviews and issues, and remote actions edit it in place.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StewardError};
use crate::remote::{RemoteClient, RemoteResponse};
use crate::snapshot::{Subject, SubjectCatalog};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedSubject {
    #[serde(flatten)]
    pub subject: Subject,
    #[serde(default)]
    pub merged: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerFile {
    #[serde(default)]
    pub subjects: Vec<TrackedSubject>,
}

impl TrackerFile {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn get(&self, id: &str) -> Option<&TrackedSubject> {
        self.subjects.iter().find(|s| s.subject.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut TrackedSubject> {
        self.subjects.iter_mut().find(|s| s.subject.id == id)
    }
}

pub struct LocalTracker {
    path: PathBuf,
    // Serializes read-modify-write of the file across concurrent actions
    lock: Mutex<()>,
}

impl LocalTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn load(&self) -> Result<TrackerFile> {
        TrackerFile::load(&self.path)
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut TrackedSubject) -> RemoteResponse) -> Result<RemoteResponse> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StewardError::TransientExecution("tracker lock poisoned".into()))?;
        let mut file = TrackerFile::load(&self.path)?;
        let Some(tracked) = file.get_mut(id) else {
            return Ok(RemoteResponse::Rejected(format!("unknown subject {id}")));
        };
        let response = f(tracked);
        if response == RemoteResponse::Done {
            file.save(&self.path)?;
        }
        Ok(response)
    }
}

impl SubjectCatalog for LocalTracker {
    async fn open_subjects(&self) -> Result<Vec<Subject>> {
        Ok(self
            .load()?
            .subjects
            .into_iter()
            .filter(|t| t.subject.open)
            .map(|t| t.subject)
            .collect())
    }
}

impl RemoteClient for LocalTracker {
    async fn comment(&self, subject: &str, body: &str) -> Result<RemoteResponse> {
        self.update(subject, |t| {
            t.comments.push(body.to_string());
            RemoteResponse::Done
        })
    }

    async fn add_labels(&self, subject: &str, labels: &[String]) -> Result<RemoteResponse> {
        self.update(subject, |t| {
            for label in labels {
                if !t.subject.has_label(label) {
                    t.subject.labels.push(label.clone());
                }
            }
            RemoteResponse::Done
        })
    }

    async fn close(&self, subject: &str) -> Result<RemoteResponse> {
        self.update(subject, |t| {
            t.subject.open = false;
            RemoteResponse::Done
        })
    }

    async fn merge(&self, subject: &str, _method: Option<&str>) -> Result<RemoteResponse> {
        self.update(subject, |t| {
            if t.merged {
                return RemoteResponse::Rejected(format!("{} is already merged", t.subject.id));
            }
            if !t.subject.open {
                return RemoteResponse::Rejected(format!("{} is closed", t.subject.id));
            }
            t.merged = true;
            t.subject.open = false;
            RemoteResponse::Done
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CheckStatus;
    use tempfile::TempDir;

    fn tracker_with(dir: &TempDir, yaml: &str) -> LocalTracker {
        let path = dir.path().join("subjects.yaml");
        std::fs::write(&path, yaml).unwrap();
        LocalTracker::new(path)
    }

    const SUBJECTS: &str = r#"
subjects:
  - id: PR-42
    labels: [ready]
    checks: passing
  - id: ISSUE-3
    open: false
"#;

    #[tokio::test]
    async fn lists_only_open_subjects() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_with(&dir, SUBJECTS);
        let open = tracker.open_subjects().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "PR-42");
        assert_eq!(open[0].checks, CheckStatus::Passing);
    }

    #[tokio::test]
    async fn merge_closes_and_second_merge_is_rejected() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_with(&dir, SUBJECTS);
        assert_eq!(tracker.merge("PR-42", None).await.unwrap(), RemoteResponse::Done);
        let file = tracker.load().unwrap();
        let pr = file.get("PR-42").unwrap();
        assert!(pr.merged);
        assert!(!pr.subject.open);

        assert!(matches!(
            tracker.merge("PR-42", None).await.unwrap(),
            RemoteResponse::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn labels_and_comments_are_persisted() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_with(&dir, SUBJECTS);
        tracker
            .add_labels("PR-42", &["ready".into(), "triaged".into()])
            .await
            .unwrap();
        tracker.comment("PR-42", "hello").await.unwrap();
        let file = tracker.load().unwrap();
        let pr = file.get("PR-42").unwrap();
        assert_eq!(pr.subject.labels, vec!["ready", "triaged"]);
        assert_eq!(pr.comments, vec!["hello"]);
    }

    #[tokio::test]
    async fn unknown_subject_is_rejected_not_error() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_with(&dir, SUBJECTS);
        let resp = tracker.close("PR-999").await.unwrap();
        assert!(matches!(resp, RemoteResponse::Rejected(_)));
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let tracker = LocalTracker::new(dir.path().join("none.yaml"));
        assert!(tracker.open_subjects().await.unwrap().is_empty());
    }
}
