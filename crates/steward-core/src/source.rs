//! Remote event sources: "what changed since the last cursor".
//!
//! [`QueueSource`] reads the JSON Lines queue that the webhook receiver and
//! `steward enqueue` append to. Its cursor is the number of complete lines
//! already consumed, so it is monotonic and resumable from any value it has
//! handed out.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, StewardError};
use crate::event::{ChangeEvent, Cursor};

#[allow(async_fn_in_trait)]
pub trait EventSource {
    /// Ordered events after `cursor`, and the cursor to resume from next.
    ///
    /// Retryable failures are `TransientSource`; rejected credentials are
    /// `Authentication`.
    async fn fetch_since(&self, cursor: &Cursor) -> Result<(Vec<ChangeEvent>, Cursor)>;
}

const LINE_PREFIX: &str = "line:";

/// Default number of events handed out per fetch.
pub const DEFAULT_BATCH: usize = 100;

pub struct QueueSource {
    path: PathBuf,
    batch: usize,
}

impl QueueSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            batch: DEFAULT_BATCH,
        }
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    fn parse_cursor(cursor: &Cursor) -> Result<usize> {
        if cursor.is_start() {
            return Ok(0);
        }
        cursor
            .as_str()
            .strip_prefix(LINE_PREFIX)
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| {
                StewardError::InvalidConfig(format!(
                    "cursor '{cursor}' was not produced by the queue source"
                ))
            })
    }
}

impl EventSource for QueueSource {
    async fn fetch_since(&self, cursor: &Cursor) -> Result<(Vec<ChangeEvent>, Cursor)> {
        let consumed = Self::parse_cursor(cursor)?;
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Vec::new(), cursor.clone()));
            }
            Err(e) => {
                return Err(StewardError::TransientSource(format!(
                    "reading {}: {e}",
                    self.path.display()
                )))
            }
        };

        // A trailing line without '\n' is still being written
        let complete = match data.rfind('\n') {
            Some(end) => &data[..end + 1],
            None => "",
        };

        let mut events = Vec::new();
        let mut position = consumed;
        for (idx, line) in complete.lines().enumerate().skip(consumed) {
            if events.len() >= self.batch {
                break;
            }
            position = idx + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ChangeEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(line = idx + 1, error = %e, "skipping malformed queue entry"),
            }
        }

        debug!(from = consumed, to = position, fetched = events.len(), "queue fetched");
        Ok((events, Cursor(format!("{LINE_PREFIX}{position}"))))
    }
}

/// Append one event to a queue file, creating it if needed.
pub fn append_event(path: &Path, event: &ChangeEvent) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    f.write_all(line.as_bytes())?;
    f.sync_data()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;
    use tempfile::TempDir;

    fn ev(subject: &str, ts: i64) -> ChangeEvent {
        ChangeEvent::new(EventKind::UpdatedItem, subject, ts)
    }

    #[tokio::test]
    async fn missing_queue_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let source = QueueSource::new(dir.path().join("queue.jsonl"));
        let (events, next) = source.fetch_since(&Cursor::start()).await.unwrap();
        assert!(events.is_empty());
        assert!(next.is_start());
    }

    #[tokio::test]
    async fn cursor_chain_sees_every_event_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.jsonl");
        for i in 0..5 {
            append_event(&path, &ev(&format!("PR-{i}"), i)).unwrap();
        }
        let source = QueueSource::new(&path).with_batch(2);

        let mut cursor = Cursor::start();
        let mut seen = Vec::new();
        loop {
            let (events, next) = source.fetch_since(&cursor).await.unwrap();
            if events.is_empty() {
                assert_eq!(next, cursor);
                break;
            }
            seen.extend(events.into_iter().map(|e| e.subject));
            cursor = next;
        }
        assert_eq!(seen, vec!["PR-0", "PR-1", "PR-2", "PR-3", "PR-4"]);

        // Appends after the last cursor are picked up without repeats
        append_event(&path, &ev("PR-5", 5)).unwrap();
        let (events, _) = source.fetch_since(&cursor).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subject, "PR-5");
    }

    #[tokio::test]
    async fn resumes_from_any_previous_cursor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.jsonl");
        for i in 0..3 {
            append_event(&path, &ev(&format!("PR-{i}"), i)).unwrap();
        }
        let source = QueueSource::new(&path);
        let (events, _) = source.fetch_since(&Cursor("line:1".into())).await.unwrap();
        let subjects: Vec<_> = events.iter().map(|e| e.subject.as_str()).collect();
        assert_eq!(subjects, vec!["PR-1", "PR-2"]);
    }

    #[tokio::test]
    async fn partial_trailing_line_is_left_for_later() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.jsonl");
        append_event(&path, &ev("PR-1", 1)).unwrap();
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(br#"{"kind":"updated-item","subj"#).unwrap();
        }
        let source = QueueSource::new(&path);
        let (events, next) = source.fetch_since(&Cursor::start()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(next, Cursor("line:1".into()));
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        append_event(&path, &ev("PR-1", 1)).unwrap();
        let source = QueueSource::new(&path);
        let (events, next) = source.fetch_since(&Cursor::start()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(next, Cursor("line:2".into()));
    }

    #[tokio::test]
    async fn foreign_cursor_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = QueueSource::new(dir.path().join("q.jsonl"));
        let err = source
            .fetch_since(&Cursor("2024-01-01T00:00:00Z".into()))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
