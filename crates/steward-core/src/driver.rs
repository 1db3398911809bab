//! Maintenance cycle driver.
//!
//! One cycle walks `Idle -> FetchingEvents -> ProcessingEvents -> Committing
//! -> Idle`. Retryable failures move the driver to `ErrorBackoff` and back to
//! `Idle` after the computed delay. The loop only ever stops at `Idle`, and a
//! cycle counts as done once [`Ledger::commit_cycle`] has stored its cursor.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine;
use crate::error::{Result, StewardError};
use crate::event::Cursor;
use crate::executor::{Executed, Executor};
use crate::git::GitRepo;
use crate::ledger::{Ledger, Outcome};
use crate::remote::RemoteClient;
use crate::rules::RuleSet;
use crate::snapshot::StateReader;
use crate::source::EventSource;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    FetchingEvents,
    ProcessingEvents,
    Committing,
    ErrorBackoff { attempt: u32, delay: Duration },
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Idle => f.write_str("idle"),
            DriverState::FetchingEvents => f.write_str("fetching-events"),
            DriverState::ProcessingEvents => f.write_str("processing-events"),
            DriverState::Committing => f.write_str("committing"),
            DriverState::ErrorBackoff { attempt, delay } => {
                write!(f, "error-backoff(attempt {attempt}, {}s)", delay.as_secs())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CycleReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub events: usize,
    pub proposed: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub discarded: usize,
    /// Cursor after the cycle; unchanged when nothing was committed.
    pub cursor: Cursor,
    pub committed: bool,
    pub interrupted: bool,
    pub dry_run: bool,
    pub results: Vec<Executed>,
}

impl CycleReport {
    fn absorb(&mut self, results: Vec<Executed>) {
        for r in &results {
            match r.outcome {
                Outcome::Applied => self.applied += 1,
                Outcome::Skipped { .. } => self.skipped += 1,
                Outcome::Failed { .. } => self.failed += 1,
            }
        }
        self.results.extend(results);
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct Driver<'a, S, R, C> {
    config: &'a Config,
    rules_path: PathBuf,
    ledger: &'a Ledger,
    source: &'a S,
    reader: &'a R,
    remote: &'a C,
    git: Option<&'a GitRepo>,
    state: DriverState,
}

impl<'a, S, R, C> Driver<'a, S, R, C>
where
    S: EventSource,
    R: StateReader,
    C: RemoteClient,
{
    pub fn new(
        config: &'a Config,
        rules_path: impl Into<PathBuf>,
        ledger: &'a Ledger,
        source: &'a S,
        reader: &'a R,
        remote: &'a C,
    ) -> Self {
        Self {
            config,
            rules_path: rules_path.into(),
            ledger,
            source,
            reader,
            remote,
            git: None,
            state: DriverState::Idle,
        }
    }

    /// Working copy used by `create-branch` and `push` actions.
    pub fn with_git(mut self, git: &'a GitRepo) -> Self {
        self.git = Some(git);
        self
    }

    pub fn state(&self) -> &DriverState {
        &self.state
    }

    fn transition(&mut self, next: DriverState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "driver state");
            self.state = next;
        }
    }

    /// Run cycles until shutdown is requested. Returns the error that
    /// stopped the loop when it is fatal or retries are exhausted.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                info!("shutdown requested, stopping at idle");
                return Ok(());
            }

            let delay = match self.run_cycle(&shutdown).await {
                Ok(report) => {
                    attempt = 0;
                    if report.events > 0 || report.interrupted {
                        info!(
                            events = report.events,
                            applied = report.applied,
                            skipped = report.skipped,
                            failed = report.failed,
                            cursor = %report.cursor,
                            "cycle finished"
                        );
                    }
                    self.config.poll_interval
                }
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        self.transition(DriverState::Idle);
                        error!(error = %e, attempts = attempt, "retries exhausted");
                        return Err(e);
                    }
                    let delay = self.config.backoff_delay(attempt);
                    self.transition(DriverState::ErrorBackoff { attempt, delay });
                    warn!(error = %e, attempt, delay_secs = delay.as_secs(), "cycle failed, backing off");
                    delay
                }
                Err(e) => {
                    self.transition(DriverState::Idle);
                    error!(error = %e, "fatal error, cursor not advanced");
                    return Err(e);
                }
            };

            let stop = wait(delay, &mut shutdown).await;
            self.transition(DriverState::Idle);
            if stop {
                info!("shutdown requested, stopping at idle");
                return Ok(());
            }
        }
    }

    /// One fetch, decide, execute, commit pass. An interrupted cycle and a
    /// dry-run cycle leave the cursor where it was.
    pub async fn run_cycle(&mut self, shutdown: &watch::Receiver<bool>) -> Result<CycleReport> {
        let rules = RuleSet::load(&self.rules_path)?;
        let deadline = self.config.io_deadline;

        self.transition(DriverState::FetchingEvents);
        let cursor = self.ledger.cursor()?;
        let (events, next) = tokio::time::timeout(deadline, self.source.fetch_since(&cursor))
            .await
            .map_err(|_| {
                StewardError::TransientSource(format!(
                    "event source timed out after {}s",
                    deadline.as_secs()
                ))
            })??;
        debug!(cursor = %cursor, next = %next, events = events.len(), "fetched events");

        self.transition(DriverState::ProcessingEvents);
        let reference = self.ledger.reference_head()?;
        let mut executor = Executor::new(self.ledger, self.remote, deadline)
            .dry_run(self.config.dry_run)
            .with_shutdown(shutdown.clone());
        if let Some(git) = self.git {
            executor = executor.with_git(git, self.config.remote.clone());
        }

        let mut report = CycleReport {
            cursor: cursor.clone(),
            dry_run: self.config.dry_run,
            ..CycleReport::default()
        };
        let mut head = reference.clone();
        for event in &events {
            if *shutdown.borrow() {
                report.interrupted = true;
                break;
            }
            let snapshot = self.reader.snapshot(reference.as_deref()).await?;
            head = Some(snapshot.head.clone());

            let decision = engine::decide(&snapshot, event, &rules);
            report.proposed += decision.actions.len();
            report.discarded += decision.discarded.len();

            let executed = executor.apply_all(&decision.actions).await?;
            let interrupted = executed.interrupted;
            report.absorb(executed.results);
            if interrupted {
                report.interrupted = true;
                break;
            }
            report.events += 1;
        }

        if report.interrupted {
            warn!(processed = report.events, "cycle interrupted, not committing");
            self.transition(DriverState::Idle);
            return Ok(report);
        }
        if self.config.dry_run {
            self.transition(DriverState::Idle);
            return Ok(report);
        }

        self.transition(DriverState::Committing);
        self.ledger.commit_cycle(&next, head.as_deref())?;
        report.cursor = next;
        report.committed = true;
        self.transition(DriverState::Idle);
        Ok(report)
    }
}

/// Sleep for `delay` unless shutdown arrives first. Returns true when the
/// loop should stop.
async fn wait(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeEvent;
    use crate::ledger::SkipReason;
    use crate::snapshot::{RepositorySnapshot, Subject};
    use crate::source::{append_event, QueueSource};
    use crate::tracker::LocalTracker;
    use crate::types::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const RULES: &str = r#"
rules:
  - id: greet
    when:
      events: [new-item]
    then:
      kind: comment
      params:
        body: "hello {subject}"
"#;

    const SUBJECTS: &str = r#"
subjects:
  - id: ISSUE-1
  - id: ISSUE-2
"#;

    struct StaticReader {
        snapshot: RepositorySnapshot,
        fail_with: Option<fn() -> StewardError>,
    }

    impl StaticReader {
        fn new() -> Self {
            Self {
                snapshot: RepositorySnapshot::new("main", "abc123")
                    .with_subject(Subject::new("ISSUE-1"))
                    .with_subject(Subject::new("ISSUE-2")),
                fail_with: None,
            }
        }
    }

    impl StateReader for StaticReader {
        async fn snapshot(&self, _reference: Option<&str>) -> Result<RepositorySnapshot> {
            match self.fail_with {
                Some(f) => Err(f()),
                None => Ok(self.snapshot.clone()),
            }
        }
    }

    struct FailingSource {
        calls: AtomicUsize,
    }

    impl EventSource for FailingSource {
        async fn fetch_since(&self, _cursor: &Cursor) -> Result<(Vec<ChangeEvent>, Cursor)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StewardError::TransientSource("503 from upstream".into()))
        }
    }

    struct Fixture {
        dir: TempDir,
        ledger: Ledger,
        tracker: LocalTracker,
        source: QueueSource,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::write(dir.path().join("rules.yaml"), RULES).unwrap();
            std::fs::write(dir.path().join("subjects.yaml"), SUBJECTS).unwrap();
            let ledger = Ledger::open(&dir.path().join("ledger.redb")).unwrap();
            let tracker = LocalTracker::new(dir.path().join("subjects.yaml"));
            let source = QueueSource::new(dir.path().join("queue.jsonl"));
            Self {
                dir,
                ledger,
                tracker,
                source,
            }
        }

        fn enqueue(&self, subject: &str, ts: i64) {
            let event = ChangeEvent::new(EventKind::NewItem, subject, ts);
            append_event(&self.dir.path().join("queue.jsonl"), &event).unwrap();
        }

        fn rules_path(&self) -> PathBuf {
            self.dir.path().join("rules.yaml")
        }

        fn comments(&self, id: &str) -> Vec<String> {
            self.tracker.load().unwrap().get(id).unwrap().comments.clone()
        }
    }

    fn fast_config() -> Config {
        Config {
            poll_interval: Duration::from_millis(10),
            backoff_base: Duration::ZERO,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn cycle_applies_and_commits() {
        let fx = Fixture::new();
        fx.enqueue("ISSUE-1", 100);
        fx.enqueue("ISSUE-2", 101);
        let config = fast_config();
        let reader = StaticReader::new();
        let (_tx, rx) = watch::channel(false);
        let mut driver = Driver::new(
            &config,
            fx.rules_path(),
            &fx.ledger,
            &fx.source,
            &reader,
            &fx.tracker,
        );

        let report = driver.run_cycle(&rx).await.unwrap();
        assert_eq!(report.events, 2);
        assert_eq!(report.applied, 2);
        assert!(report.committed);
        assert_eq!(*driver.state(), DriverState::Idle);
        assert_eq!(fx.comments("ISSUE-1"), vec!["hello ISSUE-1"]);
        assert_eq!(fx.ledger.cursor().unwrap(), report.cursor);
        assert_eq!(fx.ledger.reference_head().unwrap().as_deref(), Some("abc123"));

        let again = driver.run_cycle(&rx).await.unwrap();
        assert_eq!(again.events, 0);
        assert_eq!(again.applied, 0);
    }

    #[tokio::test]
    async fn replay_from_old_cursor_skips_everything() {
        let fx = Fixture::new();
        fx.enqueue("ISSUE-1", 100);
        let config = fast_config();
        let reader = StaticReader::new();
        let (_tx, rx) = watch::channel(false);
        let mut driver = Driver::new(
            &config,
            fx.rules_path(),
            &fx.ledger,
            &fx.source,
            &reader,
            &fx.tracker,
        );
        driver.run_cycle(&rx).await.unwrap();

        fx.ledger.commit_cycle(&Cursor::start(), None).unwrap();
        let replay = driver.run_cycle(&rx).await.unwrap();
        assert_eq!(replay.events, 1);
        assert_eq!(replay.applied, 0);
        assert_eq!(replay.skipped, 1);
        assert_eq!(
            replay.results[0].outcome,
            Outcome::skipped(SkipReason::AlreadyApplied)
        );
        assert_eq!(fx.comments("ISSUE-1").len(), 1);
    }

    #[tokio::test]
    async fn dry_run_records_but_does_not_commit() {
        let fx = Fixture::new();
        fx.enqueue("ISSUE-1", 100);
        let config = Config {
            dry_run: true,
            ..fast_config()
        };
        let reader = StaticReader::new();
        let (_tx, rx) = watch::channel(false);
        let mut driver = Driver::new(
            &config,
            fx.rules_path(),
            &fx.ledger,
            &fx.source,
            &reader,
            &fx.tracker,
        );

        let report = driver.run_cycle(&rx).await.unwrap();
        assert!(report.dry_run);
        assert!(!report.committed);
        assert_eq!(report.skipped, 1);
        assert!(fx.comments("ISSUE-1").is_empty());
        assert!(fx.ledger.cursor().unwrap().is_start());

        let entries = fx.ledger.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome.label(), "skipped:dry-run");
    }

    #[tokio::test]
    async fn fatal_error_leaves_cursor_unadvanced() {
        let fx = Fixture::new();
        fx.enqueue("ISSUE-1", 100);
        let config = fast_config();
        let reader = StaticReader {
            fail_with: Some(|| StewardError::Authentication("bad token".into())),
            ..StaticReader::new()
        };
        let (_tx, rx) = watch::channel(false);
        let mut driver = Driver::new(
            &config,
            fx.rules_path(),
            &fx.ledger,
            &fx.source,
            &reader,
            &fx.tracker,
        );

        let err = driver.run(rx).await.unwrap_err();
        assert!(matches!(err, StewardError::Authentication(_)));
        assert!(fx.ledger.cursor().unwrap().is_start());
        assert_eq!(*driver.state(), DriverState::Idle);
    }

    #[tokio::test]
    async fn retryable_errors_escalate_after_max_retries() {
        let fx = Fixture::new();
        let config = Config {
            max_retries: 2,
            ..fast_config()
        };
        let source = FailingSource {
            calls: AtomicUsize::new(0),
        };
        let reader = StaticReader::new();
        let (_tx, rx) = watch::channel(false);
        let mut driver = Driver::new(
            &config,
            fx.rules_path(),
            &fx.ledger,
            &source,
            &reader,
            &fx.tracker,
        );

        let err = driver.run(rx).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop_at_idle() {
        let fx = Fixture::new();
        fx.enqueue("ISSUE-1", 100);
        let config = Config {
            poll_interval: Duration::from_secs(3600),
            ..fast_config()
        };
        let reader = StaticReader::new();
        let (tx, rx) = watch::channel(false);
        let mut driver = Driver::new(
            &config,
            fx.rules_path(),
            &fx.ledger,
            &fx.source,
            &reader,
            &fx.tracker,
        );

        let stop = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            tx.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(driver.run(rx), stop);
        result.unwrap();
        assert_eq!(*driver.state(), DriverState::Idle);
        assert_eq!(fx.comments("ISSUE-1").len(), 1);
        assert!(!fx.ledger.cursor().unwrap().is_start());
    }

    #[tokio::test]
    async fn shutdown_before_start_runs_no_cycle() {
        let fx = Fixture::new();
        fx.enqueue("ISSUE-1", 100);
        let config = fast_config();
        let reader = StaticReader::new();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let mut driver = Driver::new(
            &config,
            fx.rules_path(),
            &fx.ledger,
            &fx.source,
            &reader,
            &fx.tracker,
        );
        driver.run(rx).await.unwrap();
        assert!(fx.comments("ISSUE-1").is_empty());
    }

    #[test]
    fn state_display() {
        assert_eq!(DriverState::Idle.to_string(), "idle");
        assert_eq!(
            DriverState::ErrorBackoff {
                attempt: 2,
                delay: Duration::from_secs(4)
            }
            .to_string(),
            "error-backoff(attempt 2, 4s)"
        );
    }
}
