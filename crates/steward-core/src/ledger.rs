//! Run ledger: durable record of which action fingerprints were applied,
//! skipped or failed, plus the event cursor, stored in redb.
//!
//! # Table design
//!
//! ```text
//! entries : fingerprint (str)  -> JSON LedgerEntry   latest outcome per fingerprint
//! history : seq (u64)          -> JSON LedgerEntry   append-only, every write
//! meta    : key (str)          -> str                cursor, reference head
//! ```
//!
//! A fingerprint whose outcome is settled (`applied`, `skipped:no-op`) can
//! never be re-recorded with a different outcome; an attempt is a
//! `LedgerIntegrity` error. Unsettled outcomes (`failed`, `skipped:dry-run`)
//! may be superseded by a later attempt.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::{Action, Fingerprint};
use crate::error::{Result, StewardError};
use crate::event::{Cursor, EventId};
use crate::types::ActionKind;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");
const HISTORY: TableDefinition<u64, &[u8]> = TableDefinition::new("history");
const META: TableDefinition<&str, &str> = TableDefinition::new("meta");

const META_CURSOR: &str = "cursor";
const META_REFERENCE_HEAD: &str = "reference_head";

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    AlreadyApplied,
    DryRun,
    NoOp,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::AlreadyApplied => "already-applied",
            SkipReason::DryRun => "dry-run",
            SkipReason::NoOp => "no-op",
        }
    }
}

/// Result of handing one action to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    Skipped { reason: SkipReason },
    Failed { error: String },
}

impl Outcome {
    pub fn skipped(reason: SkipReason) -> Self {
        Outcome::Skipped { reason }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Outcome::Failed {
            error: error.into(),
        }
    }

    /// Wire form: `applied`, `skipped:<reason>`, `failed`.
    pub fn label(&self) -> String {
        match self {
            Outcome::Applied => "applied".to_string(),
            Outcome::Skipped { reason } => format!("skipped:{}", reason.as_str()),
            Outcome::Failed { .. } => "failed".to_string(),
        }
    }

    /// Settled outcomes make every replay of the fingerprint a skip.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Outcome::Applied
                | Outcome::Skipped {
                    reason: SkipReason::NoOp | SkipReason::AlreadyApplied
                }
        )
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

// ---------------------------------------------------------------------------
// LedgerEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub fingerprint: Fingerprint,
    pub outcome: Outcome,
    pub recorded_at: DateTime<Utc>,
    /// Display form of the originating event id.
    pub event: String,
    pub kind: ActionKind,
    pub target: String,
}

impl LedgerEntry {
    pub fn for_action(action: &Action, outcome: Outcome) -> Self {
        Self {
            fingerprint: action.fingerprint.clone(),
            outcome,
            recorded_at: Utc::now(),
            event: action.event.to_string(),
            kind: action.kind,
            target: action.target.clone(),
        }
    }
}

/// Counts returned by a successful [`Ledger::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub entries: usize,
    pub history: usize,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Handle to the ledger database. Clones share one open database, so a
/// clone can be moved onto a blocking thread.
#[derive(Clone)]
pub struct Ledger {
    db: Arc<Database>,
}

impl Ledger {
    /// Open or create the ledger at `path`, creating all tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(|e| StewardError::Ledger(e.to_string()))?;
        let wt = db
            .begin_write()
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        wt.open_table(ENTRIES)
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        wt.open_table(HISTORY)
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        wt.open_table(META)
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        wt.commit()
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Open an existing ledger without creating the file or its tables.
    /// Returns `None` when nothing has been recorded at `path` yet.
    pub fn open_existing(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let db = Database::open(path).map_err(|e| StewardError::Ledger(e.to_string()))?;
        Ok(Some(Self { db: Arc::new(db) }))
    }

    /// Durably record `entry`. Re-recording a settled outcome is a no-op;
    /// contradicting one is a fatal integrity error.
    pub fn record(&self, entry: &LedgerEntry) -> Result<()> {
        let key = entry.fingerprint.as_str();
        let value = serde_json::to_vec(entry)?;

        let wt = self
            .db
            .begin_write()
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        {
            let mut entries = wt
                .open_table(ENTRIES)
                .map_err(|e| StewardError::Ledger(e.to_string()))?;

            let existing = match entries
                .get(key)
                .map_err(|e| StewardError::Ledger(e.to_string()))?
            {
                Some(guard) => Some(decode(key, guard.value())?),
                None => None,
            };
            if let Some(existing) = existing {
                if existing.outcome.is_settled() {
                    if existing.outcome.label() == entry.outcome.label() {
                        debug!(fingerprint = entry.fingerprint.short(), "outcome already recorded");
                        return Ok(());
                    }
                    return Err(StewardError::LedgerIntegrity {
                        fingerprint: key.to_string(),
                        reason: format!(
                            "recorded as {} but now reported as {}",
                            existing.outcome, entry.outcome
                        ),
                    });
                }
            }

            entries
                .insert(key, value.as_slice())
                .map_err(|e| StewardError::Ledger(e.to_string()))?;

            let mut history = wt
                .open_table(HISTORY)
                .map_err(|e| StewardError::Ledger(e.to_string()))?;
            let next_seq = history
                .last()
                .map_err(|e| StewardError::Ledger(e.to_string()))?
                .map(|(k, _)| k.value() + 1)
                .unwrap_or(0);
            history
                .insert(next_seq, value.as_slice())
                .map_err(|e| StewardError::Ledger(e.to_string()))?;
        }
        wt.commit()
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        debug!(
            fingerprint = entry.fingerprint.short(),
            outcome = %entry.outcome,
            "ledger entry recorded"
        );
        Ok(())
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<LedgerEntry>> {
        let rt = self
            .db
            .begin_read()
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        let table = rt
            .open_table(ENTRIES)
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        let key = fingerprint.as_str();
        match table
            .get(key)
            .map_err(|e| StewardError::Ledger(e.to_string()))?
        {
            Some(guard) => Ok(Some(decode(key, guard.value())?)),
            None => Ok(None),
        }
    }

    /// Latest entry per fingerprint, newest first.
    pub fn list(&self) -> Result<Vec<LedgerEntry>> {
        let rt = self
            .db
            .begin_read()
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        let table = rt
            .open_table(ENTRIES)
            .map_err(|e| StewardError::Ledger(e.to_string()))?;

        let mut result = Vec::new();
        for item in table
            .iter()
            .map_err(|e| StewardError::Ledger(e.to_string()))?
        {
            let (k, v) = item.map_err(|e| StewardError::Ledger(e.to_string()))?;
            result.push(decode(k.value(), v.value())?);
        }
        result.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(result)
    }

    /// Every write ever made, oldest first.
    pub fn history(&self) -> Result<Vec<LedgerEntry>> {
        let rt = self
            .db
            .begin_read()
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        let table = rt
            .open_table(HISTORY)
            .map_err(|e| StewardError::Ledger(e.to_string()))?;

        let mut result = Vec::new();
        for item in table
            .iter()
            .map_err(|e| StewardError::Ledger(e.to_string()))?
        {
            let (_, v) = item.map_err(|e| StewardError::Ledger(e.to_string()))?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    /// Walk both tables and check that:
    ///
    /// - every entry decodes and sits under its own fingerprint;
    /// - every fingerprint matches the one recomputed from the entry's
    ///   event, kind and target;
    /// - every history record belongs to a known fingerprint, and the last
    ///   record for each fingerprint agrees with its current entry.
    pub fn verify(&self) -> Result<VerifyReport> {
        let rt = self
            .db
            .begin_read()
            .map_err(|e| StewardError::Ledger(e.to_string()))?;

        let mut current: BTreeMap<String, LedgerEntry> = BTreeMap::new();
        let entries = rt
            .open_table(ENTRIES)
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        for item in entries
            .iter()
            .map_err(|e| StewardError::Ledger(e.to_string()))?
        {
            let (k, v) = item.map_err(|e| StewardError::Ledger(e.to_string()))?;
            let entry = decode(k.value(), v.value())?;
            check_fingerprint(&entry)?;
            current.insert(k.value().to_string(), entry);
        }

        let mut last_seen: BTreeMap<String, LedgerEntry> = BTreeMap::new();
        let history = rt
            .open_table(HISTORY)
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        let mut records = 0;
        for item in history
            .iter()
            .map_err(|e| StewardError::Ledger(e.to_string()))?
        {
            let (seq, v) = item.map_err(|e| StewardError::Ledger(e.to_string()))?;
            let entry: LedgerEntry =
                serde_json::from_slice(v.value()).map_err(|e| StewardError::LedgerIntegrity {
                    fingerprint: format!("history #{}", seq.value()),
                    reason: format!("undecodable record: {e}"),
                })?;
            check_fingerprint(&entry)?;
            if !current.contains_key(entry.fingerprint.as_str()) {
                return Err(StewardError::LedgerIntegrity {
                    fingerprint: entry.fingerprint.to_string(),
                    reason: format!("history #{} has no matching entry", seq.value()),
                });
            }
            last_seen.insert(entry.fingerprint.to_string(), entry);
            records += 1;
        }

        for (key, entry) in &current {
            match last_seen.get(key) {
                Some(last) if last.outcome == entry.outcome => {}
                Some(last) => {
                    return Err(StewardError::LedgerIntegrity {
                        fingerprint: key.clone(),
                        reason: format!(
                            "entry says {} but last history record says {}",
                            entry.outcome, last.outcome
                        ),
                    })
                }
                None => {
                    return Err(StewardError::LedgerIntegrity {
                        fingerprint: key.clone(),
                        reason: "entry has no history".to_string(),
                    })
                }
            }
        }

        Ok(VerifyReport {
            entries: current.len(),
            history: records,
        })
    }

    // -----------------------------------------------------------------------
    // Cursor and reference head
    // -----------------------------------------------------------------------

    pub fn cursor(&self) -> Result<Cursor> {
        Ok(self
            .meta(META_CURSOR)?
            .map(Cursor)
            .unwrap_or_else(Cursor::start))
    }

    pub fn reference_head(&self) -> Result<Option<String>> {
        self.meta(META_REFERENCE_HEAD)
    }

    /// Advance the cursor and reference head together. This write is what
    /// makes a cycle committed.
    pub fn commit_cycle(&self, cursor: &Cursor, head: Option<&str>) -> Result<()> {
        let wt = self
            .db
            .begin_write()
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        {
            let mut meta = wt
                .open_table(META)
                .map_err(|e| StewardError::Ledger(e.to_string()))?;
            meta.insert(META_CURSOR, cursor.as_str())
                .map_err(|e| StewardError::Ledger(e.to_string()))?;
            if let Some(head) = head {
                meta.insert(META_REFERENCE_HEAD, head)
                    .map_err(|e| StewardError::Ledger(e.to_string()))?;
            }
        }
        wt.commit()
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        Ok(())
    }

    fn meta(&self, key: &str) -> Result<Option<String>> {
        let rt = self
            .db
            .begin_read()
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        let table = rt
            .open_table(META)
            .map_err(|e| StewardError::Ledger(e.to_string()))?;
        Ok(table
            .get(key)
            .map_err(|e| StewardError::Ledger(e.to_string()))?
            .map(|g| g.value().to_string()))
    }
}

fn decode(key: &str, bytes: &[u8]) -> Result<LedgerEntry> {
    let entry: LedgerEntry =
        serde_json::from_slice(bytes).map_err(|e| StewardError::LedgerIntegrity {
            fingerprint: key.to_string(),
            reason: format!("undecodable entry: {e}"),
        })?;
    if entry.fingerprint.as_str() != key {
        return Err(StewardError::LedgerIntegrity {
            fingerprint: key.to_string(),
            reason: format!("entry stored under foreign fingerprint {}", entry.fingerprint),
        });
    }
    Ok(entry)
}

fn check_fingerprint(entry: &LedgerEntry) -> Result<()> {
    let integrity = |reason: String| StewardError::LedgerIntegrity {
        fingerprint: entry.fingerprint.to_string(),
        reason,
    };
    let event: EventId = entry
        .event
        .parse()
        .map_err(|e| integrity(format!("unreadable event id: {e}")))?;
    let expected = Fingerprint::compute(&event, entry.kind, &entry.target);
    if expected != entry.fingerprint {
        return Err(integrity(format!(
            "fingerprint does not match {} {} for {}",
            entry.kind, entry.target, entry.event
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
