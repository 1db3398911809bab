use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use steward_core::config::Config;
use steward_core::ledger::{Ledger, LedgerEntry};
use std::path::Path;

#[derive(Subcommand)]
pub enum LedgerSubcommand {
    /// List the latest outcome per fingerprint, newest first
    List {
        /// Show every recorded write instead, oldest first
        #[arg(long)]
        history: bool,
    },

    /// Show one entry by fingerprint or unique fingerprint prefix
    Show { fingerprint: String },

    /// Check every entry and history record against its fingerprint
    Verify,
}

pub fn run(root: &Path, subcmd: LedgerSubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let ledger = Ledger::open(&config.ledger_path(root))
        .with_context(|| format!("cannot open ledger {}", config.ledger_path.display()))?;

    match subcmd {
        LedgerSubcommand::List { history } => list(&ledger, history, json),
        LedgerSubcommand::Show { fingerprint } => show(&ledger, &fingerprint, json),
        LedgerSubcommand::Verify => verify(&ledger, json),
    }
}

fn list(ledger: &Ledger, history: bool, json: bool) -> anyhow::Result<()> {
    let entries = if history {
        ledger.history()?
    } else {
        ledger.list()?
    };
    let cursor = ledger.cursor()?;

    if json {
        return print_json(&serde_json::json!({
            "cursor": cursor,
            "reference_head": ledger.reference_head()?,
            "entries": entries,
        }));
    }

    println!("Cursor: {cursor}");
    if entries.is_empty() {
        println!("No ledger entries.");
        return Ok(());
    }
    let rows = entries
        .iter()
        .map(|e| {
            vec![
                e.fingerprint.short().to_string(),
                e.kind.to_string(),
                e.target.clone(),
                e.outcome.to_string(),
                e.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect();
    print_table(&["FINGERPRINT", "ACTION", "TARGET", "OUTCOME", "RECORDED"], rows);
    Ok(())
}

fn find(ledger: &Ledger, fingerprint: &str) -> anyhow::Result<LedgerEntry> {
    if let Some(entry) = ledger.lookup(&fingerprint.into())? {
        return Ok(entry);
    }
    let mut matches: Vec<LedgerEntry> = ledger
        .list()?
        .into_iter()
        .filter(|e| e.fingerprint.as_str().starts_with(fingerprint))
        .collect();
    match matches.len() {
        0 => anyhow::bail!("no ledger entry for fingerprint '{fingerprint}'"),
        1 => Ok(matches.remove(0)),
        n => anyhow::bail!("fingerprint prefix '{fingerprint}' is ambiguous ({n} entries)"),
    }
}

fn show(ledger: &Ledger, fingerprint: &str, json: bool) -> anyhow::Result<()> {
    let entry = find(ledger, fingerprint)?;
    if json {
        return print_json(&entry);
    }
    println!("Fingerprint: {}", entry.fingerprint);
    println!("Event:       {}", entry.event);
    println!("Action:      {} {}", entry.kind, entry.target);
    println!("Outcome:     {}", entry.outcome);
    if let Some(error) = entry.outcome.error() {
        println!("Error:       {error}");
    }
    println!("Recorded:    {}", entry.recorded_at.to_rfc3339());
    Ok(())
}

fn verify(ledger: &Ledger, json: bool) -> anyhow::Result<()> {
    let report = ledger.verify()?;
    if json {
        print_json(&serde_json::json!({
            "ok": true,
            "entries": report.entries,
            "history": report.history,
        }))?;
    } else {
        println!(
            "Ledger OK: {} entries verified, {} history records.",
            report.entries, report.history
        );
    }
    Ok(())
}
