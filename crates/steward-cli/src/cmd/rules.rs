use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use steward_core::config::Config;
use steward_core::rules::RuleSet;
use std::path::Path;

#[derive(Subcommand)]
pub enum RulesSubcommand {
    /// Load the rule set, list its rules and report potential conflicts
    Check,
}

pub fn run(root: &Path, subcmd: RulesSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        RulesSubcommand::Check => check(root, json),
    }
}

fn check(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let path = config.rule_set_path(root);
    let rules = RuleSet::load(&path)?;
    let conflicts = rules.conflicts();

    if json {
        let listed: Vec<_> = rules.rules().iter().map(|r| &r.def).collect();
        return print_json(&serde_json::json!({
            "path": path.display().to_string(),
            "rules": listed,
            "conflicts": conflicts,
        }));
    }

    if rules.is_empty() {
        println!("{} has no rules; every event is a no-op.", path.display());
        return Ok(());
    }

    let rows = rules
        .rules()
        .iter()
        .map(|r| {
            let events = if r.def.when.events.is_empty() {
                "*".to_string()
            } else {
                r.def
                    .when
                    .events
                    .iter()
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            };
            vec![
                r.id().to_string(),
                r.priority().to_string(),
                events,
                r.def.then.kind.to_string(),
            ]
        })
        .collect();
    print_table(&["RULE", "PRIORITY", "EVENTS", "ACTION"], rows);

    if conflicts.is_empty() {
        println!("\nNo conflicting rules.");
    } else {
        println!();
        for c in &conflicts {
            println!("conflict: {} overrides {} ({})", c.winner, c.loser, c.reason);
        }
    }
    Ok(())
}
