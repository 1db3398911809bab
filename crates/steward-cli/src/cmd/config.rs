use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use steward_core::config::{Backend, Config, WarnLevel};
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration
    Show,

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, json),
        ConfigSubcommand::Validate => validate(root, json),
    }
}

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    if json {
        return print_json(&config);
    }

    println!("rules:         {}", config.rule_set_path(root).display());
    println!("ledger:        {}", config.ledger_path(root).display());
    println!("poll interval: {}s", config.poll_interval.as_secs());
    println!(
        "retries:       {} (backoff {}s, max {}s)",
        config.max_retries,
        config.backoff_base.as_secs(),
        config.max_backoff.as_secs()
    );
    println!("io deadline:   {}s", config.io_deadline.as_secs());
    println!("dry run:       {}", config.dry_run);
    println!(
        "remote:        {}",
        config.remote.as_deref().unwrap_or("(none)")
    );
    println!(
        "branch:        {}",
        config.branch.as_deref().unwrap_or("(checked out)")
    );
    match &config.backend {
        Backend::Local {
            queue_path,
            subjects_path,
        } => println!(
            "backend:       local (queue {}, subjects {})",
            queue_path.display(),
            subjects_path.display()
        ),
        Backend::Github { repo, token_env, .. } => {
            println!("backend:       github {repo} (token from ${token_env})")
        }
        Backend::GithubWebhook {
            repo,
            token_env,
            queue_path,
            ..
        } => println!(
            "backend:       github-webhook {repo} (token from ${token_env}, queue {})",
            queue_path.display()
        ),
    }
    Ok(())
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate(root);

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
