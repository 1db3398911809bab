use crate::cmd::EventArgs;
use crate::output::{print_json, print_table};
use anyhow::Context;
use steward_core::config::{Backend, Config};
use steward_core::engine::{self, Decision};
use steward_core::event::ChangeEvent;
use steward_core::git::GitRepo;
use steward_core::paths;
use steward_core::rules::RuleSet;
use steward_core::snapshot::{GitStateReader, StateReader, SubjectCatalog};
use steward_core::tracker::LocalTracker;
use steward_github::GitHubClient;
use std::path::Path;

/// Decide against the current working copy without synchronizing it,
/// touching the ledger or applying anything.
pub fn run(root: &Path, args: EventArgs, since: Option<&str>, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let rules = RuleSet::load(&config.rule_set_path(root))?;
    let event = args.into_event()?;

    let rt = tokio::runtime::Runtime::new()?;
    let decision = rt.block_on(evaluate_with_backend(root, &config, &rules, &event, since))?;

    if json {
        return print_json(&serde_json::json!({
            "event": event.id().to_string(),
            "actions": decision.actions,
            "discarded": decision.discarded,
        }));
    }

    if decision.is_empty() {
        println!("No rule matches {}.", event.id());
        return Ok(());
    }
    let rows = decision
        .actions
        .iter()
        .map(|a| {
            vec![
                a.kind.to_string(),
                a.target.clone(),
                a.rule.clone().unwrap_or_else(|| "-".to_string()),
                a.fingerprint.short().to_string(),
            ]
        })
        .collect();
    print_table(&["ACTION", "TARGET", "RULE", "FINGERPRINT"], rows);
    for d in &decision.discarded {
        println!(
            "discarded: {} {} (rule {}) in favor of {} (rule {})",
            d.action.kind,
            d.action.target,
            d.action.rule.as_deref().unwrap_or("-"),
            d.kept.kind,
            d.kept.rule.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn evaluate_with_backend(
    root: &Path,
    config: &Config,
    rules: &RuleSet,
    event: &ChangeEvent,
    since: Option<&str>,
) -> anyhow::Result<Decision> {
    let git = GitRepo::open(root, config.io_deadline)?;
    match &config.backend {
        Backend::Local { subjects_path, .. } => {
            let tracker = LocalTracker::new(paths::resolve(root, subjects_path));
            evaluate(&git, &tracker, config, rules, event, since).await
        }
        Backend::Github {
            repo,
            token_env,
            api_url,
        }
        | Backend::GithubWebhook {
            repo,
            token_env,
            api_url,
            ..
        } => {
            let client = GitHubClient::from_env(api_url, repo, token_env, config.io_deadline)?;
            evaluate(&git, &client, config, rules, event, since).await
        }
    }
}

async fn evaluate<C: SubjectCatalog>(
    git: &GitRepo,
    catalog: &C,
    config: &Config,
    rules: &RuleSet,
    event: &ChangeEvent,
    since: Option<&str>,
) -> anyhow::Result<Decision> {
    let reader =
        GitStateReader::new(git, catalog, config.io_deadline).with_branch(config.branch.clone());
    let snapshot = reader.snapshot(since).await?;
    Ok(engine::decide(&snapshot, event, rules))
}
