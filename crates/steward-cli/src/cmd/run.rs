use crate::output::{print_json, print_table};
use anyhow::Context;
use steward_core::config::{Backend, Config};
use steward_core::driver::{CycleReport, Driver};
use steward_core::git::GitRepo;
use steward_core::ledger::Ledger;
use steward_core::paths;
use steward_core::remote::RemoteClient;
use steward_core::snapshot::{GitStateReader, SubjectCatalog};
use steward_core::source::{EventSource, QueueSource};
use steward_core::tracker::LocalTracker;
use steward_github::GitHubClient;
use std::path::Path;
use tokio::sync::watch;
use tracing::info;

pub fn run(root: &Path, dry_run: bool, once: bool, json: bool) -> anyhow::Result<()> {
    let mut config = Config::load(root).context("failed to load config")?;
    if dry_run {
        config.dry_run = true;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_with_backend(root, &config, once, json))
}

async fn run_with_backend(root: &Path, config: &Config, once: bool, json: bool) -> anyhow::Result<()> {
    let git = GitRepo::open(root, config.io_deadline)?;
    let ledger = Ledger::open(&config.ledger_path(root))
        .with_context(|| format!("cannot open ledger {}", config.ledger_path.display()))?;

    match &config.backend {
        Backend::Local {
            queue_path,
            subjects_path,
        } => {
            let source = QueueSource::new(paths::resolve(root, queue_path));
            let tracker = LocalTracker::new(paths::resolve(root, subjects_path));
            drive(root, config, &git, &ledger, &source, &tracker, once, json).await
        }
        Backend::Github {
            repo,
            token_env,
            api_url,
        } => {
            let client = GitHubClient::from_env(api_url, repo, token_env, config.io_deadline)?;
            drive(root, config, &git, &ledger, &client, &client, once, json).await
        }
        Backend::GithubWebhook {
            repo,
            token_env,
            api_url,
            queue_path,
        } => {
            let source = QueueSource::new(paths::resolve(root, queue_path));
            let client = GitHubClient::from_env(api_url, repo, token_env, config.io_deadline)?;
            drive(root, config, &git, &ledger, &source, &client, once, json).await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive<S, C>(
    root: &Path,
    config: &Config,
    git: &GitRepo,
    ledger: &Ledger,
    source: &S,
    client: &C,
    once: bool,
    json: bool,
) -> anyhow::Result<()>
where
    S: EventSource,
    C: SubjectCatalog + RemoteClient,
{
    let reader = GitStateReader::new(git, client, config.io_deadline)
        .with_remote(config.remote.clone())
        .with_branch(config.branch.clone());
    let mut driver = Driver::new(
        config,
        config.rule_set_path(root),
        ledger,
        source,
        &reader,
        client,
    )
    .with_git(git);

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing current action");
            let _ = tx.send(true);
        }
    });

    if once {
        let report = driver.run_cycle(&rx).await?;
        print_report(&report, json)
    } else {
        driver.run(rx).await?;
        Ok(())
    }
}

fn print_report(report: &CycleReport, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(report);
    }

    let mode = if report.dry_run { " (dry run)" } else { "" };
    println!(
        "{} events, {} actions{mode}: {} applied, {} skipped, {} failed, {} discarded",
        report.events,
        report.proposed,
        report.applied,
        report.skipped,
        report.failed,
        report.discarded
    );
    if report.interrupted {
        println!("Interrupted; cursor not advanced.");
    } else if report.committed {
        println!("Cursor: {}", report.cursor);
    }

    if !report.results.is_empty() {
        let rows = report
            .results
            .iter()
            .map(|r| {
                vec![
                    r.action.kind.to_string(),
                    r.action.target.clone(),
                    r.action.fingerprint.short().to_string(),
                    r.outcome.to_string(),
                ]
            })
            .collect();
        print_table(&["ACTION", "TARGET", "FINGERPRINT", "OUTCOME"], rows);
    }
    Ok(())
}
