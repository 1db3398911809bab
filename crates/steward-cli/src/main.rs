mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, ledger::LedgerSubcommand, rules::RulesSubcommand,
    templates::TemplatesSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "steward",
    about = "Repository maintainer: turns change events into idempotent maintenance actions",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .steward/ or .git)
    #[arg(long, global = true, env = "STEWARD_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize steward in the current repository
    Init,

    /// Run maintenance cycles until interrupted
    Run {
        /// Compute and record actions without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Run exactly one maintenance cycle
    Once {
        /// Compute and record actions without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Append an event to the event queue
    Enqueue {
        /// new-item, updated-item, closed-item or external-trigger
        #[arg(long)]
        kind: String,
        /// Subject id, e.g. PR-42, ISSUE-7 or branch/main
        #[arg(long)]
        subject: String,
        /// Unix seconds (default: now)
        #[arg(long)]
        timestamp: Option<i64>,
        /// JSON object attached to the event
        #[arg(long)]
        payload: Option<String>,
    },

    /// Show the actions the rules would propose for an event, without applying them
    Decide {
        #[arg(long)]
        kind: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        timestamp: Option<i64>,
        #[arg(long)]
        payload: Option<String>,
        /// Compute changed paths against this revision
        #[arg(long)]
        since: Option<String>,
    },

    /// Inspect the rule set
    Rules {
        #[command(subcommand)]
        subcommand: RulesSubcommand,
    },

    /// Manage the reply templates in the rule set
    Templates {
        #[command(subcommand)]
        subcommand: TemplatesSubcommand,
    },

    /// Inspect the run ledger
    Ledger {
        #[command(subcommand)]
        subcommand: LedgerSubcommand,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Receive GitHub webhooks and queue them as events
    Serve {
        #[arg(long, default_value = "8787")]
        port: u16,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } | Commands::Once { .. } | Commands::Serve { .. } => {
            tracing::Level::INFO
        }
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, cli.json),
        Commands::Run { dry_run } => cmd::run::run(&root, dry_run, false, cli.json),
        Commands::Once { dry_run } => cmd::run::run(&root, dry_run, true, cli.json),
        Commands::Enqueue {
            kind,
            subject,
            timestamp,
            payload,
        } => cmd::enqueue::run(
            &root,
            cmd::EventArgs {
                kind,
                subject,
                timestamp,
                payload,
            },
            cli.json,
        ),
        Commands::Decide {
            kind,
            subject,
            timestamp,
            payload,
            since,
        } => cmd::decide::run(
            &root,
            cmd::EventArgs {
                kind,
                subject,
                timestamp,
                payload,
            },
            since.as_deref(),
            cli.json,
        ),
        Commands::Rules { subcommand } => cmd::rules::run(&root, subcommand, cli.json),
        Commands::Templates { subcommand } => cmd::templates::run(&root, subcommand, cli.json),
        Commands::Ledger { subcommand } => cmd::ledger::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Serve { port } => cmd::serve::run(&root, port),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
