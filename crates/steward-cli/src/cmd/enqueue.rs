use crate::cmd::EventArgs;
use crate::output::print_json;
use anyhow::Context;
use steward_core::config::Config;
use steward_core::{paths, source};
use std::path::Path;

pub fn run(root: &Path, args: EventArgs, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let Some(queue_path) = config.backend.queue_path() else {
        anyhow::bail!("enqueue needs a queue-fed backend; the github backend polls its own events");
    };
    let event = args.into_event()?;
    source::append_event(&paths::resolve(root, queue_path), &event)?;

    if json {
        print_json(&event)?;
    } else {
        println!("Queued {}", event.id());
    }
    Ok(())
}
