//! Beat command - record a coding heartbeat.
//!
//! Records one unit of activity, enriched with git metadata from the
//! working directory, and tries to deliver the queue right away. When
//! the backend is unreachable the heartbeat simply stays buffered.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use crate::config::Config;
use crate::flush::FlushOutcome;
use crate::git;
use crate::relay::Relay;
use crate::store::Heartbeat;

/// Arguments for the beat command.
#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    pulse beat                         Record activity in the current directory\n    \
    pulse beat src/main.rs --write     Record an edit of a specific file\n    \
    pulse beat --category building     Record build activity")]
pub struct Args {
    /// File or task the activity applies to (defaults to the current directory).
    pub entity: Option<PathBuf>,

    /// Activity category.
    #[arg(long, default_value = "coding")]
    pub category: String,

    /// Mark the activity as a write (edit) rather than a read.
    #[arg(long)]
    pub write: bool,
}

/// Executes the beat command.
pub fn run(args: Args) -> Result<()> {
    let mut config = Config::load()?;
    let machine_id = config.ensure_machine_id()?;
    let relay = Relay::new(config);

    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let entity = args
        .entity
        .unwrap_or_else(|| cwd.clone())
        .to_string_lossy()
        .to_string();

    let repo = git::repo_info(&cwd);

    let mut beat = Heartbeat::new(&entity, &args.category, args.write);
    beat.project = repo.project;
    beat.branch = repo.branch;
    beat.repo_url = repo.remote_url;
    beat.machine_id = Some(machine_id);

    // Make sure an identity exists (or is being provisioned) before
    // the first delivery attempt.
    relay.ensure_identity();
    relay.record(&beat.into());

    match relay.send_offline_data()? {
        FlushOutcome::Flushed { records } => {
            println!("{} Recorded and delivered {} record(s)", "✓".green(), records);
        }
        FlushOutcome::Empty => {
            // Another flush (likely the daemon) raced us and drained
            // the queue, heartbeat included.
            println!("{} Recorded and delivered", "✓".green());
        }
        other => {
            tracing::debug!("Heartbeat buffered: {}", other.label());
            println!(
                "{} Recorded ({} queued for later delivery)",
                "✓".green(),
                relay.queued_records()
            );
        }
    }

    Ok(())
}
