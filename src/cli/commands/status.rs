//! Status command - show login state and queue depth.
//!
//! Displays the identity and login state, the offline queue depth,
//! and the daemon's flush schedule.

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::auth::AuthState;
use crate::cli::format::OutputFormat;
use crate::daemon::{DaemonState, FlushState};
use crate::relay::Relay;

/// Arguments for the status command.
#[derive(clap::Args)]
pub struct Args {
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Machine-readable status snapshot.
#[derive(Debug, Serialize)]
struct StatusReport {
    login_state: String,
    user_name: Option<String>,
    identity_stored: bool,
    queued_records: usize,
    daemon_running: bool,
    daemon_pid: Option<u32>,
    last_flush_at: Option<DateTime<Utc>>,
    next_flush_at: Option<DateTime<Utc>>,
    last_flush_success: Option<bool>,
}

/// Executes the status command.
pub fn run(args: Args) -> Result<()> {
    let relay = Relay::from_default_config()?;

    let state = relay.login_state();
    let user_name = match &state {
        AuthState::LoggedIn { name } => name.clone(),
        _ => None,
    };

    let daemon = DaemonState::new()?;
    let daemon_running = daemon.is_running();
    let flush_state = FlushState::load().unwrap_or_default();

    let report = StatusReport {
        login_state: state.label().to_string(),
        user_name,
        identity_stored: relay.has_identity(),
        queued_records: relay.queued_records(),
        daemon_running,
        daemon_pid: if daemon_running { daemon.get_pid() } else { None },
        last_flush_at: flush_state.last_flush_at,
        next_flush_at: flush_state.next_flush_at,
        last_flush_success: flush_state.last_flush_success,
    };

    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => print_text(&state, &report),
    }

    Ok(())
}

fn print_text(state: &AuthState, report: &StatusReport) {
    println!("{}", "pulse".bold().cyan());
    println!("{}", "Coding activity relay".dimmed());
    println!();

    println!("{}", "Identity:".bold());
    let state_line = match state {
        AuthState::LoggedIn { name } => match name {
            Some(name) => format!("logged in as {name}").green(),
            None => "logged in".green(),
        },
        AuthState::Anonymous => "anonymous".yellow(),
        AuthState::UnknownOrExpired => "unknown".dimmed(),
    };
    println!("  {} {}", "State:".dimmed(), state_line);
    println!(
        "  {} {}",
        "Token:".dimmed(),
        if report.identity_stored { "stored" } else { "none" }
    );
    if !report.identity_stored {
        println!();
        println!(
            "{}",
            "Hint: Run 'pulse beat' or 'pulse daemon start' to provision an identity".yellow()
        );
    } else if !state.is_logged_in() {
        println!();
        println!("{}", "Hint: Run 'pulse login' to link this machine to your account".yellow());
    }

    println!();
    println!("{}", "Queue:".bold());
    println!("  {} {}", "Queued records:".dimmed(), report.queued_records);
    if let Some(last) = report.last_flush_at {
        let verdict = match report.last_flush_success {
            Some(true) => "ok".green(),
            Some(false) => "kept".yellow(),
            None => "-".dimmed(),
        };
        println!(
            "  {} {} ({})",
            "Last flush:".dimmed(),
            format_relative_time(last),
            verdict
        );
    }
    if let Some(next) = report.next_flush_at {
        println!("  {} {}", "Next flush:".dimmed(), format_relative_time(next));
    }

    println!();
    println!("{}", "Daemon:".bold());
    if report.daemon_running {
        println!(
            "  {} {}",
            "running".green(),
            format!("(PID {})", report.daemon_pid.unwrap_or(0)).dimmed()
        );
    } else {
        println!("  {}", "not running".yellow());
        println!("  {}", "Start it with 'pulse daemon start'".dimmed());
    }
}

/// Formats a timestamp relative to now, for either direction.
fn format_relative_time(time: DateTime<Utc>) -> String {
    let seconds = Utc::now().signed_duration_since(time).num_seconds();

    if seconds >= 0 {
        if seconds < 60 {
            "just now".to_string()
        } else if seconds < 3600 {
            format!("{} minutes ago", seconds / 60)
        } else if seconds < 86400 {
            format!("{} hours ago", seconds / 3600)
        } else {
            format!("{} days ago", seconds / 86400)
        }
    } else {
        let ahead = -seconds;
        if ahead < 60 {
            "in under a minute".to_string()
        } else if ahead < 3600 {
            format!("in {} minutes", ahead / 60)
        } else if ahead < 86400 {
            format!("in {} hours", ahead / 3600)
        } else {
            format!("in {} days", ahead / 86400)
        }
    }
}
