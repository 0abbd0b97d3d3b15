//! Flush command - drain the offline record queue.
//!
//! Attempts one delivery of everything queued. When the daemon is
//! running the request is routed through it, so manual flushes and the
//! periodic flush share one in-flight guard. The queue is only cleared
//! when the backend accepted the batch and connectivity was confirmed
//! afterwards.

use anyhow::Result;
use colored::Colorize;

use crate::daemon::{send_command_sync, DaemonCommand, DaemonResponse, DaemonState};
use crate::flush::FlushOutcome;
use crate::relay::Relay;

/// Arguments for the flush command.
#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    pulse flush                Deliver all queued records now")]
pub struct Args {}

/// Executes the flush command.
pub fn run(_args: Args) -> Result<()> {
    let state = DaemonState::new()?;
    if state.is_running() {
        match send_command_sync(&state.socket_path, DaemonCommand::Flush) {
            Ok(DaemonResponse::FlushResult { outcome, records }) => {
                report_outcome(&outcome, records);
                return Ok(());
            }
            Ok(DaemonResponse::Error { message }) => {
                println!("{} Daemon flush failed: {}", "Warning:".yellow(), message);
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Daemon unreachable, flushing directly: {}", e);
            }
        }
    }

    let relay = Relay::from_default_config()?;

    let queued = relay.queued_records();
    if queued == 0 {
        println!("Nothing queued.");
        return Ok(());
    }

    println!("Delivering {queued} queued record(s)...");

    let outcome = relay.send_offline_data()?;
    if let FlushOutcome::Deferred { error } = &outcome {
        println!("{} Could not deliver: {}", "Warning:".yellow(), error);
        println!("{}", "Records stay queued and will retry later.".dimmed());
    } else {
        report_outcome(outcome.label(), outcome.records());
    }

    Ok(())
}

fn report_outcome(outcome: &str, records: usize) {
    match outcome {
        "empty" => println!("Nothing queued."),
        "flushed" => println!("{} Delivered {} record(s)", "✓".green(), records),
        "discarded" => println!(
            "{} Account deactivated; dropped {} record(s)",
            "Warning:".yellow(),
            records
        ),
        "awaiting_connectivity" => {
            println!(
                "{} Submitted, but connectivity was not confirmed. {} record(s) kept for retry.",
                "Warning:".yellow(),
                records
            );
        }
        "deferred" => {
            println!("{} Could not deliver.", "Warning:".yellow());
            println!("{}", "Records stay queued and will retry later.".dimmed());
        }
        "in_flight" => println!("{}", "Another flush is already running.".yellow()),
        other => println!("Flush finished: {other}"),
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deferred_outcome_maps_to_label() {
        let outcome = FlushOutcome::Deferred {
            error: crate::api::ApiError::MissingToken,
        };
        assert_eq!(outcome.label(), "deferred");
    }
}
