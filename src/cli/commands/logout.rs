//! Logout command - discard the stored identity.
//!
//! Deletes the identity token from the keychain and any fallback
//! credentials file. Queued records stay buffered; they deliver once
//! a fresh identity is provisioned.

use anyhow::Result;
use colored::Colorize;

use crate::relay::Relay;

/// Arguments for the logout command.
#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    pulse logout               Discard the stored identity token")]
pub struct Args {}

/// Executes the logout command.
pub fn run(_args: Args) -> Result<()> {
    let relay = Relay::from_default_config()?;

    if !relay.has_identity() {
        println!("{}", "No identity stored.".yellow());
        return Ok(());
    }

    relay.logout()?;

    println!("Logged out.");
    let queued = relay.queued_records();
    if queued > 0 {
        println!(
            "{}",
            format!("{queued} queued record(s) will deliver after the next onboarding.").dimmed()
        );
    }

    Ok(())
}
