//! Login command - link this machine to a user account.
//!
//! Opens the backend's login page in a browser. The identity token
//! stays the same; logging in registers it to an account, which the
//! command confirms by polling the backend afterwards.

use anyhow::{bail, Result};
use colored::Colorize;
use std::time::Duration;

use crate::auth::AuthState;
use crate::relay::Relay;

/// Arguments for the login command.
#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    pulse login                Link this machine to your account")]
pub struct Args {}

/// How long to wait for a freshly provisioned identity token.
const PROVISION_WAIT: Duration = Duration::from_millis(500);
const PROVISION_ATTEMPTS: usize = 20;

/// Executes the login command.
pub fn run(_args: Args) -> Result<()> {
    let relay = Relay::from_default_config()?;

    // Check if already logged in
    if let AuthState::LoggedIn { name } = relay.login_state() {
        println!(
            "Already logged in as {}",
            name.as_deref().unwrap_or("your account").cyan()
        );
        println!("Run 'pulse logout' first to switch accounts.");
        return Ok(());
    }

    // Login registers the existing token, so one has to exist first.
    if !relay.has_identity() {
        println!("No identity token yet, provisioning one...");
        relay.ensure_identity();

        let mut provisioned = false;
        for _ in 0..PROVISION_ATTEMPTS {
            std::thread::sleep(PROVISION_WAIT);
            if relay.has_identity() {
                provisioned = true;
                break;
            }
        }
        if !provisioned {
            bail!("Could not provision an identity token. Check connectivity and try again.");
        }
    }

    let login_url = relay.begin_login()?;

    println!("Opening browser to log in...");
    println!();
    println!("If the browser does not open, visit:");
    println!("  {}", login_url.cyan());
    println!();

    // Open browser
    if let Err(e) = webbrowser::open(&login_url) {
        eprintln!("Failed to open browser: {e}");
        println!("Please open the URL above manually.");
    }

    println!("{}", "Waiting for login confirmation...".dimmed());

    while relay.login_pending() {
        std::thread::sleep(Duration::from_millis(500));
    }

    match relay.cached_login_state() {
        AuthState::LoggedIn { name } => {
            println!();
            println!(
                "{} Logged in as {}",
                "Success!".green().bold(),
                name.as_deref().unwrap_or("your account").cyan()
            );
        }
        _ => {
            println!();
            println!("{}", "Login not confirmed yet.".yellow());
            println!("Finish the login in your browser, then check 'pulse status'.");
        }
    }

    Ok(())
}
