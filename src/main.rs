use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod cli;
mod config;
mod daemon;
mod flush;
mod git;
mod relay;
mod retry;
mod store;

use cli::commands;

/// The main CLI command line interface.
#[derive(Parser)]
#[command(name = "pulse")]
#[command(version)]
#[command(about = "Track coding activity and relay it to your telemetry backend")]
#[command(long_about = "Pulse records coding activity heartbeats and relays them to a\n\
    telemetry backend, online or not.\n\n\
    Every heartbeat is buffered locally first, then delivered in batches\n\
    once the backend is reachable and this machine has an identity token.\n\
    Nothing is lost to a flaky connection.")]
#[command(after_help = "EXAMPLES:\n    \
    pulse beat src/main.rs   Record a heartbeat for a file\n    \
    pulse status             Show identity, queue, and daemon state\n    \
    pulse login              Link this machine to your account\n    \
    pulse flush              Deliver all queued records now\n    \
    pulse daemon start       Start the background delivery daemon\n\n\
    For more information about a command, run 'pulse <command> --help'.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Record a coding activity heartbeat
    #[command(long_about = "Records one activity heartbeat and queues it locally. If the\n\
        backend is reachable the queue is delivered immediately, otherwise\n\
        records wait for the daemon or a later flush. Repository, branch,\n\
        and remote URL are picked up from the surrounding git checkout.")]
    Beat(commands::beat::Args),

    /// Show identity, queue, and daemon state
    #[command(long_about = "Displays an overview of the relay: whether an identity token is\n\
        stored, whether it is linked to an account, how many records are\n\
        queued, and what the daemon last did.")]
    Status(commands::status::Args),

    /// Link this machine to your account
    #[command(long_about = "Opens the account login page in a browser and waits for the\n\
        backend to confirm the link. Requires an identity token, which is\n\
        provisioned automatically on first use.")]
    Login(commands::login::Args),

    /// Remove the stored identity token
    #[command(long_about = "Deletes the identity token from the keychain (or its file\n\
        fallback). Queued records are kept and deliver after the next\n\
        token is provisioned.")]
    Logout(commands::logout::Args),

    /// Deliver all queued records now
    #[command(long_about = "Attempts one delivery of everything queued. When the daemon is\n\
        running the flush is routed through it so only one delivery runs\n\
        at a time.")]
    Flush(commands::flush::Args),

    /// View and manage configuration settings
    #[command(long_about = "Provides subcommands to show, get, and set configuration values.\n\
        Configuration is stored in ~/.pulse/config.yaml.")]
    Config(commands::config::Args),

    /// Manage the background delivery daemon
    #[command(long_about = "Controls the background daemon that delivers queued records on a\n\
        schedule and keeps the identity provisioned.")]
    Daemon(commands::daemon::Args),

    /// Generate shell completion scripts
    #[command(long_about = "Generates completion scripts for bash, zsh, fish, powershell,\n\
        or elvish. Pipe the output to the location your shell expects.")]
    Completions(commands::completions::Args),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "pulse=debug"
    } else {
        "pulse=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    match cli.command {
        Commands::Beat(args) => commands::beat::run(args),
        Commands::Status(args) => commands::status::run(args),
        Commands::Login(args) => commands::login::run(args),
        Commands::Logout(args) => commands::logout::run(args),
        Commands::Flush(args) => commands::flush::run(args),
        Commands::Config(args) => commands::config::run(args),
        Commands::Daemon(args) => commands::daemon::run(args),
        Commands::Completions(args) => {
            commands::completions::generate_completions(&mut Cli::command(), args.shell);
            Ok(())
        }
    }
}
