//! Config command - manage configuration

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use crate::config::Config;

#[derive(clap::Args)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<ConfigCommand>,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
}

pub fn run(args: Args) -> Result<()> {
    match args.command {
        Some(ConfigCommand::Show) | None => show_config(),
        Some(ConfigCommand::Get { key }) => get_config(&key),
        Some(ConfigCommand::Set { key, value }) => set_config(&key, &value),
    }
}

fn show_config() -> Result<()> {
    let config = Config::load()?;

    println!("{}", "Pulse Configuration".bold());
    println!();
    println!(
        "  {}  {}",
        "File:".dimmed(),
        Config::config_path()?.display()
    );
    println!();
    println!("  {}  {}", "api_url:".dimmed(), config.api_url);
    println!(
        "  {}  {}",
        "offline_store:".dimmed(),
        config.offline_store.display()
    );
    println!(
        "  {}  {}",
        "flush_interval_secs:".dimmed(),
        config.flush_interval_secs
    );
    println!(
        "  {}  {}",
        "machine_id:".dimmed(),
        config.machine_id.as_deref().unwrap_or("(unset)")
    );
    println!("  {}  {}", "use_keychain:".dimmed(), config.use_keychain);

    Ok(())
}

fn get_config(key: &str) -> Result<()> {
    let config = Config::load()?;
    match config.get(key) {
        Some(value) => println!("{value}"),
        None => println!("{}", format!("Config key '{}' not set", key).yellow()),
    }
    Ok(())
}

fn set_config(key: &str, value: &str) -> Result<()> {
    let mut config = Config::load()?;
    config.set(key, value)?;
    config.save()?;

    let stored = config.get(key).unwrap_or_default();
    println!("{} {} = {}", "✓".green(), key, stored);
    Ok(())
}
