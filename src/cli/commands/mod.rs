//! CLI commands for pulse.
//!
//! Each submodule implements a single CLI command with its argument
//! parsing and execution logic.

/// Record a coding heartbeat.
pub mod beat;

/// Generate shell completion scripts.
pub mod completions;

/// Configuration viewing and management.
pub mod config;

/// Manage the background daemon.
pub mod daemon;

/// Drain the offline record queue.
pub mod flush;

/// Log in through the browser.
pub mod login;

/// Discard the stored identity.
pub mod logout;

/// Show login state and queue depth.
pub mod status;
