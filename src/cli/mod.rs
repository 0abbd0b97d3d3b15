//! Command-line interface for pulse.
//!
//! Provides the CLI commands for recording heartbeats, managing the
//! offline queue, logging in, and controlling the background daemon.

/// Individual CLI command implementations.
pub mod commands;

/// Output formatting utilities.
pub mod format;
