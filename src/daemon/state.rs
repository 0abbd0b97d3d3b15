//! Daemon state management.
//!
//! Manages the daemon's runtime state including PID file, socket path,
//! and log file locations. Provides methods for checking if the daemon
//! is running and managing its lifecycle.

use anyhow::{Context, Result};
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use crate::config::pulse_dir;

/// Manages daemon state including paths for PID file, socket, and logs.
///
/// The daemon uses files in `~/.pulse/` to coordinate between the
/// running daemon process and CLI commands that interact with it.
pub struct DaemonState {
    /// Path to the PID file (`~/.pulse/daemon.pid`).
    pub pid_file: PathBuf,
    /// Path to the Unix socket (`~/.pulse/daemon.sock`).
    pub socket_path: PathBuf,
    /// Path to the log file (`~/.pulse/daemon.log`).
    pub log_file: PathBuf,
}

impl DaemonState {
    /// Creates a new DaemonState with default paths in `~/.pulse/`.
    ///
    /// Creates the `~/.pulse/` directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined or
    /// if the `.pulse` directory cannot be created.
    pub fn new() -> Result<Self> {
        let dir = pulse_dir()?;

        fs::create_dir_all(&dir).context("Failed to create ~/.pulse directory")?;

        Ok(Self {
            pid_file: dir.join("daemon.pid"),
            socket_path: dir.join("daemon.sock"),
            log_file: dir.join("daemon.log"),
        })
    }

    /// Checks if the daemon is currently running.
    ///
    /// Returns true if a PID file exists and the process with that PID
    /// is still alive. Returns false if no PID file exists, the PID file
    /// cannot be read, or the process is no longer running.
    pub fn is_running(&self) -> bool {
        match self.get_pid() {
            Some(pid) => Self::process_exists(pid),
            None => false,
        }
    }

    /// Gets the PID of the running daemon, if available.
    ///
    /// Returns `None` if the PID file does not exist or cannot be parsed.
    pub fn get_pid(&self) -> Option<u32> {
        if !self.pid_file.exists() {
            return None;
        }

        let mut file = fs::File::open(&self.pid_file).ok()?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).ok()?;

        contents.trim().parse().ok()
    }

    /// Writes the current process ID to the PID file.
    ///
    /// # Errors
    ///
    /// Returns an error if the PID file cannot be created or written to.
    pub fn write_pid(&self, pid: u32) -> Result<()> {
        let mut file = fs::File::create(&self.pid_file).context("Failed to create PID file")?;
        write!(file, "{pid}").context("Failed to write PID")?;
        Ok(())
    }

    /// Removes the PID file.
    ///
    /// Does not return an error if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove_pid(&self) -> Result<()> {
        if self.pid_file.exists() {
            fs::remove_file(&self.pid_file).context("Failed to remove PID file")?;
        }
        Ok(())
    }

    /// Removes the Unix socket file.
    ///
    /// Does not return an error if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove_socket(&self) -> Result<()> {
        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path).context("Failed to remove socket file")?;
        }
        Ok(())
    }

    /// Cleans up all daemon state files (PID file and socket).
    ///
    /// Called during graceful shutdown.
    pub fn cleanup(&self) -> Result<()> {
        self.remove_pid()?;
        self.remove_socket()?;
        Ok(())
    }

    /// Checks if a process with the given PID exists.
    ///
    /// Uses the `kill(pid, 0)` system call which checks for process
    /// existence without sending a signal.
    fn process_exists(pid: u32) -> bool {
        // On Unix, sending signal 0 checks if process exists
        #[cfg(unix)]
        {
            // SAFETY: kill(pid, 0) is a safe system call that only checks
            // if a process exists without sending any signal.
            unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
        }

        #[cfg(not(unix))]
        {
            // On Windows, we would need a different approach
            // For now, assume process exists if PID file exists
            let _ = pid;
            true
        }
    }
}

/// Statistics about the daemon's operation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DaemonStats {
    /// Records currently waiting in the offline queue.
    pub queued_records: usize,
    /// Total records delivered to the backend since the daemon started.
    pub records_flushed: u64,
    /// Total records dropped because the account was deactivated.
    pub records_discarded: u64,
    /// Flush cycles attempted since the daemon started.
    pub flush_attempts: u64,
    /// Flush cycles that left the queue in place.
    pub flush_failures: u64,
    /// Timestamp when the daemon started.
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl Default for DaemonStats {
    fn default() -> Self {
        Self {
            queued_records: 0,
            records_flushed: 0,
            records_discarded: 0,
            flush_attempts: 0,
            flush_failures: 0,
            started_at: chrono::Utc::now(),
        }
    }
}
