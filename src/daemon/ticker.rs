//! Periodic offline-queue flushing for the daemon.
//!
//! Drains the offline queue to the backend at regular intervals. Each
//! cycle reuses the relay's normal flush path, so the daemon gets the
//! same connectivity gating and token rotation as a manual flush.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};

use super::state::DaemonStats;
use crate::config::pulse_dir;
use crate::flush::FlushOutcome;
use crate::relay::Relay;

/// How often the timer checks whether a flush is due.
const CHECK_INTERVAL_SECS: u64 = 30;

/// Persistent state for daemon flush scheduling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlushState {
    /// When the last flush was performed (successfully or not).
    pub last_flush_at: Option<DateTime<Utc>>,
    /// When the next flush is scheduled.
    pub next_flush_at: Option<DateTime<Utc>>,
    /// Number of records delivered in the last flush.
    pub last_flush_count: Option<u64>,
    /// Whether the last flush left the queue reconciled.
    pub last_flush_success: Option<bool>,
}

impl FlushState {
    /// Returns the path to the flush state file.
    fn state_path() -> Result<PathBuf> {
        Ok(pulse_dir()?.join("daemon_state.json"))
    }

    /// Loads the flush state from disk.
    ///
    /// Returns the default state if the file does not exist.
    pub fn load() -> Result<Self> {
        let path = Self::state_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read flush state file")?;
        let state: FlushState =
            serde_json::from_str(&content).context("Failed to parse flush state file")?;
        Ok(state)
    }

    /// Saves the flush state to disk atomically.
    fn save(&self) -> Result<()> {
        let path = Self::state_path()?;
        let content = serde_json::to_string_pretty(self)?;

        // Write to a temp file first, then rename for atomicity
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &content).context("Failed to write flush state temp file")?;
        fs::rename(&temp_path, &path).context("Failed to rename flush state file")?;

        Ok(())
    }

    /// Updates the state with next flush time and saves.
    fn schedule_next(&mut self, next_at: DateTime<Utc>) -> Result<()> {
        self.next_flush_at = Some(next_at);
        self.save()
    }

    /// Updates the state after a flush attempt and saves.
    fn record_flush(&mut self, success: bool, count: u64, next_at: DateTime<Utc>) -> Result<()> {
        self.last_flush_at = Some(Utc::now());
        self.last_flush_success = Some(success);
        self.last_flush_count = Some(count);
        self.next_flush_at = Some(next_at);
        self.save()
    }
}

/// Shared flush state for the daemon.
pub type SharedFlushState = Arc<RwLock<FlushState>>;

/// Calculates the next flush time based on the last flush.
///
/// If there was a previous flush, schedules the next one an interval
/// after that. If not, or if that time has already passed, schedules
/// an interval from now.
fn calculate_next_flush(state: &FlushState, interval: chrono::Duration) -> DateTime<Utc> {
    if let Some(last_flush) = state.last_flush_at {
        // Schedule from last flush + interval
        let next = last_flush + interval;
        // If that time has already passed, schedule from now
        let now = Utc::now();
        if next <= now {
            now + interval
        } else {
            next
        }
    } else {
        // No previous flush, schedule from now
        Utc::now() + interval
    }
}

/// Runs the periodic flush timer.
///
/// This function runs until the shutdown signal is received. It checks
/// periodically whether a flush is due and drains the offline queue
/// through the relay when it is.
pub async fn run_periodic_flush(
    relay: Arc<Relay>,
    flush_state: SharedFlushState,
    stats: Arc<RwLock<DaemonStats>>,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
) {
    let flush_interval = chrono::Duration::seconds(relay.config().flush_interval_secs as i64);

    // Initialize state with next flush time
    {
        let mut state = flush_state.write().await;
        let next_flush = calculate_next_flush(&state, flush_interval);
        if let Err(e) = state.schedule_next(next_flush) {
            tracing::warn!("Failed to save initial flush state: {e}");
        } else {
            tracing::info!(
                "Periodic flush scheduled for {}",
                next_flush.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }

    let mut check_interval = interval(Duration::from_secs(CHECK_INTERVAL_SECS));

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                let should_flush = {
                    let state = flush_state.read().await;
                    if let Some(next_flush) = state.next_flush_at {
                        Utc::now() >= next_flush
                    } else {
                        false
                    }
                };

                if should_flush {
                    // The relay's HTTP client is blocking, so the
                    // flush runs on the blocking thread pool.
                    let relay_clone = relay.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        let outcome = relay_clone.send_offline_data();
                        let queued = relay_clone.queued_records();
                        (outcome, queued)
                    })
                    .await;

                    let next_flush = Utc::now() + flush_interval;
                    let (success, delivered) = match result {
                        Ok((Ok(outcome), queued)) => {
                            record_outcome(&stats, &outcome, queued).await;
                            match &outcome {
                                FlushOutcome::Flushed { records } => {
                                    tracing::info!("Periodic flush delivered {} record(s)", records);
                                    (true, *records as u64)
                                }
                                FlushOutcome::Empty => (true, 0),
                                FlushOutcome::Discarded { .. } => (true, 0),
                                other => {
                                    tracing::info!("Periodic flush left the queue in place: {}", other.label());
                                    (false, 0)
                                }
                            }
                        }
                        Ok((Err(e), _)) => {
                            tracing::warn!("Periodic flush failed: {e}");
                            (false, 0)
                        }
                        Err(e) => {
                            tracing::warn!("Periodic flush task failed: {e}");
                            (false, 0)
                        }
                    };

                    let mut state = flush_state.write().await;
                    if let Err(e) = state.record_flush(success, delivered, next_flush) {
                        tracing::warn!("Failed to save flush state: {e}");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Periodic flush shutting down");
                break;
            }
        }
    }
}

/// Folds one flush outcome into the shared daemon statistics.
async fn record_outcome(stats: &Arc<RwLock<DaemonStats>>, outcome: &FlushOutcome, queued: usize) {
    let mut stats_guard = stats.write().await;
    stats_guard.flush_attempts += 1;
    stats_guard.queued_records = queued;
    match outcome {
        FlushOutcome::Flushed { records } => {
            stats_guard.records_flushed += *records as u64;
        }
        FlushOutcome::Discarded { records } => {
            stats_guard.records_discarded += *records as u64;
        }
        FlushOutcome::AwaitingConnectivity { .. } | FlushOutcome::Deferred { .. } => {
            stats_guard.flush_failures += 1;
        }
        FlushOutcome::Empty | FlushOutcome::InFlight => {}
    }
}
