//! Offline queue reconciliation.
//!
//! Drains the local record store to the backend. The whole batch is
//! submitted in one request, and the store is cleared only after both
//! the submission succeeds and an independent connectivity probe
//! confirms the backend is reachable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::api::{ApiClient, ApiError, BatchOutcome, ConnectivityProbe};
use crate::store::LocalRecordStore;

/// What a flush attempt did.
#[derive(Debug)]
pub enum FlushOutcome {
    /// Nothing queued.
    Empty,
    /// Records delivered and the queue cleared.
    Flushed { records: usize },
    /// Account deactivated; records dropped and the queue cleared.
    Discarded { records: usize },
    /// Submission succeeded but reachability was not confirmed, so
    /// the queue was kept for a later retry.
    AwaitingConnectivity { records: usize },
    /// Submission failed; the queue is untouched.
    Deferred { error: ApiError },
    /// Another flush is already running.
    InFlight,
}

impl FlushOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FlushOutcome::Empty => "empty",
            FlushOutcome::Flushed { .. } => "flushed",
            FlushOutcome::Discarded { .. } => "discarded",
            FlushOutcome::AwaitingConnectivity { .. } => "awaiting_connectivity",
            FlushOutcome::Deferred { .. } => "deferred",
            FlushOutcome::InFlight => "in_flight",
        }
    }

    /// Number of records the outcome speaks for.
    pub fn records(&self) -> usize {
        match self {
            FlushOutcome::Flushed { records }
            | FlushOutcome::Discarded { records }
            | FlushOutcome::AwaitingConnectivity { records } => *records,
            _ => 0,
        }
    }
}

/// Serializes flushes of the offline queue.
///
/// Only one flush cycle runs at a time; concurrent callers get
/// [`FlushOutcome::InFlight`] and the queue stays consistent.
pub struct OfflineFlushCoordinator {
    store: Arc<LocalRecordStore>,
    probe: ConnectivityProbe,
    in_flight: AtomicBool,
}

impl OfflineFlushCoordinator {
    pub fn new(store: Arc<LocalRecordStore>, probe: ConnectivityProbe) -> Self {
        Self {
            store,
            probe,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Runs one flush cycle unless one is already in flight.
    pub fn flush_if_possible(&self, client: &ApiClient) -> FlushOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Flush already in flight, skipping");
            return FlushOutcome::InFlight;
        }

        let outcome = self.run_cycle(client);
        self.in_flight.store(false, Ordering::SeqCst);
        outcome
    }

    fn run_cycle(&self, client: &ApiClient) -> FlushOutcome {
        let batch = self.store.read_all();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        let records = batch.len();

        let outcome = match client.send_batch(&batch) {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::debug!("Batch submission failed, keeping {} record(s): {}", records, error);
                return FlushOutcome::Deferred { error };
            }
        };

        // The backend answered, but clearing is still gated on a
        // separate reachability check. A success response that races a
        // connection drop must not cost us the queue.
        if !self.probe.is_available() {
            tracing::info!(
                "Batch submitted but connectivity unconfirmed, keeping {} record(s)",
                records
            );
            return FlushOutcome::AwaitingConnectivity { records };
        }

        if let Err(e) = self.store.clear() {
            tracing::warn!("Could not clear the offline queue: {}", e);
        }

        match outcome {
            BatchOutcome::Accepted => {
                tracing::info!("Delivered {} queued record(s)", records);
                FlushOutcome::Flushed { records }
            }
            BatchOutcome::AccountDeactivated => {
                tracing::warn!("Account deactivated; dropped {} buffered record(s)", records);
                FlushOutcome::Discarded { records }
            }
        }
    }
}
