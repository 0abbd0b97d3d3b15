//! Backend API access.
//!
//! `client` wraps the authenticated REST surface; `probe` is the
//! unauthenticated reachability check used to gate offline-queue
//! clearing.

pub mod client;
pub mod probe;

use std::time::Duration;

#[allow(unused_imports)]
pub use client::{ApiClient, AppToken, BatchOutcome, PluginState};
#[allow(unused_imports)]
pub use probe::ConnectivityProbe;

// ==================== Constants ====================

/// Default backend endpoint, overridable via config.
pub const DEFAULT_API_URL: &str = "https://api.pulse.dev";

/// Request timeout for API calls.
pub const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Request timeout for the connectivity probe. Kept short so a dead
/// network fails the probe quickly instead of stalling a flush.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ==================== Errors ====================

/// Errors from backend API calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No identity token. Run 'pulse login' first.")]
    MissingToken,

    #[error("Identity token rejected by the backend")]
    AuthExpired,

    #[error("Network unavailable: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
}
