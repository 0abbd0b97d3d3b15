//! Pulse - coding activity relay
//!
//! Pulse records coding activity heartbeats, buffers them locally, and
//! delivers them to a telemetry backend once it is reachable and the
//! machine has a provisioned identity.

pub mod api;
pub mod auth;
pub mod config;
pub mod flush;
pub mod git;
pub mod relay;
pub mod retry;
pub mod store;
