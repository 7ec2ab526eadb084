//! Relay and session statistics

pub mod metrics;

pub use metrics::{RelayStats, RelayStatsSnapshot, SessionStats, SessionStatsSnapshot};
