//! # Core Net
//!
//! Connectivity awareness for the continuity engine:
//!
//! - [`NetworkMonitor`] - effective online/offline state combining the
//!   platform's connectivity signal with a periodic backend health probe
//! - [`RetryManager`] - bounded fixed-backoff retry for coarse-grained
//!   recovery paths

pub mod monitor;
pub mod retry;

pub use monitor::{NetworkMonitor, NetworkSnapshot, NetworkStatus};
pub use retry::{RetryConfig, RetryManager, RetryOutcome};
