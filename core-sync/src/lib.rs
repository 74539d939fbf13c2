//! # Core Sync
//!
//! Local-first playback-position recording and server reconciliation.
//!
//! The [`HistorySyncEngine`] writes every position update locally (throttled
//! primary write + unthrottled append-only queue), flushes the queue when
//! connectivity returns (coalescing to latest-per-book), and reconciles
//! local vs. server history by last-write-wins timestamp. The consistency
//! model is deliberately eventual: convergence, not strict multi-device
//! agreement.

pub mod engine;
pub mod error;
pub mod transport;

pub use engine::{HistorySyncEngine, SyncReport};
pub use error::{Result, SyncError};
pub use transport::HistoryTransport;
