//! # Persistent Store
//!
//! The engine's single durable store: a versioned SQLite database with one
//! table per namespace and secondary indexes for the engine's scan patterns
//! ("all entries for book X", "all pending entries").
//!
//! ## Design
//!
//! - **Memoized initialization**: [`PersistentStore::pool`] opens the
//!   database at most once; concurrent callers await the same open
//!   operation.
//! - **Additive migrations**: schema versions only ever add namespaces and
//!   indexes, so existing installs migrate in place without data loss.
//! - **Namespace-scoped writes**: no transaction spans two namespaces, so a
//!   failed cover write can never roll back an unrelated history write.
//! - **Failure containment**: open or query failure is fatal to the store
//!   only. Dependents treat store errors as cache misses and continue in an
//!   always-network mode rather than crashing playback.

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use db::{PersistentStore, StoreConfig};
pub use error::{Result, StoreError};
pub use models::{
    CachedCover, CachedResponse, DownloadRecord, DownloadTask, EpisodeUrlEntry, HistoryRecord,
    QueuedPosition, SyncStatus, TaskStatus, UrlBatch, URL_BATCH_SIZE,
};
