//! # Event Bus System
//!
//! Provides an event-driven architecture for the Audiobook Platform Core
//! using `tokio::sync::broadcast`. Core modules emit typed events; any number
//! of subscribers (UI shell, diagnostics, tests) listen independently.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ NetworkMon   ├──────────────>│           │
//! └──────────────┘               │           │
//! ┌──────────────┐     emit      │ EventBus  │     subscribe    ┌────────────┐
//! │ DownloadMgr  ├──────────────>│ (broadcast├─────────────────>│ Subscriber │
//! └──────────────┘               │  channel) │                  └────────────┘
//! ┌──────────────┐     emit      │           │
//! │ HistorySync  ├──────────────>│           │
//! └──────────────┘               └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, CoreEvent, NetworkEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Network(NetworkEvent::StatusChanged {
//!         online: false,
//!         mode: "unknown".to_string(),
//!     }))
//!     .ok();
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: subscriber was too slow and missed `n`
//!   events. Non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: all senders dropped — shutdown signal.
//!
//! Emission is advisory: every `emit` call site ignores the error returned
//! when no subscriber exists (`let _ = bus.emit(..)`).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Connectivity events
    Network(NetworkEvent),
    /// Authentication/session events
    Auth(AuthEvent),
    /// Episode URL cache events
    Cache(CacheEvent),
    /// Download queue events
    Download(DownloadEvent),
    /// History sync events
    Sync(SyncEvent),
}

/// Events emitted by the network monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum NetworkEvent {
    /// Effective connectivity changed. Emitted only on transitions.
    StatusChanged {
        online: bool,
        /// Connection mode: "wifi", "cellular", or "unknown"
        mode: String,
    },
}

/// Events related to the authentication session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// Access token is being refreshed.
    TokenRefreshing,
    /// Token refresh completed successfully.
    TokenRefreshed {
        /// Unix epoch milliseconds when the new token expires.
        expires_at: i64,
    },
    /// The session was torn down; the user must re-authenticate.
    SessionExpired {
        /// Human-readable reason ("refresh rejected", "sign-out").
        reason: String,
    },
}

/// Events emitted by the episode URL cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// A signed-URL batch was fetched and stored.
    UrlBatchPrefetched { book_id: String, batch_number: u32 },
    /// All cached URLs for a book were purged.
    UrlCacheInvalidated { book_id: String },
}

/// Events emitted by the download manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// A download task was enqueued and persisted.
    Queued {
        task_id: String,
        book_id: String,
        episode_index: u32,
    },
    /// A task left the queue and its transfer began.
    Started { task_id: String },
    /// Incremental progress, emitted per received chunk.
    Progress {
        task_id: String,
        /// Percentage 0-100 (0 while total size is unknown).
        progress: u8,
        bytes_downloaded: u64,
        total_bytes: u64,
    },
    /// The file was written and metadata recorded.
    Completed { task_id: String },
    /// The transfer failed; the task is terminal.
    Failed { task_id: String, message: String },
    /// The task was cancelled; partial bytes were discarded.
    Cancelled { task_id: String },
    /// A downloaded episode (file + metadata) was removed.
    Deleted { book_id: String, episode_index: u32 },
}

/// Events emitted by the history sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A sync pass over the pending queue finished.
    QueueFlushed {
        /// Entries actually transmitted (one per book).
        sent: usize,
        /// Superseded entries marked synced without transmission.
        coalesced: usize,
        /// Entries left pending for the next pass.
        failed: usize,
    },
    /// Local and server history were reconciled for a book.
    HistoryReconciled {
        book_id: String,
        /// Which side won: "local" or "server"
        winner: String,
    },
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Network(NetworkEvent::StatusChanged { online: true, .. }) => {
                "Network became reachable"
            }
            CoreEvent::Network(NetworkEvent::StatusChanged { online: false, .. }) => {
                "Network became unreachable"
            }
            CoreEvent::Auth(AuthEvent::TokenRefreshing) => "Refreshing access token",
            CoreEvent::Auth(AuthEvent::TokenRefreshed { .. }) => "Access token refreshed",
            CoreEvent::Auth(AuthEvent::SessionExpired { .. }) => "Session expired",
            CoreEvent::Cache(CacheEvent::UrlBatchPrefetched { .. }) => "URL batch prefetched",
            CoreEvent::Cache(CacheEvent::UrlCacheInvalidated { .. }) => "URL cache invalidated",
            CoreEvent::Download(DownloadEvent::Queued { .. }) => "Download queued",
            CoreEvent::Download(DownloadEvent::Started { .. }) => "Download started",
            CoreEvent::Download(DownloadEvent::Progress { .. }) => "Download progress",
            CoreEvent::Download(DownloadEvent::Completed { .. }) => "Download completed",
            CoreEvent::Download(DownloadEvent::Failed { .. }) => "Download failed",
            CoreEvent::Download(DownloadEvent::Cancelled { .. }) => "Download cancelled",
            CoreEvent::Download(DownloadEvent::Deleted { .. }) => "Download deleted",
            CoreEvent::Sync(SyncEvent::QueueFlushed { .. }) => "History queue flushed",
            CoreEvent::Sync(SyncEvent::HistoryReconciled { .. }) => "History reconciled",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for publishing core events.
///
/// Cloning an `EventBus` is cheap and every clone publishes into the same
/// channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of subscribers that received the event. An error
    /// means no subscriber existed, which callers treat as advisory.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}
