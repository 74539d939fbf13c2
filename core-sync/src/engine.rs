//! # History Sync Engine
//!
//! Local-first recording of listening positions with eventual server
//! convergence.
//!
//! ## Write path
//!
//! Every position update appends to the `history_queue` log unconditionally
//! (no position is silently dropped) and upserts the primary `history` row
//! at most once per throttle window per book (bounding write
//! amplification).
//!
//! ## Sync pass
//!
//! On transition to online, pending queue rows are grouped by book and only
//! the latest-timestamp row per book is transmitted; superseded rows are
//! marked synced without individual transmission. The server's response is
//! authoritative and overwrites the local record. Failed books stay pending
//! for the next pass, so out-of-order completion can never regress a
//! position.
//!
//! ## Conflict resolution
//!
//! [`get_best_history`](HistorySyncEngine::get_best_history) is
//! last-write-wins by `last_played_at`; offline, local wins by default. The
//! losing side is overwritten so both converge.

use crate::error::{Result, SyncError};
use crate::transport::HistoryTransport;
use core_api::types::HistoryPayload;
use core_net::monitor::NetworkMonitor;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_store::models::{HistoryRecord, SyncStatus};
use core_store::repositories::history_queue::NewQueuedPosition;
use core_store::repositories::{HistoryRepository, QueueRepository};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Synced queue rows older than this are swept after a successful pass.
const SYNCED_ROW_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries transmitted (at most one per book).
    pub sent: usize,
    /// Superseded entries marked synced without transmission.
    pub coalesced: usize,
    /// Books whose latest entry failed and stays pending.
    pub failed: usize,
}

struct SyncInner {
    history: Arc<dyn HistoryRepository>,
    queue: Arc<dyn QueueRepository>,
    transport: Arc<dyn HistoryTransport>,
    monitor: NetworkMonitor,
    event_bus: EventBus,
    throttle_ms: i64,
    last_primary_write: Mutex<HashMap<String, i64>>,
    shutdown: CancellationToken,
}

/// Local-first playback-position recorder and reconciler.
#[derive(Clone)]
pub struct HistorySyncEngine {
    inner: Arc<SyncInner>,
}

impl HistorySyncEngine {
    pub fn new(
        history: Arc<dyn HistoryRepository>,
        queue: Arc<dyn QueueRepository>,
        transport: Arc<dyn HistoryTransport>,
        monitor: NetworkMonitor,
        event_bus: EventBus,
        throttle: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                history,
                queue,
                transport,
                monitor,
                event_bus,
                throttle_ms: throttle.as_millis() as i64,
                last_primary_write: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Record a position update.
    ///
    /// The queue append is unconditional; the primary `history` write is
    /// throttled per book. Storage failures are logged and swallowed: a
    /// position write must never interrupt audio.
    #[instrument(skip(self))]
    pub async fn record_position(
        &self,
        book_id: &str,
        episode_index: u32,
        current_time: f64,
        playback_rate: f64,
    ) {
        let now = chrono::Utc::now().timestamp_millis();

        let entry = NewQueuedPosition {
            book_id: book_id.to_string(),
            episode_index,
            current_time,
            playback_rate,
            timestamp: now,
        };
        if let Err(e) = self.inner.queue.append(&entry).await {
            warn!(book_id, error = %e, "Position queue append failed");
        }

        let should_write_primary = {
            let mut last_writes = self.inner.last_primary_write.lock().await;
            match last_writes.get(book_id) {
                Some(last) if now - last < self.inner.throttle_ms => false,
                _ => {
                    last_writes.insert(book_id.to_string(), now);
                    true
                }
            }
        };

        if should_write_primary {
            let record = HistoryRecord {
                book_id: book_id.to_string(),
                current_time,
                episode_index,
                playback_rate,
                last_played_at: now,
                sync_status: SyncStatus::Pending,
            };
            if let Err(e) = self.inner.history.upsert(&record).await {
                warn!(book_id, error = %e, "Primary history write failed");
            }
        } else {
            debug!(book_id, "Primary write suppressed by throttle window");
        }
    }

    /// Flush the pending queue, coalescing entries per book to latest-wins.
    ///
    /// Invoked on every transition to online; safe to call at any time.
    #[instrument(skip(self))]
    pub async fn sync_pending_queue(&self) -> Result<SyncReport> {
        let pending = self
            .inner
            .queue
            .pending()
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        if pending.is_empty() {
            return Ok(SyncReport::default());
        }

        // Group by book; the queue is ordered oldest-first, so the last
        // entry per book is the latest.
        let mut by_book: HashMap<String, Vec<_>> = HashMap::new();
        for entry in pending {
            by_book.entry(entry.book_id.clone()).or_default().push(entry);
        }

        let mut report = SyncReport::default();

        for (book_id, entries) in by_book {
            let latest = entries
                .last()
                .expect("grouped entries are never empty")
                .clone();

            let payload = HistoryPayload {
                book_id: book_id.clone(),
                current_time: latest.current_time,
                episode_index: latest.episode_index,
                playback_rate: latest.playback_rate,
                last_played_at: latest.timestamp,
            };

            match self.inner.transport.send(&payload).await {
                Ok(authoritative) => {
                    // The server's answer overwrites the local record.
                    let record = payload_to_record(&authoritative, SyncStatus::Synced);
                    if let Err(e) = self.inner.history.upsert(&record).await {
                        warn!(book_id, error = %e, "Authoritative history write failed");
                    }

                    let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
                    self.inner
                        .queue
                        .mark_synced(&ids)
                        .await
                        .map_err(|e| SyncError::Storage(e.to_string()))?;

                    report.sent += 1;
                    report.coalesced += entries.len() - 1;
                }
                Err(e) => {
                    // Stays pending for the next pass.
                    warn!(book_id, error = %e, "History sync failed for book");
                    report.failed += 1;
                }
            }
        }

        let cutoff =
            chrono::Utc::now().timestamp_millis() - SYNCED_ROW_RETENTION.as_millis() as i64;
        if let Err(e) = self.inner.queue.sweep_synced(cutoff).await {
            warn!(error = %e, "Synced-row sweep failed");
        }

        info!(
            sent = report.sent,
            coalesced = report.coalesced,
            failed = report.failed,
            "History queue flushed"
        );
        let _ = self
            .inner
            .event_bus
            .emit(CoreEvent::Sync(SyncEvent::QueueFlushed {
                sent: report.sent,
                coalesced: report.coalesced,
                failed: report.failed,
            }));

        Ok(report)
    }

    /// Resolve the best-known history for a book when resuming it.
    ///
    /// Offline, local wins by default. With both sides present, the later
    /// `last_played_at` wins and the loser is overwritten locally so the two
    /// converge.
    #[instrument(skip(self))]
    pub async fn get_best_history(&self, book_id: &str) -> Result<Option<HistoryRecord>> {
        let local = self
            .inner
            .history
            .find_by_book(book_id)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        if !self.inner.monitor.is_online() {
            debug!(book_id, "Offline; local history wins by default");
            return Ok(local);
        }

        let server = match self.inner.transport.fetch(book_id).await {
            Ok(server) => server,
            Err(e) => {
                // Connectivity trouble mid-check: same as offline.
                debug!(book_id, error = %e, "Server history unavailable; using local");
                return Ok(local);
            }
        };

        match (local, server) {
            (None, None) => Ok(None),
            (Some(local), None) => Ok(Some(local)),
            (None, Some(server)) => {
                let record = payload_to_record(&server, SyncStatus::Synced);
                if let Err(e) = self.inner.history.upsert(&record).await {
                    warn!(book_id, error = %e, "Server history write failed");
                }
                self.emit_reconciled(book_id, "server");
                Ok(Some(record))
            }
            (Some(local), Some(server)) => {
                if server.last_played_at > local.last_played_at {
                    let record = payload_to_record(&server, SyncStatus::Synced);
                    if let Err(e) = self.inner.history.upsert(&record).await {
                        warn!(book_id, error = %e, "Server history write failed");
                    }
                    self.emit_reconciled(book_id, "server");
                    Ok(Some(record))
                } else {
                    // Local wins; local storage is left untouched and the
                    // pending queue will push it to the server.
                    self.emit_reconciled(book_id, "local");
                    Ok(Some(local))
                }
            }
        }
    }

    /// Unload-time durability path: write locally first, then fire a
    /// best-effort transmit with no response handling. Even total transport
    /// failure recovers on next start from the queued row.
    #[instrument(skip(self))]
    pub async fn flush_on_unload(
        &self,
        book_id: &str,
        episode_index: u32,
        current_time: f64,
        playback_rate: f64,
    ) {
        let now = chrono::Utc::now().timestamp_millis();

        let record = HistoryRecord {
            book_id: book_id.to_string(),
            current_time,
            episode_index,
            playback_rate,
            last_played_at: now,
            sync_status: SyncStatus::Pending,
        };
        if let Err(e) = self.inner.history.upsert(&record).await {
            warn!(book_id, error = %e, "Unload-time history write failed");
        }

        let entry = NewQueuedPosition {
            book_id: book_id.to_string(),
            episode_index,
            current_time,
            playback_rate,
            timestamp: now,
        };
        if let Err(e) = self.inner.queue.append(&entry).await {
            warn!(book_id, error = %e, "Unload-time queue append failed");
        }

        self.inner.transport.send_and_forget(HistoryPayload {
            book_id: book_id.to_string(),
            current_time,
            episode_index,
            playback_rate,
            last_played_at: now,
        });
    }

    /// Start flushing the queue on every transition to online.
    pub fn start(&self) {
        let inner = Arc::clone(&self.inner);
        let engine = self.clone();
        let mut changes = self.inner.monitor.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = changes.borrow_and_update().is_online();
                        if online {
                            info!("Back online; flushing pending history queue");
                            if let Err(e) = engine.sync_pending_queue().await {
                                warn!(error = %e, "Online-transition sync failed");
                            }
                        }
                    }
                }
            }
            debug!("History sync loop stopped");
        });
    }

    /// Stop the online-transition loop.
    pub fn dispose(&self) {
        self.inner.shutdown.cancel();
    }

    fn emit_reconciled(&self, book_id: &str, winner: &str) {
        let _ = self
            .inner
            .event_bus
            .emit(CoreEvent::Sync(SyncEvent::HistoryReconciled {
                book_id: book_id.to_string(),
                winner: winner.to_string(),
            }));
    }
}

fn payload_to_record(payload: &HistoryPayload, sync_status: SyncStatus) -> HistoryRecord {
    HistoryRecord {
        book_id: payload.book_id.clone(),
        current_time: payload.current_time,
        episode_index: payload.episode_index,
        playback_rate: payload.playback_rate,
        last_played_at: payload.last_played_at,
        sync_status,
    }
}
