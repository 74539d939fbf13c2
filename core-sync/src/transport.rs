//! History transport seam
//!
//! The engine talks to the server through this trait so tests can script
//! server behavior. The production implementation is [`ApiClient`].

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use core_api::types::HistoryPayload;
use core_api::ApiClient;
use tracing::debug;

/// Server side of history synchronization.
#[async_trait]
pub trait HistoryTransport: Send + Sync {
    /// `POST /history/sync`. The response is the authoritative record.
    async fn send(&self, record: &HistoryPayload) -> Result<HistoryPayload>;

    /// `GET /history/book/:bookId`.
    async fn fetch(&self, book_id: &str) -> Result<Option<HistoryPayload>>;

    /// Last-resort unload-time transmit: non-blocking, no response
    /// handling. Total failure is acceptable; the local write that precedes
    /// this call carries the recovery.
    fn send_and_forget(&self, record: HistoryPayload);
}

#[async_trait]
impl HistoryTransport for ApiClient {
    async fn send(&self, record: &HistoryPayload) -> Result<HistoryPayload> {
        self.sync_history(record)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    async fn fetch(&self, book_id: &str) -> Result<Option<HistoryPayload>> {
        self.history_for_book(book_id)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    fn send_and_forget(&self, record: HistoryPayload) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.sync_history(&record).await {
                debug!(error = %e, "Unload-time history transmit failed");
            }
        });
    }
}
