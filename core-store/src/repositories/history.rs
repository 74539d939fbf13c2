//! History repository
//!
//! Exactly one row per book; every write is an upsert keyed by book id.

use crate::db::PersistentStore;
use crate::error::Result;
use crate::models::{HistoryRecord, SyncStatus};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Repository for the `history` namespace.
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Insert or replace the record for a book.
    async fn upsert(&self, record: &HistoryRecord) -> Result<()>;

    /// Find the record for a book.
    async fn find_by_book(&self, book_id: &str) -> Result<Option<HistoryRecord>>;

    /// Scan by sync status (secondary index).
    async fn find_by_sync_status(&self, status: SyncStatus) -> Result<Vec<HistoryRecord>>;

    /// Flip the sync flag for a book.
    async fn set_sync_status(&self, book_id: &str, status: SyncStatus) -> Result<()>;

    /// Delete the record for a book.
    async fn delete(&self, book_id: &str) -> Result<bool>;
}

/// SQLite implementation of [`HistoryRepository`].
pub struct SqliteHistoryRepository {
    store: Arc<PersistentStore>,
}

impl SqliteHistoryRepository {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HistoryRepository for SqliteHistoryRepository {
    async fn upsert(&self, record: &HistoryRecord) -> Result<()> {
        let pool = self.store.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO history
                (book_id, current_time_secs, episode_index, playback_rate, last_played_at, sync_status)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (book_id) DO UPDATE SET
                current_time_secs = excluded.current_time_secs,
                episode_index = excluded.episode_index,
                playback_rate = excluded.playback_rate,
                last_played_at = excluded.last_played_at,
                sync_status = excluded.sync_status
            "#,
        )
        .bind(&record.book_id)
        .bind(record.current_time)
        .bind(record.episode_index as i64)
        .bind(record.playback_rate)
        .bind(record.last_played_at)
        .bind(record.sync_status.as_str())
        .execute(pool)
        .await?;

        debug!(book_id = %record.book_id, "History upserted");
        Ok(())
    }

    async fn find_by_book(&self, book_id: &str) -> Result<Option<HistoryRecord>> {
        let pool = self.store.pool().await?;
        let record = sqlx::query_as::<_, HistoryRecord>(
            "SELECT * FROM history WHERE book_id = ?",
        )
        .bind(book_id)
        .fetch_optional(pool)
        .await?;
        Ok(record)
    }

    async fn find_by_sync_status(&self, status: SyncStatus) -> Result<Vec<HistoryRecord>> {
        let pool = self.store.pool().await?;
        let records = sqlx::query_as::<_, HistoryRecord>(
            "SELECT * FROM history WHERE sync_status = ? ORDER BY last_played_at DESC",
        )
        .bind(status.as_str())
        .fetch_all(pool)
        .await?;
        Ok(records)
    }

    async fn set_sync_status(&self, book_id: &str, status: SyncStatus) -> Result<()> {
        let pool = self.store.pool().await?;
        sqlx::query("UPDATE history SET sync_status = ? WHERE book_id = ?")
            .bind(status.as_str())
            .bind(book_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, book_id: &str) -> Result<bool> {
        let pool = self.store.pool().await?;
        let result = sqlx::query("DELETE FROM history WHERE book_id = ?")
            .bind(book_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
