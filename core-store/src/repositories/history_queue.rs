//! History queue repository
//!
//! Append-only log of observed positions. Rows accumulate while offline and
//! are flagged `synced` during a sync pass; a periodic sweep removes old
//! synced rows so the table stays bounded.

use crate::db::PersistentStore;
use crate::error::Result;
use crate::models::QueuedPosition;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// A position observation to append; the id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewQueuedPosition {
    pub book_id: String,
    pub episode_index: u32,
    pub current_time: f64,
    pub playback_rate: f64,
    pub timestamp: i64,
}

/// Repository for the `history_queue` namespace.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Append one observation, returning its assigned id.
    async fn append(&self, entry: &NewQueuedPosition) -> Result<i64>;

    /// All unsynced rows, oldest first (synced secondary index).
    async fn pending(&self) -> Result<Vec<QueuedPosition>>;

    /// All unsynced rows for one book (book secondary index).
    async fn pending_for_book(&self, book_id: &str) -> Result<Vec<QueuedPosition>>;

    /// Flag the given rows as synced.
    async fn mark_synced(&self, ids: &[i64]) -> Result<()>;

    /// Remove synced rows older than the cutoff. Returns rows removed.
    async fn sweep_synced(&self, older_than: i64) -> Result<u64>;
}

/// SQLite implementation of [`QueueRepository`].
pub struct SqliteQueueRepository {
    store: Arc<PersistentStore>,
}

impl SqliteQueueRepository {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    async fn append(&self, entry: &NewQueuedPosition) -> Result<i64> {
        let pool = self.store.pool().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO history_queue
                (book_id, episode_index, current_time_secs, playback_rate, timestamp, synced)
            VALUES (?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&entry.book_id)
        .bind(entry.episode_index as i64)
        .bind(entry.current_time)
        .bind(entry.playback_rate)
        .bind(entry.timestamp)
        .execute(pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn pending(&self) -> Result<Vec<QueuedPosition>> {
        let pool = self.store.pool().await?;
        let rows = sqlx::query_as::<_, QueuedPosition>(
            "SELECT * FROM history_queue WHERE synced = 0 ORDER BY timestamp ASC, id ASC",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    async fn pending_for_book(&self, book_id: &str) -> Result<Vec<QueuedPosition>> {
        let pool = self.store.pool().await?;
        let rows = sqlx::query_as::<_, QueuedPosition>(
            "SELECT * FROM history_queue WHERE synced = 0 AND book_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(book_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    async fn mark_synced(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let pool = self.store.pool().await?;

        // SQLite has no array binds; build the placeholder list.
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE history_queue SET synced = 1 WHERE id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query.execute(pool).await?;

        debug!(count = ids.len(), "Queue rows marked synced");
        Ok(())
    }

    async fn sweep_synced(&self, older_than: i64) -> Result<u64> {
        let pool = self.store.pool().await?;
        let result =
            sqlx::query("DELETE FROM history_queue WHERE synced = 1 AND timestamp < ?")
                .bind(older_than)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }
}
