//! Downloaded-episode metadata repository

use crate::db::PersistentStore;
use crate::error::Result;
use crate::models::DownloadRecord;
use async_trait::async_trait;
use std::sync::Arc;

/// Repository for the `downloads` namespace.
#[async_trait]
pub trait DownloadsRepository: Send + Sync {
    /// Insert or replace the metadata row for an episode file.
    async fn upsert(&self, record: &DownloadRecord) -> Result<()>;

    /// Find the metadata row for one episode.
    async fn find(&self, book_id: &str, episode_index: u32) -> Result<Option<DownloadRecord>>;

    /// All downloaded episodes for a book (book secondary index).
    async fn find_by_book(&self, book_id: &str) -> Result<Vec<DownloadRecord>>;

    /// Every downloaded episode.
    async fn find_all(&self) -> Result<Vec<DownloadRecord>>;

    /// Remove the metadata row for one episode.
    async fn delete(&self, book_id: &str, episode_index: u32) -> Result<bool>;

    /// Remove every row for a book. Returns rows removed.
    async fn delete_by_book(&self, book_id: &str) -> Result<u64>;
}

/// SQLite implementation of [`DownloadsRepository`].
pub struct SqliteDownloadsRepository {
    store: Arc<PersistentStore>,
}

impl SqliteDownloadsRepository {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DownloadsRepository for SqliteDownloadsRepository {
    async fn upsert(&self, record: &DownloadRecord) -> Result<()> {
        let pool = self.store.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO downloads
                (key, book_id, episode_index, file_path, file_size, file_name, downloaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                file_path = excluded.file_path,
                file_size = excluded.file_size,
                file_name = excluded.file_name,
                downloaded_at = excluded.downloaded_at
            "#,
        )
        .bind(record.key())
        .bind(&record.book_id)
        .bind(record.episode_index as i64)
        .bind(&record.file_path)
        .bind(record.file_size as i64)
        .bind(&record.file_name)
        .bind(record.downloaded_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn find(&self, book_id: &str, episode_index: u32) -> Result<Option<DownloadRecord>> {
        let pool = self.store.pool().await?;
        let row = sqlx::query_as::<_, DownloadRecord>("SELECT * FROM downloads WHERE key = ?")
            .bind(DownloadRecord::key_for(book_id, episode_index))
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    async fn find_by_book(&self, book_id: &str) -> Result<Vec<DownloadRecord>> {
        let pool = self.store.pool().await?;
        let rows = sqlx::query_as::<_, DownloadRecord>(
            "SELECT * FROM downloads WHERE book_id = ? ORDER BY episode_index ASC",
        )
        .bind(book_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    async fn find_all(&self) -> Result<Vec<DownloadRecord>> {
        let pool = self.store.pool().await?;
        let rows = sqlx::query_as::<_, DownloadRecord>(
            "SELECT * FROM downloads ORDER BY book_id ASC, episode_index ASC",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    async fn delete(&self, book_id: &str, episode_index: u32) -> Result<bool> {
        let pool = self.store.pool().await?;
        let result = sqlx::query("DELETE FROM downloads WHERE key = ?")
            .bind(DownloadRecord::key_for(book_id, episode_index))
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_book(&self, book_id: &str) -> Result<u64> {
        let pool = self.store.pool().await?;
        let result = sqlx::query("DELETE FROM downloads WHERE book_id = ?")
            .bind(book_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
