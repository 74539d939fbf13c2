//! Episode URL batch repository
//!
//! The durable tier of the two-tier URL cache. Batches are written whole and
//! invalidated whole; entries are stored as a JSON array per batch row.

use crate::db::PersistentStore;
use crate::error::Result;
use crate::models::UrlBatch;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Repository for the `episode_urls` namespace.
#[async_trait]
pub trait UrlBatchRepository: Send + Sync {
    /// Insert or replace a batch.
    async fn upsert(&self, batch: &UrlBatch) -> Result<()>;

    /// Find the batch covering `(book_id, batch_number)`.
    async fn find(&self, book_id: &str, batch_number: u32) -> Result<Option<UrlBatch>>;

    /// All batches for a book (book secondary index).
    async fn find_by_book(&self, book_id: &str) -> Result<Vec<UrlBatch>>;

    /// Remove every batch for a book. Returns rows removed.
    async fn delete_by_book(&self, book_id: &str) -> Result<u64>;
}

/// SQLite implementation of [`UrlBatchRepository`].
pub struct SqliteUrlBatchRepository {
    store: Arc<PersistentStore>,
}

impl SqliteUrlBatchRepository {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UrlBatchRepository for SqliteUrlBatchRepository {
    async fn upsert(&self, batch: &UrlBatch) -> Result<()> {
        let pool = self.store.pool().await?;
        let entries = serde_json::to_string(&batch.entries)?;

        sqlx::query(
            r#"
            INSERT INTO episode_urls
                (book_id, batch_number, entries, batch_start, batch_end, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (book_id, batch_number) DO UPDATE SET
                entries = excluded.entries,
                batch_start = excluded.batch_start,
                batch_end = excluded.batch_end,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&batch.book_id)
        .bind(batch.batch_number as i64)
        .bind(entries)
        .bind(batch.batch_start as i64)
        .bind(batch.batch_end as i64)
        .bind(batch.fetched_at)
        .execute(pool)
        .await?;

        debug!(
            book_id = %batch.book_id,
            batch_number = batch.batch_number,
            entries = batch.entries.len(),
            "URL batch stored"
        );
        Ok(())
    }

    async fn find(&self, book_id: &str, batch_number: u32) -> Result<Option<UrlBatch>> {
        let pool = self.store.pool().await?;
        let row = sqlx::query_as::<_, UrlBatch>(
            "SELECT * FROM episode_urls WHERE book_id = ? AND batch_number = ?",
        )
        .bind(book_id)
        .bind(batch_number as i64)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    async fn find_by_book(&self, book_id: &str) -> Result<Vec<UrlBatch>> {
        let pool = self.store.pool().await?;
        let rows = sqlx::query_as::<_, UrlBatch>(
            "SELECT * FROM episode_urls WHERE book_id = ? ORDER BY batch_number ASC",
        )
        .bind(book_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    async fn delete_by_book(&self, book_id: &str) -> Result<u64> {
        let pool = self.store.pool().await?;
        let result = sqlx::query("DELETE FROM episode_urls WHERE book_id = ?")
            .bind(book_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EpisodeUrlEntry;

    fn batch(book_id: &str, batch_number: u32) -> UrlBatch {
        let start = batch_number * 100;
        UrlBatch {
            book_id: book_id.to_string(),
            batch_number,
            entries: (start..start + 100)
                .map(|i| EpisodeUrlEntry {
                    index: i,
                    url: format!("https://cdn.test/{}/{}", book_id, i),
                    expires_at: 10_000,
                })
                .collect(),
            batch_start: start,
            batch_end: start + 99,
            fetched_at: 100,
        }
    }

    async fn repo() -> SqliteUrlBatchRepository {
        let store = Arc::new(PersistentStore::open_in_memory().await.unwrap());
        SqliteUrlBatchRepository::new(store)
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_entries() {
        let repo = repo().await;
        repo.upsert(&batch("b1", 0)).await.unwrap();

        let found = repo.find("b1", 0).await.unwrap().unwrap();
        assert_eq!(found.entries.len(), 100);
        assert_eq!(found.batch_start, 0);
        assert_eq!(found.batch_end, 99);
        assert!(found.entry(42).is_some());
    }

    #[tokio::test]
    async fn test_delete_by_book_purges_all_batches() {
        let repo = repo().await;
        repo.upsert(&batch("b1", 0)).await.unwrap();
        repo.upsert(&batch("b1", 1)).await.unwrap();
        repo.upsert(&batch("b2", 0)).await.unwrap();

        assert_eq!(repo.delete_by_book("b1").await.unwrap(), 2);
        assert!(repo.find("b1", 0).await.unwrap().is_none());
        assert!(repo.find("b2", 0).await.unwrap().is_some());
    }
}
