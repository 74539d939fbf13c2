//! API response cache repository

use crate::db::PersistentStore;
use crate::error::Result;
use crate::models::CachedResponse;
use async_trait::async_trait;
use std::sync::Arc;

/// Repository for the `api_cache` namespace.
#[async_trait]
pub trait ApiCacheRepository: Send + Sync {
    /// Insert or replace the cached payload for a URL.
    async fn put(&self, response: &CachedResponse) -> Result<()>;

    /// Look up the cached payload for a URL.
    async fn get(&self, url: &str) -> Result<Option<CachedResponse>>;

    /// Remove one entry.
    async fn delete(&self, url: &str) -> Result<bool>;

    /// Remove entries stored before the cutoff. Returns rows removed.
    async fn purge_older_than(&self, cutoff: i64) -> Result<u64>;
}

/// SQLite implementation of [`ApiCacheRepository`].
pub struct SqliteApiCacheRepository {
    store: Arc<PersistentStore>,
}

impl SqliteApiCacheRepository {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ApiCacheRepository for SqliteApiCacheRepository {
    async fn put(&self, response: &CachedResponse) -> Result<()> {
        let pool = self.store.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO api_cache (url, payload, timestamp, etag)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (url) DO UPDATE SET
                payload = excluded.payload,
                timestamp = excluded.timestamp,
                etag = excluded.etag
            "#,
        )
        .bind(&response.url)
        .bind(&response.payload)
        .bind(response.timestamp)
        .bind(&response.etag)
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn get(&self, url: &str) -> Result<Option<CachedResponse>> {
        let pool = self.store.pool().await?;
        let row = sqlx::query_as::<_, CachedResponse>("SELECT * FROM api_cache WHERE url = ?")
            .bind(url)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        let pool = self.store.pool().await?;
        let result = sqlx::query("DELETE FROM api_cache WHERE url = ?")
            .bind(url)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_older_than(&self, cutoff: i64) -> Result<u64> {
        let pool = self.store.pool().await?;
        let result = sqlx::query("DELETE FROM api_cache WHERE timestamp < ?")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
