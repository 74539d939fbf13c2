//! Cover image cache repository

use crate::db::PersistentStore;
use crate::error::Result;
use crate::models::CachedCover;
use async_trait::async_trait;
use std::sync::Arc;

/// Repository for the `cached_covers` namespace.
#[async_trait]
pub trait CoverRepository: Send + Sync {
    async fn put(&self, cover: &CachedCover) -> Result<()>;
    async fn get(&self, book_id: &str) -> Result<Option<CachedCover>>;
    async fn delete(&self, book_id: &str) -> Result<bool>;
}

/// SQLite implementation of [`CoverRepository`].
pub struct SqliteCoverRepository {
    store: Arc<PersistentStore>,
}

impl SqliteCoverRepository {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CoverRepository for SqliteCoverRepository {
    async fn put(&self, cover: &CachedCover) -> Result<()> {
        let pool = self.store.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO cached_covers (book_id, image, cached_at)
            VALUES (?, ?, ?)
            ON CONFLICT (book_id) DO UPDATE SET
                image = excluded.image,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(&cover.book_id)
        .bind(&cover.image)
        .bind(cover.cached_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn get(&self, book_id: &str) -> Result<Option<CachedCover>> {
        let pool = self.store.pool().await?;
        let row =
            sqlx::query_as::<_, CachedCover>("SELECT * FROM cached_covers WHERE book_id = ?")
                .bind(book_id)
                .fetch_optional(pool)
                .await?;
        Ok(row)
    }

    async fn delete(&self, book_id: &str) -> Result<bool> {
        let pool = self.store.pool().await?;
        let result = sqlx::query("DELETE FROM cached_covers WHERE book_id = ?")
            .bind(book_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
