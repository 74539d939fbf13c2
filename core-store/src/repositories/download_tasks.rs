//! Download task repository
//!
//! Persists the queue so progress survives a process restart mid-download.
//! The status column mirrors the in-memory state machine; monotonicity is
//! enforced by [`DownloadTask::transition`](crate::models::DownloadTask)
//! before rows are written back.

use crate::db::PersistentStore;
use crate::error::Result;
use crate::models::{DownloadTask, TaskStatus};
use async_trait::async_trait;
use std::sync::Arc;

/// Repository for the `download_tasks` namespace.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert(&self, task: &DownloadTask) -> Result<()>;

    /// Write back a task's mutable fields (status, progress, error).
    async fn update(&self, task: &DownloadTask) -> Result<()>;

    async fn find(&self, task_id: &str) -> Result<Option<DownloadTask>>;

    /// All tasks for a book (book secondary index).
    async fn find_by_book(&self, book_id: &str) -> Result<Vec<DownloadTask>>;

    /// All tasks in a given state (status secondary index), oldest first.
    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<DownloadTask>>;

    async fn delete(&self, task_id: &str) -> Result<bool>;

    /// Remove terminal tasks for a book. Returns rows removed.
    async fn delete_terminal_by_book(&self, book_id: &str) -> Result<u64>;
}

/// SQLite implementation of [`TaskRepository`].
pub struct SqliteTaskRepository {
    store: Arc<PersistentStore>,
}

impl SqliteTaskRepository {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn insert(&self, task: &DownloadTask) -> Result<()> {
        let pool = self.store.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO download_tasks
                (task_id, book_id, episode_index, status, progress,
                 bytes_downloaded, total_bytes, error, created_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.task_id)
        .bind(&task.book_id)
        .bind(task.episode_index as i64)
        .bind(task.status.as_str())
        .bind(task.progress as i64)
        .bind(task.bytes_downloaded as i64)
        .bind(task.total_bytes as i64)
        .bind(&task.error)
        .bind(task.created_at)
        .bind(task.completed_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn update(&self, task: &DownloadTask) -> Result<()> {
        let pool = self.store.pool().await?;
        sqlx::query(
            r#"
            UPDATE download_tasks SET
                status = ?,
                progress = ?,
                bytes_downloaded = ?,
                total_bytes = ?,
                error = ?,
                completed_at = ?
            WHERE task_id = ?
            "#,
        )
        .bind(task.status.as_str())
        .bind(task.progress as i64)
        .bind(task.bytes_downloaded as i64)
        .bind(task.total_bytes as i64)
        .bind(&task.error)
        .bind(task.completed_at)
        .bind(&task.task_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn find(&self, task_id: &str) -> Result<Option<DownloadTask>> {
        let pool = self.store.pool().await?;
        let row =
            sqlx::query_as::<_, DownloadTask>("SELECT * FROM download_tasks WHERE task_id = ?")
                .bind(task_id)
                .fetch_optional(pool)
                .await?;
        Ok(row)
    }

    async fn find_by_book(&self, book_id: &str) -> Result<Vec<DownloadTask>> {
        let pool = self.store.pool().await?;
        let rows = sqlx::query_as::<_, DownloadTask>(
            "SELECT * FROM download_tasks WHERE book_id = ? ORDER BY created_at ASC",
        )
        .bind(book_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<DownloadTask>> {
        let pool = self.store.pool().await?;
        let rows = sqlx::query_as::<_, DownloadTask>(
            "SELECT * FROM download_tasks WHERE status = ? ORDER BY created_at ASC, task_id ASC",
        )
        .bind(status.as_str())
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    async fn delete(&self, task_id: &str) -> Result<bool> {
        let pool = self.store.pool().await?;
        let result = sqlx::query("DELETE FROM download_tasks WHERE task_id = ?")
            .bind(task_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_terminal_by_book(&self, book_id: &str) -> Result<u64> {
        let pool = self.store.pool().await?;
        let result = sqlx::query(
            r#"
            DELETE FROM download_tasks
            WHERE book_id = ? AND status IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(book_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repo() -> SqliteTaskRepository {
        let store = Arc::new(PersistentStore::open_in_memory().await.unwrap());
        SqliteTaskRepository::new(store)
    }

    #[tokio::test]
    async fn test_insert_update_find() {
        let repo = repo().await;
        let mut task = DownloadTask::new("t1".into(), "b1".into(), 0, 100);
        repo.insert(&task).await.unwrap();

        task.transition(TaskStatus::Downloading, 101);
        task.record_progress(500, 1000);
        repo.update(&task).await.unwrap();

        let found = repo.find("t1").await.unwrap().unwrap();
        assert_eq!(found.status, TaskStatus::Downloading);
        assert_eq!(found.progress, 50);
        assert_eq!(found.bytes_downloaded, 500);
    }

    #[tokio::test]
    async fn test_find_by_status_ordered_by_creation() {
        let repo = repo().await;
        repo.insert(&DownloadTask::new("t2".into(), "b1".into(), 1, 200))
            .await
            .unwrap();
        repo.insert(&DownloadTask::new("t1".into(), "b1".into(), 0, 100))
            .await
            .unwrap();

        let pending = repo.find_by_status(TaskStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].task_id, "t1");
    }

    #[tokio::test]
    async fn test_delete_terminal_by_book_keeps_active_tasks() {
        let repo = repo().await;

        let mut done = DownloadTask::new("t1".into(), "b1".into(), 0, 100);
        done.transition(TaskStatus::Downloading, 0);
        done.transition(TaskStatus::Completed, 0);
        repo.insert(&done).await.unwrap();

        repo.insert(&DownloadTask::new("t2".into(), "b1".into(), 1, 200))
            .await
            .unwrap();

        assert_eq!(repo.delete_terminal_by_book("b1").await.unwrap(), 1);
        assert!(repo.find("t1").await.unwrap().is_none());
        assert!(repo.find("t2").await.unwrap().is_some());
    }
}
