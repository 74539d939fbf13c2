//! Namespace-scoped repositories
//!
//! One repository per durable namespace. Each write touches exactly one
//! table; the store intentionally offers no cross-namespace transactions so
//! a failure in one namespace cannot roll back another's write.

pub mod api_cache;
pub mod covers;
pub mod download_tasks;
pub mod downloads;
pub mod episode_urls;
pub mod history;
pub mod history_queue;

pub use api_cache::{ApiCacheRepository, SqliteApiCacheRepository};
pub use covers::{CoverRepository, SqliteCoverRepository};
pub use download_tasks::{SqliteTaskRepository, TaskRepository};
pub use downloads::{DownloadsRepository, SqliteDownloadsRepository};
pub use episode_urls::{SqliteUrlBatchRepository, UrlBatchRepository};
pub use history::{HistoryRepository, SqliteHistoryRepository};
pub use history_queue::{QueueRepository, SqliteQueueRepository};
