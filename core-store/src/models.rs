//! Durable entity models
//!
//! One model per namespace table, plus the enums and helpers that encode the
//! store's invariants: the download-task state machine, the 100-episode URL
//! batch arithmetic, and the history sync flags.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

/// Number of contiguous episode indices covered by one signed-URL batch.
pub const URL_BATCH_SIZE: u32 = 100;

fn decode_err(column: &str, source: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

// ============================================================================
// History
// ============================================================================

/// Whether a history record has been acknowledged by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            other => Err(StoreError::InvalidData(format!(
                "unknown sync status: {}",
                other
            ))),
        }
    }
}

/// Listening position for one book. Exactly one row per book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub book_id: String,
    /// Position within the episode, in seconds. Never negative.
    pub current_time: f64,
    pub episode_index: u32,
    pub playback_rate: f64,
    /// Unix epoch milliseconds of the last update.
    pub last_played_at: i64,
    pub sync_status: SyncStatus,
}

impl<'r> FromRow<'r, SqliteRow> for HistoryRecord {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let status: String = row.try_get("sync_status")?;
        Ok(Self {
            book_id: row.try_get("book_id")?,
            current_time: row.try_get("current_time_secs")?,
            episode_index: row.try_get::<i64, _>("episode_index")? as u32,
            playback_rate: row.try_get("playback_rate")?,
            last_played_at: row.try_get("last_played_at")?,
            sync_status: SyncStatus::parse(&status)
                .map_err(|e| decode_err("sync_status", e))?,
        })
    }
}

/// One append-only row in the position log.
///
/// Rows are never mutated after insertion, except to flip `synced`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedPosition {
    pub id: i64,
    pub book_id: String,
    pub episode_index: u32,
    pub current_time: f64,
    pub playback_rate: f64,
    /// Unix epoch milliseconds when the position was observed.
    pub timestamp: i64,
    pub synced: bool,
}

impl<'r> FromRow<'r, SqliteRow> for QueuedPosition {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            book_id: row.try_get("book_id")?,
            episode_index: row.try_get::<i64, _>("episode_index")? as u32,
            current_time: row.try_get("current_time_secs")?,
            playback_rate: row.try_get("playback_rate")?,
            timestamp: row.try_get("timestamp")?,
            synced: row.try_get::<i64, _>("synced")? != 0,
        })
    }
}

// ============================================================================
// API response cache
// ============================================================================

/// A cached GET response body.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub url: String,
    /// Raw JSON payload as received.
    pub payload: String,
    /// Unix epoch milliseconds when the response was stored.
    pub timestamp: i64,
    pub etag: Option<String>,
}

impl<'r> FromRow<'r, SqliteRow> for CachedResponse {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            url: row.try_get("url")?,
            payload: row.try_get("payload")?,
            timestamp: row.try_get("timestamp")?,
            etag: row.try_get("etag")?,
        })
    }
}

// ============================================================================
// Cover cache
// ============================================================================

/// A cached cover image blob.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedCover {
    pub book_id: String,
    pub image: Vec<u8>,
    pub cached_at: i64,
}

impl<'r> FromRow<'r, SqliteRow> for CachedCover {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            book_id: row.try_get("book_id")?,
            image: row.try_get("image")?,
            cached_at: row.try_get("cached_at")?,
        })
    }
}

// ============================================================================
// Episode URL batches
// ============================================================================

/// A single signed playback URL within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeUrlEntry {
    pub index: u32,
    pub url: String,
    /// Unix epoch milliseconds after which the URL must be reissued.
    pub expires_at: i64,
}

/// A durable batch of signed URLs covering exactly [`URL_BATCH_SIZE`]
/// contiguous episode indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlBatch {
    pub book_id: String,
    pub batch_number: u32,
    pub entries: Vec<EpisodeUrlEntry>,
    pub batch_start: u32,
    pub batch_end: u32,
    /// Unix epoch milliseconds when the batch was fetched.
    pub fetched_at: i64,
}

impl UrlBatch {
    /// The batch that covers the given episode index.
    pub fn batch_number_for(episode_index: u32) -> u32 {
        episode_index / URL_BATCH_SIZE
    }

    /// First index covered by a batch.
    pub fn batch_start_for(batch_number: u32) -> u32 {
        batch_number * URL_BATCH_SIZE
    }

    /// Whether this batch covers the given index.
    pub fn covers(&self, episode_index: u32) -> bool {
        episode_index >= self.batch_start && episode_index <= self.batch_end
    }

    /// Look up the entry for an episode index.
    pub fn entry(&self, episode_index: u32) -> Option<&EpisodeUrlEntry> {
        self.entries.iter().find(|e| e.index == episode_index)
    }
}

impl<'r> FromRow<'r, SqliteRow> for UrlBatch {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let entries_json: String = row.try_get("entries")?;
        let entries: Vec<EpisodeUrlEntry> =
            serde_json::from_str(&entries_json).map_err(|e| decode_err("entries", e))?;
        Ok(Self {
            book_id: row.try_get("book_id")?,
            batch_number: row.try_get::<i64, _>("batch_number")? as u32,
            entries,
            batch_start: row.try_get::<i64, _>("batch_start")? as u32,
            batch_end: row.try_get::<i64, _>("batch_end")? as u32,
            fetched_at: row.try_get("fetched_at")?,
        })
    }
}

// ============================================================================
// Downloads
// ============================================================================

/// Metadata for one fully-downloaded episode file.
///
/// A row existing implies the file exists on durable storage; readers that
/// find the file missing purge the row (self-healing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub book_id: String,
    pub episode_index: u32,
    pub file_path: String,
    pub file_size: u64,
    pub file_name: String,
    pub downloaded_at: i64,
}

impl DownloadRecord {
    /// Primary key: `{book_id}:{episode_index}`.
    pub fn key(&self) -> String {
        Self::key_for(&self.book_id, self.episode_index)
    }

    pub fn key_for(book_id: &str, episode_index: u32) -> String {
        format!("{}:{}", book_id, episode_index)
    }
}

impl<'r> FromRow<'r, SqliteRow> for DownloadRecord {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            book_id: row.try_get("book_id")?,
            episode_index: row.try_get::<i64, _>("episode_index")? as u32,
            file_path: row.try_get("file_path")?,
            file_size: row.try_get::<i64, _>("file_size")? as u64,
            file_name: row.try_get("file_name")?,
            downloaded_at: row.try_get("downloaded_at")?,
        })
    }
}

// ============================================================================
// Download tasks
// ============================================================================

/// Download task lifecycle state.
///
/// Transitions are monotonic: `Pending → Downloading → {Completed, Failed,
/// Cancelled}`, plus direct cancellation of a still-pending task. No
/// transition leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "downloading" => Ok(TaskStatus::Downloading),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(StoreError::InvalidData(format!(
                "unknown task status: {}",
                other
            ))),
        }
    }

    /// Terminal states absorb all transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving to `next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Downloading) => true,
            (TaskStatus::Pending, TaskStatus::Cancelled) => true,
            (TaskStatus::Downloading, TaskStatus::Completed) => true,
            (TaskStatus::Downloading, TaskStatus::Failed) => true,
            (TaskStatus::Downloading, TaskStatus::Cancelled) => true,
            _ => false,
        }
    }
}

/// One entry in the persisted download queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub task_id: String,
    pub book_id: String,
    pub episode_index: u32,
    pub status: TaskStatus,
    /// Percentage 0-100.
    pub progress: u8,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub error: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl DownloadTask {
    /// Create a new pending task.
    pub fn new(task_id: String, book_id: String, episode_index: u32, created_at: i64) -> Self {
        Self {
            task_id,
            book_id,
            episode_index,
            status: TaskStatus::Pending,
            progress: 0,
            bytes_downloaded: 0,
            total_bytes: 0,
            error: None,
            created_at,
            completed_at: None,
        }
    }

    /// Attempt a state transition. Returns `false` (leaving the task
    /// untouched) when the transition would violate monotonicity.
    pub fn transition(&mut self, next: TaskStatus, at: i64) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(at);
        }
        if next == TaskStatus::Completed {
            self.progress = 100;
        }
        true
    }

    /// Crash recovery: a task found in `Downloading` after a restart lost
    /// its transfer and re-enters the queue. This is the one path that moves
    /// a task backwards; terminal states are still absorbing.
    pub fn requeue_after_restart(&mut self) -> bool {
        if self.status != TaskStatus::Downloading {
            return false;
        }
        self.status = TaskStatus::Pending;
        self.bytes_downloaded = 0;
        self.progress = 0;
        true
    }

    /// Record streamed bytes, deriving the progress percentage when the
    /// total size is known.
    pub fn record_progress(&mut self, bytes_downloaded: u64, total_bytes: u64) {
        self.bytes_downloaded = bytes_downloaded;
        self.total_bytes = total_bytes;
        self.progress = if total_bytes > 0 {
            ((bytes_downloaded.saturating_mul(100)) / total_bytes).min(100) as u8
        } else {
            0
        };
    }
}

impl<'r> FromRow<'r, SqliteRow> for DownloadTask {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            task_id: row.try_get("task_id")?,
            book_id: row.try_get("book_id")?,
            episode_index: row.try_get::<i64, _>("episode_index")? as u32,
            status: TaskStatus::parse(&status).map_err(|e| decode_err("status", e))?,
            progress: row.try_get::<i64, _>("progress")? as u8,
            bytes_downloaded: row.try_get::<i64, _>("bytes_downloaded")? as u64,
            total_bytes: row.try_get::<i64, _>("total_bytes")? as u64,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}
