//! # Download Manager
//!
//! Concurrency-limited, cancellable episode download queue with durable
//! task state.
//!
//! ## Lifecycle
//!
//! Per task: `Pending → Downloading → {Completed | Failed | Cancelled}`;
//! terminal states are absorbing (see
//! [`TaskStatus`](core_store::models::TaskStatus)). Tasks persist on
//! enqueue, so a process restart mid-download finds them and re-queues them
//! through [`recover`](DownloadManager::recover).
//!
//! ## Execution
//!
//! At most `max_concurrent` transfers run at once; any completion admits the
//! next queued task. Bodies are streamed chunk-by-chunk, emitting a
//! [`DownloadEvent::Progress`] per chunk; the accumulated bytes become one
//! durable file plus a `downloads` metadata row on completion. Cancellation
//! aborts the transfer through a per-task token; partial bytes are
//! discarded.
//!
//! Platforms without local-file support make every operation a no-op
//! returning empty/false.

use crate::error::{PlaybackError, Result};
use bridge_traits::http::{HttpClient, HttpRequest};
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use core_store::models::{DownloadRecord, DownloadTask, TaskStatus};
use core_store::repositories::{DownloadsRepository, TaskRepository};
use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Seam resolving an episode to a downloadable URL (signed URL first,
/// streaming fallback second). Implemented over the URL cache by the
/// service layer.
#[async_trait::async_trait]
pub trait EpisodeSource: Send + Sync {
    async fn download_url(&self, book_id: &str, episode_index: u32) -> Result<String>;
}

struct DownloadInner {
    http: Arc<dyn HttpClient>,
    fs: Arc<dyn FileSystemAccess>,
    source: Arc<dyn EpisodeSource>,
    tasks: Arc<dyn TaskRepository>,
    downloads: Arc<dyn DownloadsRepository>,
    event_bus: EventBus,
    max_concurrent: usize,
    supported: bool,
    queue: Mutex<VecDeque<String>>,
    active: Mutex<HashMap<String, CancellationToken>>,
    paused: AtomicBool,
}

/// Concurrent, cancellable download queue.
///
/// Cloning is cheap; all clones share the queue and the active set.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<DownloadInner>,
}

impl DownloadManager {
    pub fn new(
        http: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        source: Arc<dyn EpisodeSource>,
        tasks: Arc<dyn TaskRepository>,
        downloads: Arc<dyn DownloadsRepository>,
        event_bus: EventBus,
        max_concurrent: usize,
    ) -> Self {
        let supported = fs.supports_local_files();
        Self {
            inner: Arc::new(DownloadInner {
                http,
                fs,
                source,
                tasks,
                downloads,
                event_bus,
                max_concurrent,
                supported,
                queue: Mutex::new(VecDeque::new()),
                active: Mutex::new(HashMap::new()),
                paused: AtomicBool::new(false),
            }),
        }
    }

    /// Whether this platform supports local downloads at all.
    pub fn is_supported(&self) -> bool {
        self.inner.supported
    }

    /// Enqueue one episode. Returns the task id, or `None` when the episode
    /// is already downloaded, already queued, or downloads are unsupported.
    #[instrument(skip(self))]
    pub async fn download_episode(
        &self,
        book_id: &str,
        episode_index: u32,
    ) -> Result<Option<String>> {
        if !self.inner.supported {
            return Ok(None);
        }

        if self.storage_find(book_id, episode_index).await?.is_some() {
            debug!(book_id, episode_index, "Episode already downloaded; skipping");
            return Ok(None);
        }

        // Skip episodes with a live (non-terminal) task.
        let existing = self
            .inner
            .tasks
            .find_by_book(book_id)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        if existing
            .iter()
            .any(|t| t.episode_index == episode_index && !t.status.is_terminal())
        {
            debug!(book_id, episode_index, "Episode already queued; skipping");
            return Ok(None);
        }

        let task = DownloadTask::new(
            uuid::Uuid::new_v4().to_string(),
            book_id.to_string(),
            episode_index,
            chrono::Utc::now().timestamp_millis(),
        );

        // Persisted before admission so a restart mid-download resumes it.
        self.inner
            .tasks
            .insert(&task)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;

        self.inner.queue.lock().await.push_back(task.task_id.clone());
        let _ = self
            .inner
            .event_bus
            .emit(CoreEvent::Download(DownloadEvent::Queued {
                task_id: task.task_id.clone(),
                book_id: book_id.to_string(),
                episode_index,
            }));

        DownloadInner::pump(&self.inner).await;
        Ok(Some(task.task_id))
    }

    /// Enqueue a contiguous range of episodes (inclusive), skipping ones
    /// already present.
    pub async fn download_episode_range(
        &self,
        book_id: &str,
        start: u32,
        end: u32,
    ) -> Result<Vec<String>> {
        let mut task_ids = Vec::new();
        for index in start..=end {
            if let Some(id) = self.download_episode(book_id, index).await? {
                task_ids.push(id);
            }
        }
        Ok(task_ids)
    }

    /// Enqueue a whole book.
    pub async fn download_book(&self, book_id: &str, episode_count: u32) -> Result<Vec<String>> {
        if episode_count == 0 {
            return Ok(Vec::new());
        }
        self.download_episode_range(book_id, 0, episode_count - 1)
            .await
    }

    /// Cancel a task. Running transfers abort mid-stream; queued tasks are
    /// removed before starting. Cancelling a terminal task is a no-op.
    #[instrument(skip(self))]
    pub async fn cancel(&self, task_id: &str) -> Result<bool> {
        if !self.inner.supported {
            return Ok(false);
        }

        // Running: signal the transfer; the worker finalizes the state.
        if let Some(token) = self.inner.active.lock().await.get(task_id) {
            token.cancel();
            return Ok(true);
        }

        // Queued: remove from the pending queue and finalize here.
        let removed = {
            let mut queue = self.inner.queue.lock().await;
            let before = queue.len();
            queue.retain(|id| id != task_id);
            queue.len() != before
        };
        if removed {
            if let Some(mut task) = self
                .inner
                .tasks
                .find(task_id)
                .await
                .map_err(|e| PlaybackError::Storage(e.to_string()))?
            {
                let now = chrono::Utc::now().timestamp_millis();
                if task.transition(TaskStatus::Cancelled, now) {
                    self.inner
                        .tasks
                        .update(&task)
                        .await
                        .map_err(|e| PlaybackError::Storage(e.to_string()))?;
                    let _ = self
                        .inner
                        .event_bus
                        .emit(CoreEvent::Download(DownloadEvent::Cancelled {
                            task_id: task_id.to_string(),
                        }));
                }
            }
            return Ok(true);
        }

        Ok(false)
    }

    /// Pause or resume admission. A paused queue finishes in-flight
    /// transfers but admits nothing new.
    pub async fn set_paused(&self, paused: bool) {
        self.inner.paused.store(paused, Ordering::SeqCst);
        info!(paused, "Download queue admission toggled");
        if !paused {
            DownloadInner::pump(&self.inner).await;
        }
    }

    /// Delete one downloaded episode: file and metadata.
    #[instrument(skip(self))]
    pub async fn delete_episode(&self, book_id: &str, episode_index: u32) -> Result<bool> {
        if !self.inner.supported {
            return Ok(false);
        }

        let Some(record) = self.storage_find(book_id, episode_index).await? else {
            return Ok(false);
        };

        let path = PathBuf::from(&record.file_path);
        if let Err(e) = self.inner.fs.delete_file(&path).await {
            // The metadata row must not outlive the file either way.
            warn!(path = %path.display(), error = %e, "Download file delete failed");
        }

        self.inner
            .downloads
            .delete(book_id, episode_index)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;

        let _ = self
            .inner
            .event_bus
            .emit(CoreEvent::Download(DownloadEvent::Deleted {
                book_id: book_id.to_string(),
                episode_index,
            }));
        Ok(true)
    }

    /// Delete every downloaded episode of a book via the by-book index.
    pub async fn delete_book(&self, book_id: &str) -> Result<u32> {
        if !self.inner.supported {
            return Ok(0);
        }

        let records = self
            .inner
            .downloads
            .find_by_book(book_id)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;

        let mut deleted = 0;
        for record in records {
            if self.delete_episode(book_id, record.episode_index).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Resolve a local file URI for playback.
    ///
    /// When the metadata row points at a file that no longer exists (moved
    /// or deleted externally), the stale row is purged and `None` is
    /// returned so the caller falls back to streaming.
    #[instrument(skip(self))]
    pub async fn get_local_file_uri(&self, book_id: &str, episode_index: u32) -> Option<String> {
        if !self.inner.supported {
            return None;
        }

        let record = self.storage_find(book_id, episode_index).await.ok()??;
        let path = PathBuf::from(&record.file_path);

        match self.inner.fs.exists(&path).await {
            Ok(true) => Some(format!("file://{}", record.file_path)),
            _ => {
                warn!(
                    book_id,
                    episode_index, "Downloaded file missing; purging stale metadata"
                );
                let _ = self.inner.downloads.delete(book_id, episode_index).await;
                None
            }
        }
    }

    /// All download tasks for a book (for queue UIs).
    pub async fn tasks_for_book(&self, book_id: &str) -> Result<Vec<DownloadTask>> {
        self.inner
            .tasks
            .find_by_book(book_id)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))
    }

    /// Re-queue tasks that a previous process left unfinished. Returns the
    /// number of tasks re-admitted.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        if !self.inner.supported {
            return Ok(0);
        }

        let mut recovered = 0;

        let interrupted = self
            .inner
            .tasks
            .find_by_status(TaskStatus::Downloading)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        for mut task in interrupted {
            if task.requeue_after_restart() {
                self.inner
                    .tasks
                    .update(&task)
                    .await
                    .map_err(|e| PlaybackError::Storage(e.to_string()))?;
                self.inner.queue.lock().await.push_back(task.task_id);
                recovered += 1;
            }
        }

        let pending = self
            .inner
            .tasks
            .find_by_status(TaskStatus::Pending)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        {
            let mut queue = self.inner.queue.lock().await;
            for task in pending {
                if !queue.contains(&task.task_id) {
                    queue.push_back(task.task_id);
                    recovered += 1;
                }
            }
        }

        if recovered > 0 {
            info!(recovered, "Recovered interrupted download tasks");
            DownloadInner::pump(&self.inner).await;
        }
        Ok(recovered)
    }

    /// Number of transfers currently running (used by tests).
    pub async fn active_count(&self) -> usize {
        self.inner.active.lock().await.len()
    }

    /// Number of tasks waiting for admission (used by tests).
    pub async fn queued_count(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    async fn storage_find(
        &self,
        book_id: &str,
        episode_index: u32,
    ) -> Result<Option<DownloadRecord>> {
        self.inner
            .downloads
            .find(book_id, episode_index)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))
    }
}

#[async_trait::async_trait]
impl crate::transition::LocalSource for DownloadManager {
    async fn local_uri(&self, book_id: &str, episode_index: u32) -> Option<String> {
        self.get_local_file_uri(book_id, episode_index).await
    }
}

impl DownloadInner {
    /// Admit queued tasks while capacity allows. Paused queues admit
    /// nothing; in-flight transfers are unaffected.
    ///
    /// Boxed because every finished transfer pumps again from its own task.
    fn pump(inner: &Arc<DownloadInner>) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(inner);
        async move {
            if inner.paused.load(Ordering::SeqCst) {
                return;
            }

            loop {
                // The slot is reserved while holding the active lock, so two
                // interleaved pumps cannot over-admit.
                let (task_id, token) = {
                    let mut active = inner.active.lock().await;
                    if active.len() >= inner.max_concurrent {
                        return;
                    }
                    let mut queue = inner.queue.lock().await;
                    let Some(task_id) = queue.pop_front() else {
                        return;
                    };
                    let token = CancellationToken::new();
                    active.insert(task_id.clone(), token.clone());
                    (task_id, token)
                };

                let inner_clone = Arc::clone(&inner);
                tokio::spawn(async move {
                    DownloadInner::run_task(&inner_clone, &task_id, token).await;
                    inner_clone.active.lock().await.remove(&task_id);
                    // A finished slot immediately admits the next queued task.
                    DownloadInner::pump(&inner_clone).await;
                });
            }
        }
        .boxed()
    }

    async fn run_task(inner: &Arc<DownloadInner>, task_id: &str, token: CancellationToken) {
        let mut task = match inner.tasks.find(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!(task_id, "Queued task vanished from the store");
                return;
            }
            Err(e) => {
                warn!(task_id, error = %e, "Task load failed");
                return;
            }
        };

        let now = chrono::Utc::now().timestamp_millis();
        if !task.transition(TaskStatus::Downloading, now) {
            // Cancelled while queued, or otherwise terminal.
            debug!(task_id, status = ?task.status, "Task not admissible");
            return;
        }
        if let Err(e) = inner.tasks.update(&task).await {
            warn!(task_id, error = %e, "Task state write failed");
        }
        let _ = inner
            .event_bus
            .emit(CoreEvent::Download(DownloadEvent::Started {
                task_id: task_id.to_string(),
            }));

        match Self::transfer(inner, &mut task, &token).await {
            Ok(bytes) => Self::finalize_success(inner, &mut task, bytes).await,
            Err(PlaybackError::Cancelled) => {
                let now = chrono::Utc::now().timestamp_millis();
                // Partial bytes were dropped with the transfer buffer.
                if task.transition(TaskStatus::Cancelled, now) {
                    let _ = inner.tasks.update(&task).await;
                }
                info!(task_id = %task.task_id, "Download cancelled");
                let _ = inner
                    .event_bus
                    .emit(CoreEvent::Download(DownloadEvent::Cancelled {
                        task_id: task.task_id.clone(),
                    }));
            }
            Err(e) => {
                let now = chrono::Utc::now().timestamp_millis();
                task.error = Some(e.to_string());
                if task.transition(TaskStatus::Failed, now) {
                    let _ = inner.tasks.update(&task).await;
                }
                warn!(task_id = %task.task_id, error = %e, "Download failed");
                let _ = inner
                    .event_bus
                    .emit(CoreEvent::Download(DownloadEvent::Failed {
                        task_id: task.task_id.clone(),
                        message: e.to_string(),
                    }));
            }
        }
    }

    /// Stream the body, accumulating bytes and emitting progress per chunk.
    async fn transfer(
        inner: &Arc<DownloadInner>,
        task: &mut DownloadTask,
        token: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let url = inner
            .source
            .download_url(&task.book_id, task.episode_index)
            .await?;

        let body = inner
            .http
            .download(HttpRequest::get(url))
            .await
            .map_err(|e| PlaybackError::Download(e.to_string()))?;

        let total_bytes = body.total_bytes.unwrap_or(0);
        let mut stream = body.stream;
        let mut buffer: Vec<u8> = Vec::with_capacity(total_bytes as usize);
        let mut last_persisted_progress = 0u8;

        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => return Err(PlaybackError::Cancelled),
                chunk = stream.next() => chunk,
            };

            let chunk = match chunk {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(PlaybackError::Download(e.to_string())),
                None => break,
            };

            buffer.extend_from_slice(&chunk);
            task.record_progress(buffer.len() as u64, total_bytes);

            let _ = inner
                .event_bus
                .emit(CoreEvent::Download(DownloadEvent::Progress {
                    task_id: task.task_id.clone(),
                    progress: task.progress,
                    bytes_downloaded: task.bytes_downloaded,
                    total_bytes: task.total_bytes,
                }));

            // Write back on whole-percent changes to bound write
            // amplification; the chunk cadence can be very fine.
            if task.progress != last_persisted_progress {
                last_persisted_progress = task.progress;
                if let Err(e) = inner.tasks.update(task).await {
                    warn!(task_id = %task.task_id, error = %e, "Progress write failed");
                }
            }
        }

        Ok(buffer)
    }

    async fn finalize_success(inner: &Arc<DownloadInner>, task: &mut DownloadTask, bytes: Vec<u8>) {
        let file_name = format!("{:04}.audio", task.episode_index);
        let path = match inner.fs.get_data_directory().await {
            Ok(dir) => dir.join("downloads").join(&task.book_id).join(&file_name),
            Err(e) => {
                return Self::fail_finalize(inner, task, e.to_string()).await;
            }
        };

        let file_size = bytes.len() as u64;
        if let Err(e) = inner.fs.write_file(&path, Bytes::from(bytes)).await {
            return Self::fail_finalize(inner, task, e.to_string()).await;
        }

        let record = DownloadRecord {
            book_id: task.book_id.clone(),
            episode_index: task.episode_index,
            file_path: path.to_string_lossy().into_owned(),
            file_size,
            file_name,
            downloaded_at: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(e) = inner.downloads.upsert(&record).await {
            return Self::fail_finalize(inner, task, e.to_string()).await;
        }

        let now = chrono::Utc::now().timestamp_millis();
        task.record_progress(file_size, file_size);
        if task.transition(TaskStatus::Completed, now) {
            let _ = inner.tasks.update(task).await;
        }

        info!(task_id = %task.task_id, bytes = file_size, "Download completed");
        let _ = inner
            .event_bus
            .emit(CoreEvent::Download(DownloadEvent::Completed {
                task_id: task.task_id.clone(),
            }));
    }

    async fn fail_finalize(inner: &Arc<DownloadInner>, task: &mut DownloadTask, message: String) {
        let now = chrono::Utc::now().timestamp_millis();
        task.error = Some(message.clone());
        if task.transition(TaskStatus::Failed, now) {
            let _ = inner.tasks.update(task).await;
        }
        warn!(task_id = %task.task_id, error = %message, "Download finalization failed");
        let _ = inner
            .event_bus
            .emit(CoreEvent::Download(DownloadEvent::Failed {
                task_id: task.task_id.clone(),
                message,
            }));
    }
}
