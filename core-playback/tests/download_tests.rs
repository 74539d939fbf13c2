//! Integration tests for the download manager
//!
//! Run against an in-memory store, an in-memory filesystem, and a scripted
//! HTTP client that streams configurable chunked bodies.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{DownloadBody, HttpClient, HttpRequest, HttpResponse};
use bridge_traits::storage::{FileMetadata, FileSystemAccess};
use bytes::Bytes;
use core_playback::download::{DownloadManager, EpisodeSource};
use core_playback::error::Result as PlaybackResult;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use core_store::models::{DownloadRecord, DownloadTask, TaskStatus};
use core_store::repositories::{
    DownloadsRepository, SqliteDownloadsRepository, SqliteTaskRepository, TaskRepository,
};
use core_store::PersistentStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

struct MemoryFileSystem {
    files: Mutex<HashMap<PathBuf, Bytes>>,
    supported: bool,
}

impl MemoryFileSystem {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            files: Mutex::new(HashMap::new()),
            supported: true,
        })
    }

    fn unsupported() -> Arc<Self> {
        Arc::new(Self {
            files: Mutex::new(HashMap::new()),
            supported: false,
        })
    }

    async fn file_count(&self) -> usize {
        self.files.lock().await.len()
    }
}

#[async_trait]
impl FileSystemAccess for MemoryFileSystem {
    fn supports_local_files(&self) -> bool {
        self.supported
    }

    async fn get_data_directory(&self) -> BridgeResult<PathBuf> {
        Ok(PathBuf::from("/data"))
    }

    async fn exists(&self, path: &Path) -> BridgeResult<bool> {
        Ok(self.files.lock().await.contains_key(path))
    }

    async fn metadata(&self, path: &Path) -> BridgeResult<FileMetadata> {
        let files = self.files.lock().await;
        let data = files
            .get(path)
            .ok_or_else(|| BridgeError::OperationFailed("not found".to_string()))?;
        Ok(FileMetadata {
            size: data.len() as u64,
            modified_at: None,
            is_directory: false,
        })
    }

    async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> BridgeResult<Bytes> {
        let files = self.files.lock().await;
        files
            .get(path)
            .cloned()
            .ok_or_else(|| BridgeError::OperationFailed("not found".to_string()))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> BridgeResult<()> {
        self.files.lock().await.insert(path.to_path_buf(), data);
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> BridgeResult<()> {
        self.files.lock().await.remove(path);
        Ok(())
    }

    async fn delete_dir_all(&self, path: &Path) -> BridgeResult<()> {
        let mut files = self.files.lock().await;
        files.retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> BridgeResult<Vec<PathBuf>> {
        let files = self.files.lock().await;
        Ok(files
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect())
    }
}

struct StubSource;

#[async_trait]
impl EpisodeSource for StubSource {
    async fn download_url(&self, book_id: &str, episode_index: u32) -> PlaybackResult<String> {
        Ok(format!("https://cdn.test/{}/{}", book_id, episode_index))
    }
}

/// Streams `chunks` chunks of `chunk_size` bytes with `chunk_delay` between
/// them.
struct ChunkedHttp {
    chunks: usize,
    chunk_size: usize,
    chunk_delay: Duration,
}

impl ChunkedHttp {
    fn fast() -> Arc<Self> {
        Arc::new(Self {
            chunks: 4,
            chunk_size: 256,
            chunk_delay: Duration::from_millis(1),
        })
    }

    fn slow() -> Arc<Self> {
        Arc::new(Self {
            chunks: 50,
            chunk_size: 64,
            chunk_delay: Duration::from_millis(20),
        })
    }
}

#[async_trait]
impl HttpClient for ChunkedHttp {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        Err(BridgeError::NotAvailable("not used".to_string()))
    }

    async fn download(&self, _request: HttpRequest) -> BridgeResult<DownloadBody> {
        let chunk_size = self.chunk_size;
        let delay = self.chunk_delay;
        let stream = futures::stream::unfold(0usize, {
            let chunks = self.chunks;
            move |sent| async move {
                if sent >= chunks {
                    return None;
                }
                tokio::time::sleep(delay).await;
                let chunk = Bytes::from(vec![0xAB; chunk_size]);
                Some((Ok::<_, BridgeError>(chunk), sent + 1))
            }
        });
        Ok(DownloadBody {
            total_bytes: Some((self.chunks * self.chunk_size) as u64),
            stream: Box::pin(stream),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    manager: DownloadManager,
    fs: Arc<MemoryFileSystem>,
    tasks: Arc<SqliteTaskRepository>,
    downloads: Arc<SqliteDownloadsRepository>,
    event_bus: EventBus,
}

async fn harness(http: Arc<ChunkedHttp>, fs: Arc<MemoryFileSystem>) -> Harness {
    let store = Arc::new(PersistentStore::open_in_memory().await.unwrap());
    let tasks = Arc::new(SqliteTaskRepository::new(store.clone()));
    let downloads = Arc::new(SqliteDownloadsRepository::new(store));
    let event_bus = EventBus::new(500);

    let manager = DownloadManager::new(
        http,
        fs.clone(),
        Arc::new(StubSource),
        tasks.clone(),
        downloads.clone(),
        event_bus.clone(),
        2,
    );

    Harness {
        manager,
        fs,
        tasks,
        downloads,
        event_bus,
    }
}

async fn wait_for_status(
    tasks: &SqliteTaskRepository,
    task_id: &str,
    status: TaskStatus,
) -> DownloadTask {
    for _ in 0..200 {
        if let Some(task) = tasks.find(task_id).await.unwrap() {
            if task.status == status {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached {:?}", task_id, status);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_download_completes_writes_file_and_metadata() {
    let h = harness(ChunkedHttp::fast(), MemoryFileSystem::new()).await;

    let task_id = h.manager.download_episode("b1", 0).await.unwrap().unwrap();
    let task = wait_for_status(&h.tasks, &task_id, TaskStatus::Completed).await;

    assert_eq!(task.progress, 100);
    assert_eq!(task.bytes_downloaded, 1024);
    assert!(task.completed_at.is_some());

    let record = h.downloads.find("b1", 0).await.unwrap().unwrap();
    assert_eq!(record.file_size, 1024);
    assert_eq!(h.fs.file_count().await, 1);

    let uri = h.manager.get_local_file_uri("b1", 0).await.unwrap();
    assert!(uri.starts_with("file:///data/downloads/b1/"));
}

#[tokio::test]
async fn test_progress_events_stream_per_chunk() {
    let h = harness(ChunkedHttp::fast(), MemoryFileSystem::new()).await;
    let mut events = h.event_bus.subscribe();

    let task_id = h.manager.download_episode("b1", 3).await.unwrap().unwrap();
    wait_for_status(&h.tasks, &task_id, TaskStatus::Completed).await;

    let mut progress_values = Vec::new();
    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            CoreEvent::Download(DownloadEvent::Progress {
                progress,
                total_bytes,
                ..
            }) => {
                assert_eq!(total_bytes, 1024);
                progress_values.push(progress);
            }
            CoreEvent::Download(DownloadEvent::Completed { .. }) => completed = true,
            _ => {}
        }
    }

    // Four chunks of 256/1024: 25, 50, 75, 100.
    assert_eq!(progress_values, vec![25, 50, 75, 100]);
    assert!(completed);
}

#[tokio::test]
async fn test_concurrency_capped_at_two() {
    let h = harness(ChunkedHttp::slow(), MemoryFileSystem::new()).await;

    let t1 = h.manager.download_episode("b1", 0).await.unwrap().unwrap();
    let t2 = h.manager.download_episode("b1", 1).await.unwrap().unwrap();
    let t3 = h.manager.download_episode("b1", 2).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.manager.active_count().await, 2);
    assert_eq!(h.manager.queued_count().await, 1);

    // The third task is admitted as slots free up, and all three finish.
    for id in [t1, t2, t3] {
        wait_for_status(&h.tasks, &id, TaskStatus::Completed).await;
    }
}

#[tokio::test]
async fn test_enqueue_skips_already_downloaded_episodes() {
    let h = harness(ChunkedHttp::fast(), MemoryFileSystem::new()).await;

    // Pre-existing download record for episode 1.
    h.fs.write_file(Path::new("/data/downloads/b1/0001.audio"), Bytes::from_static(b"x"))
        .await
        .unwrap();
    h.downloads
        .upsert(&DownloadRecord {
            book_id: "b1".to_string(),
            episode_index: 1,
            file_path: "/data/downloads/b1/0001.audio".to_string(),
            file_size: 1,
            file_name: "0001.audio".to_string(),
            downloaded_at: 0,
        })
        .await
        .unwrap();

    let ids = h.manager.download_book("b1", 3).await.unwrap();
    assert_eq!(ids.len(), 2, "episode 1 is skipped");

    for id in ids {
        wait_for_status(&h.tasks, &id, TaskStatus::Completed).await;
    }
}

#[tokio::test]
async fn test_cancel_mid_transfer_discards_partial_bytes() {
    let h = harness(ChunkedHttp::slow(), MemoryFileSystem::new()).await;

    let task_id = h.manager.download_episode("b1", 0).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(h.manager.cancel(&task_id).await.unwrap());
    let task = wait_for_status(&h.tasks, &task_id, TaskStatus::Cancelled).await;
    assert!(task.completed_at.is_some());

    // No file, no metadata row.
    assert_eq!(h.fs.file_count().await, 0);
    assert!(h.downloads.find("b1", 0).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_queued_task_before_start() {
    let h = harness(ChunkedHttp::slow(), MemoryFileSystem::new()).await;

    let _t1 = h.manager.download_episode("b1", 0).await.unwrap().unwrap();
    let _t2 = h.manager.download_episode("b1", 1).await.unwrap().unwrap();
    let t3 = h.manager.download_episode("b1", 2).await.unwrap().unwrap();

    // Third task is still queued behind the two active transfers.
    assert!(h.manager.cancel(&t3).await.unwrap());
    let task = wait_for_status(&h.tasks, &t3, TaskStatus::Cancelled).await;
    assert_eq!(task.bytes_downloaded, 0);
}

#[tokio::test]
async fn test_cancel_of_terminal_task_is_noop() {
    let h = harness(ChunkedHttp::fast(), MemoryFileSystem::new()).await;

    let task_id = h.manager.download_episode("b1", 0).await.unwrap().unwrap();
    wait_for_status(&h.tasks, &task_id, TaskStatus::Completed).await;

    assert!(!h.manager.cancel(&task_id).await.unwrap());
    let task = h.tasks.find(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_delete_book_removes_files_and_metadata() {
    let h = harness(ChunkedHttp::fast(), MemoryFileSystem::new()).await;

    let ids = h.manager.download_book("b1", 2).await.unwrap();
    for id in ids {
        wait_for_status(&h.tasks, &id, TaskStatus::Completed).await;
    }
    assert_eq!(h.fs.file_count().await, 2);

    assert_eq!(h.manager.delete_book("b1").await.unwrap(), 2);
    assert_eq!(h.fs.file_count().await, 0);
    assert!(h.downloads.find_by_book("b1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_metadata_self_heals_on_access() {
    let h = harness(ChunkedHttp::fast(), MemoryFileSystem::new()).await;

    // Metadata row whose file never existed.
    h.downloads
        .upsert(&DownloadRecord {
            book_id: "b1".to_string(),
            episode_index: 9,
            file_path: "/data/downloads/b1/0009.audio".to_string(),
            file_size: 10,
            file_name: "0009.audio".to_string(),
            downloaded_at: 0,
        })
        .await
        .unwrap();

    assert!(h.manager.get_local_file_uri("b1", 9).await.is_none());
    // The dangling row was purged.
    assert!(h.downloads.find("b1", 9).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unsupported_platform_noops() {
    let h = harness(ChunkedHttp::fast(), MemoryFileSystem::unsupported()).await;

    assert!(!h.manager.is_supported());
    assert!(h.manager.download_episode("b1", 0).await.unwrap().is_none());
    assert!(h.manager.download_book("b1", 5).await.unwrap().is_empty());
    assert!(h.manager.get_local_file_uri("b1", 0).await.is_none());
    assert!(!h.manager.cancel("whatever").await.unwrap());
    assert_eq!(h.manager.delete_book("b1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_paused_queue_blocks_admission() {
    let h = harness(ChunkedHttp::fast(), MemoryFileSystem::new()).await;

    h.manager.set_paused(true).await;
    let task_id = h.manager.download_episode("b1", 0).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.manager.active_count().await, 0);
    assert_eq!(h.manager.queued_count().await, 1);

    h.manager.set_paused(false).await;
    wait_for_status(&h.tasks, &task_id, TaskStatus::Completed).await;
}

#[tokio::test]
async fn test_recover_requeues_interrupted_tasks() {
    let h = harness(ChunkedHttp::fast(), MemoryFileSystem::new()).await;

    // A task a dead process left mid-transfer.
    let mut interrupted = DownloadTask::new("t-old".into(), "b1".into(), 4, 100);
    interrupted.transition(TaskStatus::Downloading, 101);
    interrupted.record_progress(512, 1024);
    h.tasks.insert(&interrupted).await.unwrap();

    let recovered = h.manager.recover().await.unwrap();
    assert_eq!(recovered, 1);

    let task = wait_for_status(&h.tasks, "t-old", TaskStatus::Completed).await;
    assert_eq!(task.bytes_downloaded, 1024);
}
