//! Integration tests for the history sync engine
//!
//! The server side is a mockall transport; the store is in-memory SQLite;
//! connectivity comes from a network monitor over scripted bridge mocks.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{DownloadBody, HttpClient, HttpRequest, HttpResponse};
use bridge_traits::network::{ConnectionMode, ConnectivitySignal, LinkChangeStream, LinkState};
use bytes::Bytes;
use core_api::types::HistoryPayload;
use core_net::monitor::NetworkMonitor;
use core_runtime::events::EventBus;
use core_store::models::{HistoryRecord, SyncStatus};
use core_store::repositories::{
    HistoryRepository, QueueRepository, SqliteHistoryRepository, SqliteQueueRepository,
};
use core_store::PersistentStore;
use core_sync::engine::HistorySyncEngine;
use core_sync::error::Result as SyncResult;
use core_sync::transport::HistoryTransport;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

mockall::mock! {
    pub Transport {}

    #[async_trait]
    impl HistoryTransport for Transport {
        async fn send(&self, record: &HistoryPayload) -> SyncResult<HistoryPayload>;
        async fn fetch(&self, book_id: &str) -> SyncResult<Option<HistoryPayload>>;
        fn send_and_forget(&self, record: HistoryPayload);
    }
}

// ---------------------------------------------------------------------------
// Connectivity scripting
// ---------------------------------------------------------------------------

struct ScriptedHttp {
    healthy: bool,
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        if self.healthy {
            Ok(HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: Bytes::new(),
            })
        } else {
            Err(BridgeError::Timeout("probe".to_string()))
        }
    }

    async fn download(&self, _request: HttpRequest) -> BridgeResult<DownloadBody> {
        Err(BridgeError::NotAvailable("not used".to_string()))
    }
}

struct ScriptedSignal {
    connected: bool,
}

#[async_trait]
impl ConnectivitySignal for ScriptedSignal {
    async fn current(&self) -> BridgeResult<LinkState> {
        Ok(LinkState {
            connected: self.connected,
            mode: ConnectionMode::Wifi,
        })
    }

    async fn subscribe_changes(&self) -> BridgeResult<Box<dyn LinkChangeStream>> {
        Ok(Box::new(SilentStream))
    }
}

struct SilentStream;

#[async_trait]
impl LinkChangeStream for SilentStream {
    async fn next(&mut self) -> Option<LinkState> {
        // Never emits; probe ticks drive state in these tests.
        std::future::pending().await
    }
}

/// A monitor that reports offline (initial state, probes never run).
fn offline_monitor() -> NetworkMonitor {
    NetworkMonitor::new(
        Arc::new(ScriptedHttp { healthy: false }),
        Arc::new(ScriptedSignal { connected: false }),
        EventBus::new(100),
        "https://api.test/healthcheck",
        Duration::from_secs(3600),
        Duration::from_millis(100),
    )
}

/// A monitor already probed into the online state.
async fn online_monitor() -> NetworkMonitor {
    let monitor = NetworkMonitor::new(
        Arc::new(ScriptedHttp { healthy: true }),
        Arc::new(ScriptedSignal { connected: true }),
        EventBus::new(100),
        "https://api.test/healthcheck",
        Duration::from_secs(3600),
        Duration::from_millis(100),
    );
    assert!(monitor.check_now().await);
    monitor
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    engine: HistorySyncEngine,
    history: Arc<SqliteHistoryRepository>,
    queue: Arc<SqliteQueueRepository>,
}

async fn harness(transport: MockTransport, monitor: NetworkMonitor) -> Harness {
    let store = Arc::new(PersistentStore::open_in_memory().await.unwrap());
    let history = Arc::new(SqliteHistoryRepository::new(store.clone()));
    let queue = Arc::new(SqliteQueueRepository::new(store));

    let engine = HistorySyncEngine::new(
        history.clone(),
        queue.clone(),
        Arc::new(transport),
        monitor,
        EventBus::new(100),
        Duration::from_secs(5),
    );

    Harness {
        engine,
        history,
        queue,
    }
}

fn payload(book_id: &str, current_time: f64, last_played_at: i64) -> HistoryPayload {
    HistoryPayload {
        book_id: book_id.to_string(),
        current_time,
        episode_index: 0,
        playback_rate: 1.0,
        last_played_at,
    }
}

fn local_record(book_id: &str, last_played_at: i64) -> HistoryRecord {
    HistoryRecord {
        book_id: book_id.to_string(),
        current_time: 100.0,
        episode_index: 2,
        playback_rate: 1.0,
        last_played_at,
        sync_status: SyncStatus::Pending,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sync_coalesces_to_latest_entry_per_book() {
    let mut transport = MockTransport::new();
    // Exactly one transmission, carrying the latest position.
    transport
        .expect_send()
        .times(1)
        .withf(|record: &HistoryPayload| record.current_time == 30.0)
        .returning(|record| Ok(record.clone()));

    let h = harness(transport, offline_monitor()).await;

    for current_time in [10.0, 20.0, 30.0] {
        h.engine.record_position("b1", 0, current_time, 1.0).await;
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    assert_eq!(h.queue.pending().await.unwrap().len(), 3);

    let report = h.engine.sync_pending_queue().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.coalesced, 2);
    assert_eq!(report.failed, 0);

    // Every entry (transmitted and superseded) is now flagged synced.
    assert!(h.queue.pending().await.unwrap().is_empty());

    // The authoritative response overwrote the local record as synced.
    let record = h.history.find_by_book("b1").await.unwrap().unwrap();
    assert_eq!(record.current_time, 30.0);
    assert_eq!(record.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_failed_transmission_leaves_entries_pending() {
    let mut transport = MockTransport::new();
    transport
        .expect_send()
        .returning(|_| Err(core_sync::error::SyncError::Transport("502".to_string())));

    let h = harness(transport, offline_monitor()).await;
    h.engine.record_position("b1", 0, 10.0, 1.0).await;

    let report = h.engine.sync_pending_queue().await.unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(report.failed, 1);

    // Still pending for the next pass.
    assert_eq!(h.queue.pending().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_resync_of_identical_payload_converges() {
    let mut transport = MockTransport::new();
    // The server echoes whatever it receives; sending the same payload
    // twice must produce the same authoritative record both times.
    transport
        .expect_send()
        .times(2)
        .returning(|record| Ok(record.clone()));

    let h = harness(transport, offline_monitor()).await;

    h.engine.record_position("b1", 3, 42.0, 1.0).await;
    h.engine.sync_pending_queue().await.unwrap();
    let first = h.history.find_by_book("b1").await.unwrap().unwrap();

    // Same position recorded and synced again.
    h.engine.record_position("b1", 3, 42.0, 1.0).await;
    h.engine.sync_pending_queue().await.unwrap();
    let second = h.history.find_by_book("b1").await.unwrap().unwrap();

    assert_eq!(first.current_time, second.current_time);
    assert_eq!(first.episode_index, second.episode_index);
    assert_eq!(second.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_conflict_server_newer_wins_and_overwrites_local() {
    let t = 1_000_000;
    let mut transport = MockTransport::new();
    transport
        .expect_fetch()
        .times(1)
        .returning(move |_| Ok(Some(payload("b1", 500.0, t + 60_000))));

    let h = harness(transport, online_monitor().await).await;
    h.history.upsert(&local_record("b1", t)).await.unwrap();

    let best = h.engine.get_best_history("b1").await.unwrap().unwrap();
    assert_eq!(best.last_played_at, t + 60_000);
    assert_eq!(best.current_time, 500.0);

    // The loser was overwritten locally with the winner.
    let stored = h.history.find_by_book("b1").await.unwrap().unwrap();
    assert_eq!(stored.last_played_at, t + 60_000);
    assert_eq!(stored.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_conflict_local_newer_wins_and_storage_is_unchanged() {
    let t = 1_000_000;
    let mut transport = MockTransport::new();
    transport
        .expect_fetch()
        .times(1)
        .returning(move |_| Ok(Some(payload("b1", 500.0, t - 60_000))));

    let h = harness(transport, online_monitor().await).await;
    h.history.upsert(&local_record("b1", t)).await.unwrap();

    let best = h.engine.get_best_history("b1").await.unwrap().unwrap();
    assert_eq!(best.last_played_at, t);
    assert_eq!(best.current_time, 100.0);

    let stored = h.history.find_by_book("b1").await.unwrap().unwrap();
    assert_eq!(stored.last_played_at, t);
    assert_eq!(stored.sync_status, SyncStatus::Pending, "untouched");
}

#[tokio::test]
async fn test_offline_local_wins_without_fetching() {
    let mut transport = MockTransport::new();
    transport.expect_fetch().times(0);

    let h = harness(transport, offline_monitor()).await;
    h.history.upsert(&local_record("b1", 777)).await.unwrap();

    let best = h.engine.get_best_history("b1").await.unwrap().unwrap();
    assert_eq!(best.last_played_at, 777);
}

#[tokio::test]
async fn test_server_record_adopted_when_no_local_history() {
    let mut transport = MockTransport::new();
    transport
        .expect_fetch()
        .returning(|_| Ok(Some(payload("b1", 12.0, 999))));

    let h = harness(transport, online_monitor().await).await;

    let best = h.engine.get_best_history("b1").await.unwrap().unwrap();
    assert_eq!(best.last_played_at, 999);

    let stored = h.history.find_by_book("b1").await.unwrap().unwrap();
    assert_eq!(stored.current_time, 12.0);
}

#[tokio::test]
async fn test_throttle_suppresses_primary_write_but_not_queue() {
    let transport = MockTransport::new();
    let h = harness(transport, offline_monitor()).await;

    h.engine.record_position("b1", 0, 10.0, 1.0).await;
    h.engine.record_position("b1", 0, 11.0, 1.0).await;

    // Two queue rows, one primary write (the first).
    assert_eq!(h.queue.pending().await.unwrap().len(), 2);
    let record = h.history.find_by_book("b1").await.unwrap().unwrap();
    assert_eq!(record.current_time, 10.0);
}

#[tokio::test]
async fn test_throttle_is_per_book() {
    let transport = MockTransport::new();
    let h = harness(transport, offline_monitor()).await;

    h.engine.record_position("b1", 0, 10.0, 1.0).await;
    h.engine.record_position("b2", 0, 20.0, 1.0).await;

    assert!(h.history.find_by_book("b1").await.unwrap().is_some());
    assert!(h.history.find_by_book("b2").await.unwrap().is_some());
}

#[tokio::test]
async fn test_flush_on_unload_writes_locally_then_fires_transport() {
    let mut transport = MockTransport::new();
    transport
        .expect_send_and_forget()
        .times(1)
        .withf(|record: &HistoryPayload| record.current_time == 123.0)
        .returning(|_| ());

    let h = harness(transport, offline_monitor()).await;
    h.engine.flush_on_unload("b1", 4, 123.0, 1.5).await;

    // Local durability precedes (and survives) any transport outcome.
    let record = h.history.find_by_book("b1").await.unwrap().unwrap();
    assert_eq!(record.current_time, 123.0);
    assert_eq!(record.episode_index, 4);
    assert_eq!(h.queue.pending().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_online_transition_flushes_queue() {
    let mut transport = MockTransport::new();
    transport
        .expect_send()
        .times(1..)
        .returning(|record| Ok(record.clone()));

    // Monitor starts offline; flipping it online must wake the engine.
    let monitor = NetworkMonitor::new(
        Arc::new(ScriptedHttp { healthy: true }),
        Arc::new(ScriptedSignal { connected: true }),
        EventBus::new(100),
        "https://api.test/healthcheck",
        Duration::from_secs(3600),
        Duration::from_millis(100),
    );

    let h = harness(transport, monitor.clone()).await;
    h.engine.record_position("b1", 0, 10.0, 1.0).await;
    h.engine.start();

    monitor.check_now().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(h.queue.pending().await.unwrap().is_empty());
    h.engine.dispose();
}
