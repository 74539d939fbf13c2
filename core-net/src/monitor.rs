//! # Network Monitor
//!
//! Tracks effective online/offline state and connection mode. Detection
//! combines two sources:
//!
//! 1. The platform's [`ConnectivitySignal`] (native online/offline flag and
//!    link-type change stream), which is authoritative between probes.
//! 2. A periodic health probe against the backend's liveness endpoint, which
//!    catches the "link up, backend unreachable" case.
//!
//! A probe failure degrades to the platform's own flag rather than declaring
//! total failure. There are no retries inside a probe: a single timeout is
//! authoritative for that tick.
//!
//! Subscribers observe **changes only**; dropping the receiver unsubscribes.

use bridge_traits::http::{HttpClient, HttpRequest};
use bridge_traits::network::{ConnectionMode, ConnectivitySignal, LinkState};
use core_runtime::events::{CoreEvent, EventBus, NetworkEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Effective connectivity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Online,
    Offline,
}

/// A snapshot of effective connectivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSnapshot {
    pub status: NetworkStatus,
    pub mode: ConnectionMode,
    /// Unix epoch milliseconds of the most recent moment the monitor
    /// considered itself online.
    pub last_online_at: Option<i64>,
}

impl NetworkSnapshot {
    pub fn is_online(&self) -> bool {
        self.status == NetworkStatus::Online
    }

    fn initial() -> Self {
        Self {
            status: NetworkStatus::Offline,
            mode: ConnectionMode::Unknown,
            last_online_at: None,
        }
    }
}

struct MonitorInner {
    http: Arc<dyn HttpClient>,
    signal: Arc<dyn ConnectivitySignal>,
    event_bus: EventBus,
    probe_url: String,
    probe_interval: Duration,
    probe_timeout: Duration,
    state_tx: watch::Sender<NetworkSnapshot>,
    shutdown: CancellationToken,
}

/// Network monitor with notify-on-change subscriptions.
///
/// Cloning is cheap; all clones share one state and one set of background
/// loops.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl NetworkMonitor {
    /// Create a monitor. Background loops start with [`start`](Self::start).
    pub fn new(
        http: Arc<dyn HttpClient>,
        signal: Arc<dyn ConnectivitySignal>,
        event_bus: EventBus,
        probe_url: impl Into<String>,
        probe_interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(NetworkSnapshot::initial());
        Self {
            inner: Arc::new(MonitorInner {
                http,
                signal,
                event_bus,
                probe_url: probe_url.into(),
                probe_interval,
                probe_timeout,
                state_tx,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Current effective snapshot.
    pub fn current(&self) -> NetworkSnapshot {
        self.inner.state_tx.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Subscribe to connectivity changes.
    ///
    /// The receiver wakes only when status or mode actually change; dropping
    /// it unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<NetworkSnapshot> {
        self.inner.state_tx.subscribe()
    }

    /// Start the probe loop and the platform-signal loop.
    pub fn start(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(inner.probe_interval);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = ticks.tick() => {
                        MonitorInner::probe_tick(&inner).await;
                    }
                }
            }
            debug!("Probe loop stopped");
        });

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut stream = match inner.signal.subscribe_changes().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "Platform connectivity signal unavailable");
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    next = stream.next() => match next {
                        Some(link) => {
                            debug!(connected = link.connected, "Platform link change");
                            MonitorInner::apply(&inner, link.connected, link.mode);
                        }
                        None => break,
                    }
                }
            }
            debug!("Signal loop stopped");
        });

        info!("Network monitor started");
    }

    /// Stop the background loops.
    pub fn dispose(&self) {
        self.inner.shutdown.cancel();
    }

    /// Force an immediate probe and return the effective online flag.
    #[instrument(skip(self))]
    pub async fn check_now(&self) -> bool {
        MonitorInner::probe_tick(&self.inner).await
    }
}

impl MonitorInner {
    /// One probe tick: a single short-timeout GET. No retries — one timeout
    /// is authoritative for this tick.
    async fn probe_tick(inner: &Arc<MonitorInner>) -> bool {
        let request = HttpRequest::get(&inner.probe_url).timeout(inner.probe_timeout);
        let probe_ok = match tokio::time::timeout(inner.probe_timeout, inner.http.execute(request))
            .await
        {
            Ok(Ok(response)) => response.is_success(),
            Ok(Err(e)) => {
                debug!(error = %e, "Health probe failed");
                false
            }
            Err(_) => {
                debug!("Health probe timed out");
                false
            }
        };

        let link = inner
            .signal
            .current()
            .await
            .unwrap_or_else(|_| LinkState::offline());

        // Probe failure falls back to the platform flag.
        let online = if probe_ok { true } else { link.connected };
        Self::apply(inner, online, link.mode);
        online
    }

    /// Apply a new effective state, notifying subscribers only on an actual
    /// status/mode transition. `last_online_at` is kept current without
    /// waking subscribers.
    fn apply(inner: &Arc<MonitorInner>, online: bool, mode: ConnectionMode) {
        let now = chrono::Utc::now().timestamp_millis();
        let status = if online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        };

        let mut transitioned = false;
        inner.state_tx.send_if_modified(|snapshot| {
            let before = (snapshot.status, snapshot.mode);
            if online {
                snapshot.last_online_at = Some(now);
            }
            snapshot.status = status;
            snapshot.mode = mode;
            transitioned = before != (status, mode);
            transitioned
        });

        if transitioned {
            info!(online, %mode, "Connectivity changed");
            let _ = inner
                .event_bus
                .emit(CoreEvent::Network(NetworkEvent::StatusChanged {
                    online,
                    mode: mode.to_string(),
                }));
        }
    }
}
