//! Continuity engine façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, filesystem,
//! connectivity) into the engine's components and owns their lifecycle.
//! Desktop shells typically enable the `desktop-shims` feature (which pulls
//! in `bridge-desktop`); mobile hosts inject their own adapters.
//!
//! Components are explicitly constructed with dependency passing — there are
//! no ambient singletons, so tests can build an engine per case without
//! cross-test leakage.

pub mod adapters;
pub mod error;

pub use error::{EngineError, Result};

use adapters::{ApiEpisodeSource, ApiUrlIssuer, ApiUrlResolver};
use bridge_traits::http::HttpClient;
use bridge_traits::network::ConnectivitySignal;
use bridge_traits::storage::FileSystemAccess;
use core_api::{ApiClient, ApiResponseCache, CoverCache};
use core_auth::{AuthTokens, TokenRefreshCoordinator};
use core_net::monitor::NetworkMonitor;
use core_net::retry::RetryManager;
use core_playback::download::DownloadManager;
use core_playback::transition::EpisodeTransition;
use core_playback::urls::EpisodeUrlCache;
use core_runtime::events::EventBus;
use core_runtime::telemetry::TelemetryReporter;
use core_runtime::EngineConfig;
use core_store::db::StoreConfig;
use core_store::repositories::{
    SqliteApiCacheRepository, SqliteCoverRepository, SqliteDownloadsRepository,
    SqliteHistoryRepository, SqliteQueueRepository, SqliteTaskRepository,
    SqliteUrlBatchRepository,
};
use core_store::PersistentStore;
use core_sync::engine::HistorySyncEngine;
use std::sync::Arc;
use tracing::{info, warn};

/// Aggregated handle to all bridge dependencies the engine requires.
pub struct EngineDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub filesystem: Arc<dyn FileSystemAccess>,
    pub connectivity: Arc<dyn ConnectivitySignal>,
}

impl EngineDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        filesystem: Arc<dyn FileSystemAccess>,
        connectivity: Arc<dyn ConnectivitySignal>,
    ) -> Self {
        Self {
            http_client,
            filesystem,
            connectivity,
        }
    }

    /// Desktop defaults: reqwest HTTP, tokio filesystem, TCP-probe
    /// connectivity.
    #[cfg(feature = "desktop-shims")]
    pub fn desktop(app_name: &str) -> Result<Self> {
        Ok(Self {
            http_client: Arc::new(bridge_desktop::ReqwestHttpClient::new()),
            filesystem: Arc::new(
                bridge_desktop::DesktopFileSystem::new(app_name)
                    .map_err(|e| EngineError::Bootstrap(e.to_string()))?,
            ),
            connectivity: Arc::new(bridge_desktop::DesktopConnectivitySignal::new()),
        })
    }
}

/// The offline-resilience and continuity engine.
///
/// Owns every component's lifecycle: [`initialize`](ContinuityEngine::initialize)
/// opens the store, starts the background loops, and recovers interrupted
/// downloads; [`dispose`](ContinuityEngine::dispose) stops the loops. The
/// engine itself decides nothing about *what* to play — it supplies playable
/// sources, connectivity, progress, and positions to the shell.
pub struct ContinuityEngine {
    config: EngineConfig,
    event_bus: EventBus,
    store: Arc<PersistentStore>,
    auth: TokenRefreshCoordinator,
    api: ApiClient,
    covers: CoverCache,
    monitor: NetworkMonitor,
    urls: EpisodeUrlCache,
    downloads: DownloadManager,
    transition: EpisodeTransition,
    history: HistorySyncEngine,
    telemetry: TelemetryReporter,
}

impl ContinuityEngine {
    /// Wire the engine from configuration and bridge dependencies. No I/O
    /// happens here; the store opens on [`initialize`](Self::initialize) or
    /// first use.
    pub fn new(config: EngineConfig, deps: EngineDependencies) -> Result<Self> {
        config
            .validate()
            .map_err(|e| EngineError::Bootstrap(e.to_string()))?;

        let event_bus = EventBus::new(config.event_buffer);

        let store_config = match &config.database_path {
            Some(path) => StoreConfig::new(path.clone()),
            None => StoreConfig::in_memory(),
        };
        let store = Arc::new(PersistentStore::new(store_config));

        let auth = TokenRefreshCoordinator::new(
            deps.http_client.clone(),
            config.api_url("/auth/refresh"),
            event_bus.clone(),
            config.token_refresh_buffer,
        );

        let response_cache = Arc::new(ApiResponseCache::new(Arc::new(
            SqliteApiCacheRepository::new(store.clone()),
        )));
        let api = ApiClient::new(auth.clone(), response_cache, config.server_base_url.clone());

        let covers = CoverCache::new(Arc::new(SqliteCoverRepository::new(store.clone())));

        let telemetry = TelemetryReporter::new(
            deps.http_client.clone(),
            config.api_url("/telemetry/errors"),
        );

        let monitor = NetworkMonitor::new(
            deps.http_client.clone(),
            deps.connectivity.clone(),
            event_bus.clone(),
            config.api_url(&config.liveness_path),
            config.probe_interval,
            config.probe_timeout,
        );

        let issuer = Arc::new(ApiUrlIssuer::new(api.clone()));
        let resolver = Arc::new(ApiUrlResolver::new(
            config.server_base_url.clone(),
            auth.clone(),
        ));
        let urls = EpisodeUrlCache::new(
            issuer.clone(),
            resolver,
            Arc::new(SqliteUrlBatchRepository::new(store.clone())),
            event_bus.clone(),
            config.url_expiry_buffer,
        );

        let downloads = DownloadManager::new(
            deps.http_client.clone(),
            deps.filesystem.clone(),
            Arc::new(ApiEpisodeSource::new(urls.clone(), api.clone())),
            Arc::new(SqliteTaskRepository::new(store.clone())),
            Arc::new(SqliteDownloadsRepository::new(store.clone())),
            event_bus.clone(),
            config.max_concurrent_downloads,
        );

        let transition = EpisodeTransition::new(
            Arc::new(downloads.clone()),
            urls.clone(),
            issuer,
            RetryManager::default(),
        )
        .with_telemetry(telemetry.clone());

        let history = HistorySyncEngine::new(
            Arc::new(SqliteHistoryRepository::new(store.clone())),
            Arc::new(SqliteQueueRepository::new(store.clone())),
            Arc::new(api.clone()),
            monitor.clone(),
            event_bus.clone(),
            config.history_write_throttle,
        );

        Ok(Self {
            config,
            event_bus,
            store,
            auth,
            api,
            covers,
            monitor,
            urls,
            downloads,
            transition,
            history,
            telemetry,
        })
    }

    /// Open the store, start the background loops, and recover downloads a
    /// previous process left unfinished.
    ///
    /// A store that fails to open is logged and left closed: the engine
    /// runs in always-network mode (every cache read degrades to a miss)
    /// rather than refusing to start.
    pub async fn initialize(&self) -> Result<()> {
        match self.store.initialize().await {
            Ok(()) => info!("Persistent store opened"),
            Err(e) => {
                warn!(error = %e, "Store unavailable; continuing in always-network mode");
            }
        }

        self.monitor.start();
        self.history.start();

        if let Err(e) = self.downloads.recover().await {
            warn!(error = %e, "Download recovery failed");
        }

        self.monitor.check_now().await;
        info!("Continuity engine initialized");
        Ok(())
    }

    /// Stop background loops and flush buffered diagnostics.
    pub async fn dispose(&self) {
        self.monitor.dispose();
        self.history.dispose();
        self.telemetry.flush().await;
        info!("Continuity engine disposed");
    }

    /// Install a session after the shell's sign-in flow.
    pub async fn sign_in(&self, tokens: AuthTokens) {
        self.auth.set_tokens(tokens).await;
    }

    /// Tear the session down.
    pub async fn sign_out(&self) {
        self.auth.sign_out().await;
    }

    // ------------------------------------------------------------------
    // Component access
    // ------------------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn auth(&self) -> &TokenRefreshCoordinator {
        &self.auth
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn covers(&self) -> &CoverCache {
        &self.covers
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub fn urls(&self) -> &EpisodeUrlCache {
        &self.urls
    }

    pub fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    pub fn transition(&self) -> &EpisodeTransition {
        &self.transition
    }

    pub fn history(&self) -> &HistorySyncEngine {
        &self.history
    }

    pub fn telemetry(&self) -> &TelemetryReporter {
        &self.telemetry
    }
}
