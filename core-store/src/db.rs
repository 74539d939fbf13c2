//! # Database Connection Pool
//!
//! SQLite connection pooling for the persistent store.
//!
//! ## Features
//!
//! - **WAL Mode**: enabled for better concurrency (multiple readers, one
//!   writer)
//! - **Memoized open**: a single initialization shared by all concurrent
//!   callers
//! - **Automatic migrations**: additive schema versions applied on first open
//! - **Health check**: connection validated before the pool is handed out

use crate::error::{Result, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file path or `:memory:` for an in-memory database
    pub database_url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Maximum time to wait for a connection from the pool
    pub acquire_timeout: Duration,
}

impl StoreConfig {
    /// Create a configuration for the given database file.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        Self {
            database_url: format!("sqlite:{}", path.display()),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// Create a configuration for an in-memory database (used by tests).
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// The engine's durable store.
///
/// Holds a lazily-created, memoized connection pool. Every repository is
/// scoped to one namespace table and goes through [`PersistentStore::pool`];
/// the first caller triggers the open + migrations, later callers share the
/// same pool.
pub struct PersistentStore {
    config: StoreConfig,
    pool: OnceCell<Pool<Sqlite>>,
}

impl PersistentStore {
    /// Create a store handle. No I/O happens until the first `pool()` call.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            pool: OnceCell::new(),
        }
    }

    /// Create an opened in-memory store (used by tests).
    pub async fn open_in_memory() -> Result<Self> {
        let store = Self::new(StoreConfig::in_memory());
        store.initialize().await?;
        Ok(store)
    }

    /// Force initialization now instead of on first use.
    pub async fn initialize(&self) -> Result<()> {
        self.pool().await.map(|_| ())
    }

    /// Get the connection pool, opening the database on first call.
    ///
    /// Concurrent callers await the same underlying open operation; the open
    /// runs migrations and a health check exactly once.
    pub async fn pool(&self) -> Result<&Pool<Sqlite>> {
        self.pool
            .get_or_try_init(|| create_pool(&self.config))
            .await
    }
}

/// Create a configured SQLite connection pool, run migrations, and verify
/// the connection.
async fn create_pool(config: &StoreConfig) -> Result<Pool<Sqlite>> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Opening persistent store"
    );

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(StoreError::Database)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        .pragma("cache_size", "-16000");

    debug!("SQLite connection options configured");

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to open persistent store");
            StoreError::Database(e)
        })?;

    run_migrations(&pool).await?;
    health_check(&pool).await?;

    info!("Persistent store ready");
    Ok(pool)
}

/// Apply all pending migrations from the `migrations/` directory.
///
/// Migrations are embedded in the binary at compile time and are strictly
/// additive; see the invariant note in `migrations/001_initial.sql`.
async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    debug!("Running store migrations");

    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        warn!(error = %e, "Store migration failed");
        StoreError::Migration(e.to_string())
    })?;

    debug!("Store migrations complete");
    Ok(())
}

/// Verify the database answers a trivial query.
async fn health_check(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!(error = %e, "Store health check failed");
        StoreError::Database(e)
    })?;
    Ok(())
}
