//! Engine Configuration
//!
//! Central knobs for the continuity engine. Components receive the pieces
//! they need at construction time; nothing reads configuration ambiently.

use crate::error::{Result, RuntimeError};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the continuity engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the audiobook server, without trailing slash
    /// (e.g., `https://api.example.com`).
    pub server_base_url: String,

    /// Path probed by the network monitor to confirm the backend is
    /// reachable.
    pub liveness_path: String,

    /// Interval between health probes.
    pub probe_interval: Duration,

    /// Timeout for a single health probe. One timeout is authoritative for
    /// that tick; the probe itself never retries.
    pub probe_timeout: Duration,

    /// Minimum spacing between primary history writes for the same book.
    pub history_write_throttle: Duration,

    /// Safety buffer applied before a signed URL's nominal expiry.
    pub url_expiry_buffer: Duration,

    /// Remaining token lifetime below which a proactive refresh triggers.
    pub token_refresh_buffer: Duration,

    /// Maximum number of simultaneously running download transfers.
    pub max_concurrent_downloads: usize,

    /// Event bus channel capacity.
    pub event_buffer: usize,

    /// SQLite database location; `None` selects an in-memory store
    /// (used by tests).
    pub database_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Create a configuration for the given server with engine defaults.
    pub fn new(server_base_url: impl Into<String>) -> Self {
        Self {
            server_base_url: server_base_url.into(),
            liveness_path: "/healthcheck".to_string(),
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(3),
            history_write_throttle: Duration::from_secs(5),
            url_expiry_buffer: Duration::from_secs(5 * 60),
            token_refresh_buffer: Duration::from_secs(5 * 60),
            max_concurrent_downloads: 2,
            event_buffer: 100,
            database_path: None,
        }
    }

    /// Set the database file path.
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Set the health-probe interval.
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the download concurrency limit.
    pub fn max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = max;
        self
    }

    /// Validate invariants that would otherwise surface as confusing
    /// runtime behavior.
    pub fn validate(&self) -> Result<()> {
        if self.server_base_url.is_empty() {
            return Err(RuntimeError::Config("server_base_url is empty".to_string()));
        }
        if self.server_base_url.ends_with('/') {
            return Err(RuntimeError::Config(
                "server_base_url must not end with '/'".to_string(),
            ));
        }
        if self.max_concurrent_downloads == 0 {
            return Err(RuntimeError::Config(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Join a server-relative path onto the base URL.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.server_base_url, path)
    }
}
