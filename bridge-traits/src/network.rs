//! Platform Connectivity Signal
//!
//! Exposes the host platform's native connectivity state to the engine's
//! network monitor. The signal is intentionally dumb: it reports what the OS
//! believes, and the engine layers health probing on top.

use crate::error::Result;
use async_trait::async_trait;

/// Connection mode as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// WiFi or wired connection
    Wifi,
    /// Cellular/mobile data connection
    Cellular,
    /// Mode unknown or not reported by the platform
    Unknown,
}

/// A snapshot of the platform's connectivity flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkState {
    /// Whether the platform believes a network link is up
    pub connected: bool,
    /// The link's connection mode
    pub mode: ConnectionMode,
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionMode::Wifi => "wifi",
            ConnectionMode::Cellular => "cellular",
            ConnectionMode::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

impl LinkState {
    pub fn offline() -> Self {
        Self {
            connected: false,
            mode: ConnectionMode::Unknown,
        }
    }
}

/// Native connectivity signal trait
///
/// Provides the platform's own online/offline flag and link-type change
/// notifications. The engine combines this with an application-level health
/// probe, because a link being up does not mean the backend is reachable.
///
/// # Platform Support
///
/// - **Desktop**: socket probe / system network APIs
/// - **iOS**: Network framework path monitor
/// - **Android**: ConnectivityManager callbacks
#[async_trait]
pub trait ConnectivitySignal: Send + Sync {
    /// Read the platform's current connectivity flags.
    async fn current(&self) -> Result<LinkState>;

    /// Subscribe to link changes.
    ///
    /// Implementations should emit only when the state actually changes.
    /// Returns `None` from the stream when the signal source is closed.
    async fn subscribe_changes(&self) -> Result<Box<dyn LinkChangeStream>>;
}

/// Stream of link-state changes
#[async_trait]
pub trait LinkChangeStream: Send {
    /// Get the next link-state update.
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<LinkState>;
}
