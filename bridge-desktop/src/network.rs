//! Connectivity Signal Implementation
//!
//! Desktop platforms have no single connectivity callback API shared across
//! OSes, so this adapter approximates one: a cheap TCP reachability check,
//! polled for change notifications.

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{ConnectionMode, ConnectivitySignal, LinkChangeStream, LinkState},
};
use std::time::Duration;
use tracing::debug;

const REACHABILITY_TARGET: &str = "8.8.8.8:53";
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Desktop connectivity signal backed by a TCP reachability check.
///
/// Note: platform-specific implementations (Linux netlink, macOS
/// SystemConfiguration, Windows Network List Manager) would be more robust
/// but require additional dependencies.
pub struct DesktopConnectivitySignal {
    target: String,
}

impl DesktopConnectivitySignal {
    pub fn new() -> Self {
        Self {
            target: REACHABILITY_TARGET.to_string(),
        }
    }

    /// Override the reachability target (used by tests).
    pub fn with_target(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    async fn check(&self) -> LinkState {
        let connected = matches!(
            tokio::time::timeout(
                Duration::from_secs(3),
                tokio::net::TcpStream::connect(&self.target),
            )
            .await,
            Ok(Ok(_))
        );

        LinkState {
            connected,
            // Desktop cannot cheaply distinguish WiFi from wired/cellular
            mode: ConnectionMode::Unknown,
        }
    }
}

impl Default for DesktopConnectivitySignal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectivitySignal for DesktopConnectivitySignal {
    async fn current(&self) -> Result<LinkState> {
        let state = self.check().await;
        debug!(connected = state.connected, "Link state checked");
        Ok(state)
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn LinkChangeStream>> {
        Ok(Box::new(PolledLinkChangeStream {
            signal: Self::with_target(self.target.clone()),
            last: None,
        }))
    }
}

/// Link change stream that polls for changes and emits only transitions.
struct PolledLinkChangeStream {
    signal: DesktopConnectivitySignal,
    last: Option<LinkState>,
}

#[async_trait]
impl LinkChangeStream for PolledLinkChangeStream {
    async fn next(&mut self) -> Option<LinkState> {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            let state = self.signal.check().await;
            if self.last != Some(state) {
                self.last = Some(state);
                return Some(state);
            }
        }
    }
}
