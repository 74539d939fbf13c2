//! Error Telemetry
//!
//! Fire-and-forget diagnostics reporting to `POST /telemetry/errors`. The
//! reporter is advisory-only: it never blocks a caller, never returns an
//! error into the critical path, and silently drops events when the buffer
//! is full or the network is down.

use bridge_traits::http::{HttpClient, HttpRequest};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Maximum buffered events; older events are dropped first.
const MAX_BUFFERED_EVENTS: usize = 50;

/// Upload timeout. Short on purpose: diagnostics must never hold resources.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// A single diagnostic event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TelemetryEvent {
    /// Component that observed the failure (e.g., "retry", "episode-urls").
    pub component: String,
    /// Human-readable message.
    pub message: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Serialize)]
struct TelemetryBatch<'a> {
    events: &'a [TelemetryEvent],
}

/// Advisory error reporter.
///
/// `report` enqueues and returns immediately; the upload happens on a
/// detached task so the caller's latency is unaffected.
#[derive(Clone)]
pub struct TelemetryReporter {
    http: Arc<dyn HttpClient>,
    endpoint: String,
    buffer: Arc<Mutex<VecDeque<TelemetryEvent>>>,
}

impl TelemetryReporter {
    pub fn new(http: Arc<dyn HttpClient>, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            buffer: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Record a diagnostic event and schedule a best-effort upload.
    pub fn report(&self, component: &str, message: impl Into<String>) {
        let event = TelemetryEvent {
            component: component.to_string(),
            message: message.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        let reporter = self.clone();
        tokio::spawn(async move {
            {
                let mut buffer = reporter.buffer.lock().await;
                if buffer.len() >= MAX_BUFFERED_EVENTS {
                    buffer.pop_front();
                }
                buffer.push_back(event);
            }
            reporter.flush().await;
        });
    }

    /// Attempt to upload everything buffered. Failures re-buffer nothing:
    /// diagnostics are droppable by contract.
    pub async fn flush(&self) {
        let events: Vec<TelemetryEvent> = {
            let mut buffer = self.buffer.lock().await;
            buffer.drain(..).collect()
        };

        if events.is_empty() {
            return;
        }

        let request = match HttpRequest::post(&self.endpoint)
            .timeout(UPLOAD_TIMEOUT)
            .json(&TelemetryBatch { events: &events })
        {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Failed to serialize telemetry batch");
                return;
            }
        };

        match self.http.execute(request).await {
            Ok(response) if response.is_success() => {
                debug!(count = events.len(), "Telemetry batch uploaded");
            }
            Ok(response) => {
                debug!(status = response.status, "Telemetry upload rejected");
            }
            Err(e) => {
                debug!(error = %e, "Telemetry upload failed");
            }
        }
    }

    /// Number of events currently buffered (used by tests).
    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::{DownloadBody, HttpResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHttpClient {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingHttpClient {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl HttpClient for CountingHttpClient {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BridgeError::OperationFailed("offline".to_string()));
            }
            Ok(HttpResponse {
                status: 204,
                headers: Default::default(),
                body: Default::default(),
            })
        }

        async fn download(&self, _request: HttpRequest) -> BridgeResult<DownloadBody> {
            Err(BridgeError::NotAvailable("not used".to_string()))
        }
    }

    #[tokio::test]
    async fn test_flush_drains_buffer_even_on_failure() {
        let http = Arc::new(CountingHttpClient::new(true));
        let reporter = TelemetryReporter::new(http.clone(), "https://api.test/telemetry/errors");

        reporter.report("retry", "attempt 1 failed");
        // Wait for the detached upload task to run.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(reporter.buffered().await, 0);
        assert!(http.calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_flush_uploads_batch() {
        let http = Arc::new(CountingHttpClient::new(false));
        let reporter = TelemetryReporter::new(http.clone(), "https://api.test/telemetry/errors");

        {
            let mut buffer = reporter.buffer.lock().await;
            for i in 0..3 {
                buffer.push_back(TelemetryEvent {
                    component: "test".to_string(),
                    message: format!("event {}", i),
                    timestamp: 0,
                });
            }
        }

        reporter.flush().await;
        assert_eq!(reporter.buffered().await, 0);
        assert_eq!(http.calls.load(Ordering::SeqCst), 1);
    }
}
