//! # Token Refresh Coordinator
//!
//! Owns the session's token pair and guarantees at most one refresh in
//! flight system-wide. Callers that arrive while a refresh is pending attach
//! to the same shared operation and observe the same settled outcome.
//!
//! ## Refresh paths
//!
//! - **Proactive**: [`access_token`](TokenRefreshCoordinator::access_token)
//!   refreshes when the remaining lifetime is below the configured buffer
//!   *and* the token is not yet expired. An already-expired token is left
//!   for the reactive path, so a hard failure surfaces instead of being
//!   masked by silent renewal.
//! - **Reactive**: [`execute_authorized`](TokenRefreshCoordinator::execute_authorized)
//!   refreshes exactly once per original request on a 401 response, then
//!   replays the request with the new token.
//!
//! A refresh that is itself rejected with 401/403 tears the session down;
//! a refresh that fails on a network error is transient and leaves the
//! session intact.

use crate::error::{AuthError, Result};
use crate::types::{AuthTokens, RefreshRequest, RefreshResponse};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

type SharedRefresh = Shared<BoxFuture<'static, Result<AuthTokens>>>;

struct Inner {
    http: Arc<dyn HttpClient>,
    refresh_url: String,
    event_bus: EventBus,
    refresh_buffer_ms: i64,
    tokens: RwLock<Option<AuthTokens>>,
    in_flight: Mutex<Option<SharedRefresh>>,
}

/// Single-flight access-token refresh coordinator.
///
/// Cloning is cheap; all clones share one session and one in-flight slot.
#[derive(Clone)]
pub struct TokenRefreshCoordinator {
    inner: Arc<Inner>,
}

impl TokenRefreshCoordinator {
    /// Create a coordinator.
    ///
    /// * `refresh_url` - absolute URL of the refresh endpoint
    /// * `refresh_buffer` - remaining lifetime below which a proactive
    ///   refresh triggers
    pub fn new(
        http: Arc<dyn HttpClient>,
        refresh_url: impl Into<String>,
        event_bus: EventBus,
        refresh_buffer: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                refresh_url: refresh_url.into(),
                event_bus,
                refresh_buffer_ms: refresh_buffer.as_millis() as i64,
                tokens: RwLock::new(None),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Install a token pair (after the host's sign-in flow).
    pub async fn set_tokens(&self, tokens: AuthTokens) {
        *self.inner.tokens.write().await = Some(tokens);
    }

    /// Whether a session currently exists.
    pub async fn is_authenticated(&self) -> bool {
        self.inner.tokens.read().await.is_some()
    }

    /// Current token pair, if any (primarily for tests and diagnostics).
    pub async fn current_tokens(&self) -> Option<AuthTokens> {
        self.inner.tokens.read().await.clone()
    }

    /// Explicit sign-out: clears tokens and notifies subscribers.
    pub async fn sign_out(&self) {
        Inner::teardown(&self.inner, "sign-out").await;
    }

    /// Get an access token for an outgoing request, refreshing proactively
    /// when the remaining lifetime is inside the buffer window.
    #[instrument(skip(self))]
    pub async fn access_token(&self) -> Result<String> {
        let now = chrono::Utc::now().timestamp_millis();
        let tokens = self
            .inner
            .tokens
            .read()
            .await
            .clone()
            .ok_or(AuthError::NotAuthenticated)?;

        if !tokens.should_refresh_proactively(now, self.inner.refresh_buffer_ms) {
            return Ok(tokens.access_token);
        }

        info!("Access token expiring soon; refreshing proactively");
        match self.refresh().await {
            Ok(new_tokens) => Ok(new_tokens.access_token),
            Err(AuthError::Network(e)) => {
                // Transient: the current token is still valid inside the
                // buffer window, so keep using it.
                warn!(error = %e, "Proactive refresh failed; reusing current token");
                Ok(tokens.access_token)
            }
            Err(e) => Err(e),
        }
    }

    /// Refresh the token pair, coalescing concurrent callers onto one
    /// network call.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<AuthTokens> {
        let fut = {
            let mut in_flight = self.inner.in_flight.lock().await;
            match in_flight.as_ref() {
                Some(pending) => {
                    debug!("Attaching to in-flight refresh");
                    pending.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let pending: SharedRefresh =
                        async move { Inner::do_refresh(inner).await }.boxed().shared();
                    *in_flight = Some(pending.clone());
                    pending
                }
            }
        };

        fut.await
    }

    /// Execute a request with bearer authentication and the reactive 401
    /// path: on 401, refresh once and replay the original request with the
    /// new token. The replay's response is returned as-is; there is exactly
    /// one refresh per original request.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn execute_authorized(&self, request: HttpRequest) -> Result<HttpResponse> {
        let token = self.access_token().await?;
        let response = self
            .inner
            .http
            .execute(request.clone().bearer_token(&token))
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if response.status != 401 {
            return Ok(response);
        }

        debug!("Request returned 401; refreshing and replaying once");
        let new_tokens = self.refresh().await?;
        self.inner
            .http
            .execute(request.bearer_token(new_tokens.access_token))
            .await
            .map_err(|e| AuthError::Network(e.to_string()))
    }
}

impl Inner {
    /// Runs inside the shared in-flight slot. The slot is released only
    /// after the outcome settles, so every concurrent caller observes the
    /// same result and the next refresh starts a fresh operation.
    async fn do_refresh(inner: Arc<Inner>) -> Result<AuthTokens> {
        let result = Self::refresh_once(&inner).await;
        *inner.in_flight.lock().await = None;
        result
    }

    async fn refresh_once(inner: &Arc<Inner>) -> Result<AuthTokens> {
        let refresh_token = inner
            .tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.refresh_token.clone())
            .ok_or(AuthError::NotAuthenticated)?;

        let _ = inner
            .event_bus
            .emit(CoreEvent::Auth(AuthEvent::TokenRefreshing));

        let request = HttpRequest::post(&inner.refresh_url)
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        let response = inner
            .http
            .execute(request)
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        match response.status {
            status @ (401 | 403) => {
                warn!(status, "Refresh token rejected");
                Self::teardown(&inner, "refresh rejected").await;
                Err(AuthError::RefreshRejected { status })
            }
            status if !(200..300).contains(&status) => {
                // Server trouble is transient from the session's point of view.
                Err(AuthError::Network(format!(
                    "refresh failed with HTTP {}",
                    status
                )))
            }
            _ => {
                let parsed: RefreshResponse = response
                    .json()
                    .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
                let now = chrono::Utc::now().timestamp_millis();
                let tokens = parsed.into_tokens(now);

                *inner.tokens.write().await = Some(tokens.clone());
                let _ = inner
                    .event_bus
                    .emit(CoreEvent::Auth(AuthEvent::TokenRefreshed {
                        expires_at: tokens.expires_at,
                    }));

                info!("Access token refreshed");
                Ok(tokens)
            }
        }
    }

    async fn teardown(inner: &Arc<Inner>, reason: &str) {
        *inner.tokens.write().await = None;
        let _ = inner
            .event_bus
            .emit(CoreEvent::Auth(AuthEvent::SessionExpired {
                reason: reason.to_string(),
            }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::DownloadBody;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MINUTE_MS: i64 = 60_000;

    /// Scripted HTTP client: refresh endpoint behavior is configurable, API
    /// endpoints return 200 only when the newest access token is presented.
    struct MockHttpClient {
        refresh_calls: AtomicUsize,
        api_calls: AtomicUsize,
        refresh_status: u16,
        fail_refresh_transport: bool,
        refresh_delay: Option<Duration>,
    }

    impl MockHttpClient {
        fn ok() -> Self {
            Self {
                refresh_calls: AtomicUsize::new(0),
                api_calls: AtomicUsize::new(0),
                refresh_status: 200,
                fail_refresh_transport: false,
                refresh_delay: None,
            }
        }

        fn rejecting(status: u16) -> Self {
            Self {
                refresh_status: status,
                ..Self::ok()
            }
        }

        fn offline() -> Self {
            Self {
                fail_refresh_transport: true,
                ..Self::ok()
            }
        }

        fn slow() -> Self {
            Self {
                refresh_delay: Some(Duration::from_millis(50)),
                ..Self::ok()
            }
        }

        fn response(status: u16, body: &str) -> HttpResponse {
            HttpResponse {
                status,
                headers: HashMap::new(),
                body: Bytes::from(body.to_string()),
            }
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            if request.url.contains("/auth/refresh") {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(delay) = self.refresh_delay {
                    tokio::time::sleep(delay).await;
                }
                if self.fail_refresh_transport {
                    return Err(BridgeError::OperationFailed("connect refused".to_string()));
                }
                if self.refresh_status != 200 {
                    return Ok(Self::response(self.refresh_status, "{}"));
                }
                return Ok(Self::response(
                    200,
                    r#"{"accessToken": "new-access", "refreshToken": "new-refresh", "expiresIn": 3600}"#,
                ));
            }

            self.api_calls.fetch_add(1, Ordering::SeqCst);
            let authorized = request
                .headers
                .get("Authorization")
                .is_some_and(|h| h == "Bearer new-access");
            if authorized {
                Ok(Self::response(200, r#"{"ok": true}"#))
            } else {
                Ok(Self::response(401, "{}"))
            }
        }

        async fn download(&self, _request: HttpRequest) -> BridgeResult<DownloadBody> {
            Err(BridgeError::NotAvailable("not used".to_string()))
        }
    }

    fn coordinator(http: Arc<MockHttpClient>) -> TokenRefreshCoordinator {
        TokenRefreshCoordinator::new(
            http,
            "https://api.test/auth/refresh",
            EventBus::new(100),
            Duration::from_secs(300),
        )
    }

    fn stale_tokens() -> AuthTokens {
        // Expired long ago; any authorized call will hit the reactive path.
        AuthTokens::new("old-access".into(), "old-refresh".into(), 0)
    }

    fn fresh_tokens() -> AuthTokens {
        let now = chrono::Utc::now().timestamp_millis();
        AuthTokens::new("old-access".into(), "old-refresh".into(), now + 60 * MINUTE_MS)
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_network_call() {
        let http = Arc::new(MockHttpClient::slow());
        let coordinator = coordinator(http.clone());
        coordinator.set_tokens(fresh_tokens()).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = coordinator.clone();
                tokio::spawn(async move { c.refresh().await })
            })
            .collect();

        for handle in handles {
            let tokens = handle.await.unwrap().unwrap();
            assert_eq!(tokens.access_token, "new-access");
        }

        assert_eq!(http.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_refreshes_are_separate_operations() {
        let http = Arc::new(MockHttpClient::ok());
        let coordinator = coordinator(http.clone());
        coordinator.set_tokens(fresh_tokens()).await;

        coordinator.refresh().await.unwrap();
        coordinator.refresh().await.unwrap();

        assert_eq!(http.refresh_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reactive_401_refreshes_once_and_replays() {
        let http = Arc::new(MockHttpClient::ok());
        let coordinator = coordinator(http.clone());
        coordinator.set_tokens(stale_tokens()).await;

        let response = coordinator
            .execute_authorized(HttpRequest::get("https://api.test/books/1"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(http.refresh_calls.load(Ordering::SeqCst), 1);
        // Original attempt + replay.
        assert_eq!(http.api_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_rejection_tears_down_session() {
        let http = Arc::new(MockHttpClient::rejecting(401));
        let event_bus = EventBus::new(100);
        let mut events = event_bus.subscribe();
        let coordinator = TokenRefreshCoordinator::new(
            http,
            "https://api.test/auth/refresh",
            event_bus,
            Duration::from_secs(300),
        );
        coordinator.set_tokens(fresh_tokens()).await;

        let result = coordinator.refresh().await;
        assert_eq!(result, Err(AuthError::RefreshRejected { status: 401 }));
        assert!(!coordinator.is_authenticated().await);

        // TokenRefreshing, then SessionExpired.
        let mut saw_expired = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, CoreEvent::Auth(AuthEvent::SessionExpired { .. })) {
                saw_expired = true;
            }
        }
        assert!(saw_expired);
    }

    #[tokio::test]
    async fn test_refresh_network_failure_is_transient() {
        let http = Arc::new(MockHttpClient::offline());
        let coordinator = coordinator(http);
        coordinator.set_tokens(fresh_tokens()).await;

        let result = coordinator.refresh().await;
        assert!(matches!(result, Err(AuthError::Network(_))));
        // The session survives; only a rejected refresh clears it.
        assert!(coordinator.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_proactive_refresh_inside_buffer_window() {
        let http = Arc::new(MockHttpClient::ok());
        let coordinator = coordinator(http.clone());

        let now = chrono::Utc::now().timestamp_millis();
        // 2 minutes remaining, buffer is 5: proactive refresh expected.
        coordinator
            .set_tokens(AuthTokens::new(
                "old-access".into(),
                "old-refresh".into(),
                now + 2 * MINUTE_MS,
            ))
            .await;

        let token = coordinator.access_token().await.unwrap();
        assert_eq!(token, "new-access");
        assert_eq!(http.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_proactive_refresh_with_ample_lifetime() {
        let http = Arc::new(MockHttpClient::ok());
        let coordinator = coordinator(http.clone());
        coordinator.set_tokens(fresh_tokens()).await;

        let token = coordinator.access_token().await.unwrap();
        assert_eq!(token, "old-access");
        assert_eq!(http.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_left_for_reactive_path() {
        let http = Arc::new(MockHttpClient::ok());
        let coordinator = coordinator(http.clone());
        coordinator.set_tokens(stale_tokens()).await;

        // access_token hands out the stale token without refreshing.
        let token = coordinator.access_token().await.unwrap();
        assert_eq!(token, "old-access");
        assert_eq!(http.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_access_token_without_session() {
        let http = Arc::new(MockHttpClient::ok());
        let coordinator = coordinator(http);

        let result = coordinator.access_token().await;
        assert_eq!(result, Err(AuthError::NotAuthenticated));
    }
}
