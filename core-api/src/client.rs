//! # API Client
//!
//! Authenticated access to the audiobook server. Every request flows through
//! the token coordinator (bearer injection, proactive renewal, reactive 401
//! replay); GET responses flow through the response cache so browsing keeps
//! working offline.
//!
//! Fallback policy: only **connectivity** failures fall back to cached data
//! (stale entries included). Server-side errors (4xx/5xx) and auth teardown
//! propagate to the caller.

use crate::error::{ApiError, Result};
use crate::response_cache::ApiResponseCache;
use crate::types::{
    Book, HistoryPayload, MostRecent, SignedUrl, SingleUrlResponse, UrlBatchResponse,
};
use bridge_traits::http::HttpRequest;
use core_auth::TokenRefreshCoordinator;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Authenticated, cache-intercepting API client.
#[derive(Clone)]
pub struct ApiClient {
    auth: TokenRefreshCoordinator,
    cache: Arc<ApiResponseCache>,
    base_url: String,
}

impl ApiClient {
    pub fn new(
        auth: TokenRefreshCoordinator,
        cache: Arc<ApiResponseCache>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            auth,
            cache,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET a server path, returning the raw JSON payload.
    ///
    /// On success the payload is written through to the response cache; on a
    /// connectivity failure the cache is consulted, serving stale data
    /// rather than surfacing the outage.
    #[instrument(skip(self))]
    pub async fn get_json(&self, path: &str) -> Result<String> {
        let request = HttpRequest::get(self.url(path));

        match self.auth.execute_authorized(request).await {
            Ok(response) if response.is_success() => {
                let payload = response
                    .text()
                    .map_err(|e| ApiError::Decode(e.to_string()))?;
                let etag = response.header("etag").map(String::from);
                self.cache.set(path, &payload, etag).await;
                Ok(payload)
            }
            Ok(response) => Err(ApiError::Http {
                status: response.status,
            }),
            Err(auth_error) => {
                let error = ApiError::from(auth_error);
                if error.is_connectivity() {
                    if let Some(cached) = self.cache.get(path).await {
                        debug!(path, expired = cached.expired, "Serving cached response offline");
                        return Ok(cached.data);
                    }
                }
                Err(error)
            }
        }
    }

    /// GET and deserialize.
    pub async fn get_typed<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let payload = self.get_json(path).await?;
        serde_json::from_str(&payload).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// POST a JSON body, returning the raw response payload. Never cached.
    #[instrument(skip(self, body))]
    pub async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<String> {
        let request = HttpRequest::post(self.url(path))
            .json(body)
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        let response = self.auth.execute_authorized(request).await?;
        if !response.is_success() {
            return Err(ApiError::Http {
                status: response.status,
            });
        }
        response.text().map_err(|e| ApiError::Decode(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Typed endpoints
    // ------------------------------------------------------------------

    /// `GET /books/:bookId`
    pub async fn book(&self, book_id: &str) -> Result<Book> {
        self.get_typed(&format!("/books/{}", book_id)).await
    }

    /// `GET /history/book/:bookId`; 404 and `null` both mean "no record".
    pub async fn history_for_book(&self, book_id: &str) -> Result<Option<HistoryPayload>> {
        match self.get_json(&format!("/history/book/{}", book_id)).await {
            Ok(payload) => serde_json::from_str(&payload)
                .map_err(|e| ApiError::Decode(e.to_string())),
            Err(ApiError::Http { status: 404 }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `GET /history/most-recent`
    pub async fn most_recent(&self) -> Result<Option<MostRecent>> {
        match self.get_json("/history/most-recent").await {
            Ok(payload) => serde_json::from_str(&payload)
                .map_err(|e| ApiError::Decode(e.to_string())),
            Err(ApiError::Http { status: 404 }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `POST /history/sync`; the response is the authoritative record.
    pub async fn sync_history(&self, record: &HistoryPayload) -> Result<HistoryPayload> {
        let payload = self.post_json("/history/sync", record).await?;
        serde_json::from_str(&payload).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// `GET /books/:bookId/episodes/urls?start&count`
    pub async fn episode_url_batch(
        &self,
        book_id: &str,
        start: u32,
        count: u32,
    ) -> Result<UrlBatchResponse> {
        self.get_typed(&format!(
            "/books/{}/episodes/urls?start={}&count={}",
            book_id, start, count
        ))
        .await
    }

    /// `GET /books/:bookId/episodes/:index/url`
    pub async fn episode_url(&self, book_id: &str, index: u32) -> Result<SignedUrl> {
        let single: SingleUrlResponse = self
            .get_typed(&format!("/books/{}/episodes/{}/url", book_id, index))
            .await?;
        // Single-URL issuance carries no expiry; treat it as immediately
        // consumed and never cached.
        Ok(SignedUrl {
            index,
            url: single.url,
            expires_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Token-authenticated streaming fallback URL for locally-hosted files.
    ///
    /// Resolved at call time so the embedded token always reflects the
    /// current session.
    pub async fn stream_url(&self, book_id: &str, index: u32) -> Result<String> {
        let token = self.auth.access_token().await?;
        Ok(format!(
            "{}/books/{}/episodes/{}/stream?token={}",
            self.base_url, book_id, index, token
        ))
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
