//! Adapters between the API client and the playback seams
//!
//! `core-playback` talks to traits so it can be tested against scripted
//! servers; these are the production implementations over [`ApiClient`].

use async_trait::async_trait;
use core_api::ApiClient;
use core_auth::TokenRefreshCoordinator;
use core_playback::download::EpisodeSource;
use core_playback::error::{PlaybackError, Result as PlaybackResult};
use core_playback::urls::{EpisodeUrlCache, IssuedBatch, UrlIssuer, UrlResolver};
use core_store::models::EpisodeUrlEntry;
use tracing::debug;

/// [`UrlIssuer`] over the URL-issuance endpoints.
pub struct ApiUrlIssuer {
    api: ApiClient,
}

impl ApiUrlIssuer {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl UrlIssuer for ApiUrlIssuer {
    async fn fetch_batch(&self, book_id: &str, start: u32, count: u32) -> PlaybackResult<IssuedBatch> {
        let response = self
            .api
            .episode_url_batch(book_id, start, count)
            .await
            .map_err(|e| PlaybackError::UrlFetch(e.to_string()))?;

        Ok(IssuedBatch {
            entries: response
                .urls
                .into_iter()
                .map(|u| EpisodeUrlEntry {
                    index: u.index,
                    url: u.url,
                    expires_at: u.expires_at,
                })
                .collect(),
            batch_start: response.batch_start,
            batch_end: response.batch_end,
        })
    }

    async fn stream_url(&self, book_id: &str, episode_index: u32) -> PlaybackResult<String> {
        self.api
            .stream_url(book_id, episode_index)
            .await
            .map_err(|e| PlaybackError::UrlFetch(e.to_string()))
    }
}

/// [`UrlResolver`] applying environment-dependent resolution at retrieval
/// time.
///
/// Absolute (CDN-signed) URLs pass through untouched. Server-relative URLs
/// are anchored to the *current* base URL, and relative stream paths get the
/// *current* access token — never whatever was live when the batch was
/// cached.
pub struct ApiUrlResolver {
    base_url: String,
    auth: TokenRefreshCoordinator,
}

impl ApiUrlResolver {
    pub fn new(base_url: String, auth: TokenRefreshCoordinator) -> Self {
        Self { base_url, auth }
    }
}

#[async_trait]
impl UrlResolver for ApiUrlResolver {
    async fn resolve(&self, raw_url: &str) -> String {
        if raw_url.starts_with("http://") || raw_url.starts_with("https://") {
            return raw_url.to_string();
        }

        let absolute = format!("{}{}", self.base_url, raw_url);
        if !raw_url.contains("/stream") {
            return absolute;
        }

        match self.auth.access_token().await {
            Ok(token) => format!("{}?token={}", absolute, token),
            Err(e) => {
                debug!(error = %e, "No token for stream URL resolution");
                absolute
            }
        }
    }
}

/// [`EpisodeSource`] for the download manager: signed URL first, streaming
/// endpoint second.
pub struct ApiEpisodeSource {
    urls: EpisodeUrlCache,
    api: ApiClient,
}

impl ApiEpisodeSource {
    pub fn new(urls: EpisodeUrlCache, api: ApiClient) -> Self {
        Self { urls, api }
    }
}

#[async_trait]
impl EpisodeSource for ApiEpisodeSource {
    async fn download_url(&self, book_id: &str, episode_index: u32) -> PlaybackResult<String> {
        if let Ok(url) = self.urls.url_or_fetch(book_id, episode_index).await {
            return Ok(url);
        }
        self.api
            .stream_url(book_id, episode_index)
            .await
            .map_err(|e| PlaybackError::UrlFetch(e.to_string()))
    }
}
