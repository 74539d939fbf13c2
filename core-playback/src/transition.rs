//! # Episode Transition
//!
//! The critical path that runs when playback moves to another episode:
//! resolve a playable source, preferring a local file, then a cached signed
//! URL, then the token-authenticated streaming fallback.
//!
//! The whole sequence is coarse-grained-retryable through [`RetryManager`]
//! (bounded attempts, fixed delay, telemetry on each retry and on
//! exhaustion). When playback keeps failing on a source that *resolved*
//! fine, [`recover_after_playback_failure`](EpisodeTransition::recover_after_playback_failure)
//! assumes revoked signed URLs, invalidates the book's URL cache, and
//! refetches once before the failure is surfaced.

use crate::error::{PlaybackError, Result};
use crate::urls::{EpisodeUrlCache, UrlIssuer};
use async_trait::async_trait;
use core_net::retry::{RetryManager, RetryOutcome};
use core_runtime::telemetry::TelemetryReporter;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Something the player can be handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayableSource {
    /// A `file://` URI of a fully-downloaded episode. Always preferred.
    LocalFile(String),
    /// A remote URL (cached signed URL or streaming fallback).
    Remote(String),
}

impl PlayableSource {
    pub fn url(&self) -> &str {
        match self {
            PlayableSource::LocalFile(url) => url,
            PlayableSource::Remote(url) => url,
        }
    }
}

/// Seam to locally-downloaded episodes (implemented by the download
/// manager).
#[async_trait]
pub trait LocalSource: Send + Sync {
    async fn local_uri(&self, book_id: &str, episode_index: u32) -> Option<String>;
}

/// Retry-wrapped source resolution for episode changes.
pub struct EpisodeTransition {
    local: Arc<dyn LocalSource>,
    urls: EpisodeUrlCache,
    issuer: Arc<dyn UrlIssuer>,
    retry: RetryManager,
    telemetry: Option<TelemetryReporter>,
}

impl EpisodeTransition {
    pub fn new(
        local: Arc<dyn LocalSource>,
        urls: EpisodeUrlCache,
        issuer: Arc<dyn UrlIssuer>,
        retry: RetryManager,
    ) -> Self {
        Self {
            local,
            urls,
            issuer,
            retry,
            telemetry: None,
        }
    }

    /// Attach the advisory telemetry reporter.
    pub fn with_telemetry(mut self, telemetry: TelemetryReporter) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// One resolution pass: local file, cached/fetched signed URL, then the
    /// streaming fallback.
    #[instrument(skip(self))]
    pub async fn resolve(&self, book_id: &str, episode_index: u32) -> Result<PlayableSource> {
        if let Some(uri) = self.local.local_uri(book_id, episode_index).await {
            debug!(book_id, episode_index, "Resolved to local file");
            return Ok(PlayableSource::LocalFile(uri));
        }

        match self.urls.url_or_fetch(book_id, episode_index).await {
            Ok(url) => return Ok(PlayableSource::Remote(url)),
            Err(e) => {
                debug!(book_id, episode_index, error = %e, "Signed URL unavailable; trying stream fallback");
            }
        }

        match self.issuer.stream_url(book_id, episode_index).await {
            Ok(url) => Ok(PlayableSource::Remote(url)),
            Err(_) => Err(PlaybackError::NoPlayableSource {
                book_id: book_id.to_string(),
                episode_index,
            }),
        }
    }

    /// Resolution with bounded retries. Never errors; exhaustion is in the
    /// outcome, which the caller turns into a stopped-playback error state.
    pub async fn resolve_with_retry(
        &self,
        book_id: &str,
        episode_index: u32,
    ) -> RetryOutcome<PlayableSource> {
        let telemetry = self.telemetry.clone();
        let outcome = self
            .retry
            .execute_with_observer(
                || self.resolve(book_id, episode_index),
                |attempt, error| {
                    if let Some(t) = &telemetry {
                        t.report(
                            "episode-transition",
                            format!(
                                "attempt {} failed for {}#{}: {}",
                                attempt, book_id, episode_index, error
                            ),
                        );
                    }
                },
            )
            .await;

        if !outcome.success {
            warn!(book_id, episode_index, attempts = outcome.attempts, "Episode transition exhausted retries");
            if let Some(t) = &self.telemetry {
                t.report(
                    "episode-transition",
                    format!(
                        "exhausted {} attempts for {}#{}: {}",
                        outcome.attempts,
                        book_id,
                        episode_index,
                        outcome.last_error.as_deref().unwrap_or("unknown")
                    ),
                );
            }
        }
        outcome
    }

    /// Stale-URL recovery: invalidate the book's cached URLs and fetch a
    /// fresh batch, once. Used after repeated playback failures on a source
    /// that resolved normally (revoked signed URLs look exactly like that).
    #[instrument(skip(self))]
    pub async fn recover_after_playback_failure(
        &self,
        book_id: &str,
        episode_index: u32,
    ) -> Result<PlayableSource> {
        info!(book_id, episode_index, "Recovering from repeated playback failure");
        self.urls.invalidate_book(book_id).await;
        self.urls
            .prefetch_batch(book_id, episode_index, true)
            .await?;

        if let Some(url) = self.urls.get_url(book_id, episode_index).await {
            return Ok(PlayableSource::Remote(url));
        }

        // Fresh batch still unusable: last resort is the stream endpoint.
        self.issuer
            .stream_url(book_id, episode_index)
            .await
            .map(PlayableSource::Remote)
    }
}
