//! # Episode URL Cache
//!
//! Two-tier cache of time-limited signed playback URLs, fetched in batches
//! of [`URL_BATCH_SIZE`] contiguous episodes.
//!
//! ## Tiers
//!
//! 1. An in-memory LRU of recently-touched batches (bounded so long
//!    listening sessions cannot grow it without limit).
//! 2. The durable `episode_urls` namespace, which survives restarts.
//!
//! ## Key behaviors
//!
//! - A 5-minute safety buffer is applied before the nominal expiry so the
//!   player never races a just-expired URL.
//! - The **raw** signed URL is what gets stored; any environment-dependent
//!   transformation (auth token injection, base-URL resolution) happens at
//!   retrieval time through the [`UrlResolver`], so cached data stays
//!   portable across token rotations.
//! - Concurrent prefetches of the same `(book, batch)` coalesce onto one
//!   in-flight operation.
//! - Reaching the last 10 episodes of a batch triggers a background
//!   prefetch of the next batch.

use crate::error::{PlaybackError, Result};
use async_trait::async_trait;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use core_store::models::{EpisodeUrlEntry, UrlBatch, URL_BATCH_SIZE};
use core_store::repositories::UrlBatchRepository;
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Batches kept in the memory tier.
const MEMORY_BATCH_CAPACITY: usize = 64;

/// Trailing window of a batch that triggers prefetch of the next one.
const PREFETCH_MARGIN: u32 = 10;

/// A fetched batch of signed URLs as returned by the issuing endpoint.
#[derive(Debug, Clone)]
pub struct IssuedBatch {
    pub entries: Vec<EpisodeUrlEntry>,
    pub batch_start: u32,
    pub batch_end: u32,
}

/// Seam to the URL-issuing endpoint.
#[async_trait]
pub trait UrlIssuer: Send + Sync {
    /// `GET /books/:bookId/episodes/urls?start&count`
    async fn fetch_batch(&self, book_id: &str, start: u32, count: u32) -> Result<IssuedBatch>;

    /// Token-authenticated streaming fallback for one episode, used when no
    /// signed URL is obtainable.
    async fn stream_url(&self, book_id: &str, episode_index: u32) -> Result<String>;
}

/// Retrieval-time URL transformation.
///
/// Applied when a cached URL is handed out, never when it is stored: the
/// result reflects the *current* auth token and backend base-URL rather than
/// whatever was live at cache-write time.
#[async_trait]
pub trait UrlResolver: Send + Sync {
    async fn resolve(&self, raw_url: &str) -> String;
}

/// Identity resolver for fully-qualified signed URLs.
pub struct PassthroughResolver;

#[async_trait]
impl UrlResolver for PassthroughResolver {
    async fn resolve(&self, raw_url: &str) -> String {
        raw_url.to_string()
    }
}

type BatchKey = (String, u32);
type SharedPrefetch = Shared<BoxFuture<'static, Result<()>>>;

struct UrlCacheInner {
    issuer: Arc<dyn UrlIssuer>,
    resolver: Arc<dyn UrlResolver>,
    repo: Arc<dyn UrlBatchRepository>,
    event_bus: EventBus,
    expiry_buffer_ms: i64,
    memory: Mutex<LruCache<BatchKey, UrlBatch>>,
    in_flight: Mutex<HashMap<BatchKey, SharedPrefetch>>,
}

/// Two-tier batched signed-URL cache.
///
/// Cloning is cheap; all clones share both tiers and the in-flight table.
#[derive(Clone)]
pub struct EpisodeUrlCache {
    inner: Arc<UrlCacheInner>,
}

impl EpisodeUrlCache {
    pub fn new(
        issuer: Arc<dyn UrlIssuer>,
        resolver: Arc<dyn UrlResolver>,
        repo: Arc<dyn UrlBatchRepository>,
        event_bus: EventBus,
        expiry_buffer: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(UrlCacheInner {
                issuer,
                resolver,
                repo,
                event_bus,
                expiry_buffer_ms: expiry_buffer.as_millis() as i64,
                memory: Mutex::new(LruCache::new(
                    NonZeroUsize::new(MEMORY_BATCH_CAPACITY).unwrap(),
                )),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get a playable URL for an episode, if a valid one is cached.
    ///
    /// Checks memory first, then the durable tier (warming memory on a hit).
    /// An entry inside the expiry buffer counts as invalid. The returned URL
    /// has been through the retrieval-time resolver.
    #[instrument(skip(self))]
    pub async fn get_url(&self, book_id: &str, episode_index: u32) -> Option<String> {
        let now = chrono::Utc::now().timestamp_millis();
        let batch_number = UrlBatch::batch_number_for(episode_index);
        let key = (book_id.to_string(), batch_number);

        // Memory tier.
        {
            let mut memory = self.inner.memory.lock().await;
            if let Some(batch) = memory.get(&key) {
                if let Some(entry) = batch.entry(episode_index) {
                    if self.entry_valid(entry, now) {
                        let resolved = self.inner.resolver.resolve(&entry.url).await;
                        return Some(resolved);
                    }
                }
            }
        }

        // Durable tier. Storage failure degrades to a miss.
        let stored = match self.inner.repo.find(book_id, batch_number).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(book_id, batch_number, error = %e, "URL batch read failed");
                None
            }
        };

        let batch = stored?;
        let entry = batch.entry(episode_index)?;
        if !self.entry_valid(entry, now) {
            debug!(book_id, episode_index, "Cached URL inside expiry buffer; miss");
            return None;
        }

        let resolved = self.inner.resolver.resolve(&entry.url).await;
        self.inner.memory.lock().await.put(key, batch);
        Some(resolved)
    }

    /// Get a URL, fetching the covering batch on a miss.
    pub async fn url_or_fetch(&self, book_id: &str, episode_index: u32) -> Result<String> {
        if let Some(url) = self.get_url(book_id, episode_index).await {
            return Ok(url);
        }
        self.prefetch_batch(book_id, episode_index, false).await?;
        self.get_url(book_id, episode_index)
            .await
            .ok_or_else(|| PlaybackError::NoPlayableSource {
                book_id: book_id.to_string(),
                episode_index,
            })
    }

    /// Fetch and store the batch covering `episode_index`.
    ///
    /// A no-op when a valid entry is already cached, unless `force`.
    /// Concurrent calls for the same `(book, batch)` share one in-flight
    /// operation.
    #[instrument(skip(self))]
    pub async fn prefetch_batch(&self, book_id: &str, episode_index: u32, force: bool) -> Result<()> {
        let batch_number = UrlBatch::batch_number_for(episode_index);
        let key = (book_id.to_string(), batch_number);

        if !force && self.has_valid_entry(book_id, episode_index).await {
            debug!(book_id, batch_number, "Batch already cached; prefetch skipped");
            return Ok(());
        }

        let fut = {
            let mut in_flight = self.inner.in_flight.lock().await;
            match in_flight.get(&key) {
                Some(pending) => {
                    debug!(book_id, batch_number, "Attaching to in-flight prefetch");
                    pending.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let fetch_key = key.clone();
                    let pending: SharedPrefetch =
                        async move { UrlCacheInner::do_prefetch(inner, fetch_key).await }
                            .boxed()
                            .shared();
                    in_flight.insert(key.clone(), pending.clone());
                    pending
                }
            }
        };

        fut.await
    }

    /// Called after every episode change: starts a background prefetch of
    /// the next batch once playback is within the last [`PREFETCH_MARGIN`]
    /// episodes of the current one. Never blocks the caller.
    pub fn prefetch_next_batch_if_needed(
        &self,
        book_id: &str,
        episode_index: u32,
        episode_count: u32,
    ) {
        let batch_number = UrlBatch::batch_number_for(episode_index);
        let batch_end = UrlBatch::batch_start_for(batch_number) + URL_BATCH_SIZE - 1;

        if batch_end - episode_index >= PREFETCH_MARGIN {
            return;
        }

        let next_start = UrlBatch::batch_start_for(batch_number + 1);
        if next_start >= episode_count {
            return;
        }

        debug!(book_id, episode_index, next_start, "Prefetching next URL batch");
        let cache = self.clone();
        let book_id = book_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = cache.prefetch_batch(&book_id, next_start, false).await {
                // Background prefetch is opportunistic; the foreground path
                // refetches on demand.
                warn!(book_id, error = %e, "Background batch prefetch failed");
            }
        });
    }

    /// Purge both tiers for a book. Called when repeated playback failures
    /// suggest the cached signed URLs were revoked.
    #[instrument(skip(self))]
    pub async fn invalidate_book(&self, book_id: &str) {
        {
            let mut memory = self.inner.memory.lock().await;
            let keys: Vec<BatchKey> = memory
                .iter()
                .filter(|((book, _), _)| book == book_id)
                .map(|(key, _)| key.clone())
                .collect();
            for key in keys {
                memory.pop(&key);
            }
        }

        if let Err(e) = self.inner.repo.delete_by_book(book_id).await {
            warn!(book_id, error = %e, "Durable URL invalidation failed");
        }

        info!(book_id, "Episode URL cache invalidated");
        let _ = self
            .inner
            .event_bus
            .emit(CoreEvent::Cache(CacheEvent::UrlCacheInvalidated {
                book_id: book_id.to_string(),
            }));
    }

    fn entry_valid(&self, entry: &EpisodeUrlEntry, now: i64) -> bool {
        entry.expires_at - self.inner.expiry_buffer_ms > now
    }

    async fn has_valid_entry(&self, book_id: &str, episode_index: u32) -> bool {
        let now = chrono::Utc::now().timestamp_millis();
        let key = (
            book_id.to_string(),
            UrlBatch::batch_number_for(episode_index),
        );

        {
            let mut memory = self.inner.memory.lock().await;
            if let Some(batch) = memory.get(&key) {
                if let Some(entry) = batch.entry(episode_index) {
                    return self.entry_valid(entry, now);
                }
            }
        }

        match self.inner.repo.find(&key.0, key.1).await {
            Ok(Some(batch)) => batch
                .entry(episode_index)
                .is_some_and(|entry| self.entry_valid(entry, now)),
            _ => false,
        }
    }
}

impl UrlCacheInner {
    /// Runs inside the shared in-flight slot for `key`. The slot is
    /// released only after settling, so concurrent callers share one fetch
    /// and a later prefetch starts fresh.
    async fn do_prefetch(inner: Arc<UrlCacheInner>, key: BatchKey) -> Result<()> {
        let result = Self::fetch_and_store(&inner, &key).await;
        inner.in_flight.lock().await.remove(&key);
        result
    }

    async fn fetch_and_store(inner: &Arc<UrlCacheInner>, key: &BatchKey) -> Result<()> {
        let (book_id, batch_number) = key.clone();
        let start = UrlBatch::batch_start_for(batch_number);

        let issued = inner
            .issuer
            .fetch_batch(&book_id, start, URL_BATCH_SIZE)
            .await?;

        let batch = UrlBatch {
            book_id: book_id.clone(),
            batch_number,
            entries: issued.entries,
            batch_start: issued.batch_start,
            batch_end: issued.batch_end,
            fetched_at: chrono::Utc::now().timestamp_millis(),
        };

        // Durable write is best-effort: with the store degraded the memory
        // tier still carries this session.
        if let Err(e) = inner.repo.upsert(&batch).await {
            warn!(book_id, batch_number, error = %e, "URL batch write failed");
        }

        inner
            .memory
            .lock()
            .await
            .put((book_id.clone(), batch_number), batch);

        info!(book_id, batch_number, "URL batch prefetched");
        let _ = inner
            .event_bus
            .emit(CoreEvent::Cache(CacheEvent::UrlBatchPrefetched {
                book_id,
                batch_number,
            }));

        Ok(())
    }
}
