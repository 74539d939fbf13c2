//! Cover Cache
//!
//! Persists cover image blobs so offline browsing still renders artwork.
//! Fetching bytes from a cover URL is the shell's job; the engine only
//! stores and serves them.

use core_store::models::CachedCover;
use core_store::repositories::CoverRepository;
use std::sync::Arc;
use tracing::warn;

/// Persisted cover images keyed by book.
pub struct CoverCache {
    repo: Arc<dyn CoverRepository>,
}

impl CoverCache {
    pub fn new(repo: Arc<dyn CoverRepository>) -> Self {
        Self { repo }
    }

    /// Store a cover image. Best-effort: a failed write only costs offline
    /// artwork, never the operation that triggered it.
    pub async fn put(&self, book_id: &str, image: Vec<u8>) {
        let cover = CachedCover {
            book_id: book_id.to_string(),
            image,
            cached_at: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.repo.put(&cover).await {
            warn!(book_id, error = %e, "Cover cache write failed");
        }
    }

    /// Fetch a cached cover. Storage errors degrade to a miss.
    pub async fn get(&self, book_id: &str) -> Option<Vec<u8>> {
        match self.repo.get(book_id).await {
            Ok(cover) => cover.map(|c| c.image),
            Err(e) => {
                warn!(book_id, error = %e, "Cover cache read failed; treating as miss");
                None
            }
        }
    }

    /// Remove a cached cover (when the user removes the book).
    pub async fn remove(&self, book_id: &str) {
        if let Err(e) = self.repo.delete(book_id).await {
            warn!(book_id, error = %e, "Cover cache delete failed");
        }
    }
}
