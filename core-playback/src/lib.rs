//! # Core Playback
//!
//! Supplies the player with something playable under any connectivity:
//!
//! - [`EpisodeUrlCache`](urls::EpisodeUrlCache) - two-tier (memory +
//!   durable) batched cache of time-limited signed URLs with predictive
//!   prefetching
//! - [`DownloadManager`](download::DownloadManager) - concurrency-limited,
//!   cancellable episode download queue with durable file metadata
//! - [`EpisodeTransition`](transition::EpisodeTransition) - the
//!   retry-wrapped source-resolution path used when playback moves to
//!   another episode (local file first, cached URL second, streaming
//!   fallback last)

pub mod download;
pub mod error;
pub mod transition;
pub mod urls;

pub use download::{DownloadManager, EpisodeSource};
pub use error::{PlaybackError, Result};
pub use transition::{EpisodeTransition, LocalSource, PlayableSource};
pub use urls::{EpisodeUrlCache, IssuedBatch, UrlIssuer, UrlResolver};
