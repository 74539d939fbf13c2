use thiserror::Error;

/// Playback-path errors.
///
/// `Clone` because coalesced prefetch operations share their settled outcome
/// with every attached caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("URL issuance failed: {0}")]
    UrlFetch(String),

    #[error("No playable source for episode {episode_index} of {book_id}")]
    NoPlayableSource {
        book_id: String,
        episode_index: u32,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Download was cancelled")]
    Cancelled,

    #[error("Local files are not supported on this platform")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
