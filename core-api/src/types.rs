//! Wire shapes for the audiobook server API
//!
//! Field names follow the server's camelCase JSON convention.

use serde::{Deserialize, Serialize};

/// Book metadata as returned by `GET /books/:bookId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    pub episode_count: u32,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
}

/// Payload of `POST /history/sync`; the response echoes the authoritative
/// record in the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPayload {
    pub book_id: String,
    pub current_time: f64,
    pub episode_index: u32,
    pub playback_rate: f64,
    /// Unix epoch milliseconds.
    pub last_played_at: i64,
}

/// Response of `GET /history/most-recent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MostRecent {
    pub history: HistoryPayload,
    pub book: Book,
}

/// One signed URL in a batch response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub index: u32,
    pub url: String,
    /// Unix epoch milliseconds.
    pub expires_at: i64,
}

/// Response of `GET /books/:bookId/episodes/urls?start&count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlBatchResponse {
    pub urls: Vec<SignedUrl>,
    pub batch_start: u32,
    pub batch_end: u32,
}

/// Response of `GET /books/:bookId/episodes/:index/url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleUrlResponse {
    pub url: String,
}
