//! # API Response Cache
//!
//! TTL-keyed cache of GET responses backing offline browsing. Reads return
//! expired-but-present entries with `expired = true` so offline callers can
//! still render stale content; writes are best-effort and never surface
//! storage failures into the request path.
//!
//! Cacheability and TTLs are rule tables evaluated top-down, first match
//! wins. Authentication, streaming, and URL-issuance endpoints are never
//! cached: their responses are either secrets or time-limited by nature.

use core_store::models::CachedResponse;
use core_store::repositories::ApiCacheRepository;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A cache read result.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    /// Raw JSON payload as originally received.
    pub data: String,
    /// Entry age exceeded its TTL. The caller may want to refresh later;
    /// the data is still renderable.
    pub expired: bool,
}

struct TtlRule {
    pattern: Regex,
    ttl: Duration,
}

/// TTL-ruled response cache over the `api_cache` namespace.
pub struct ApiResponseCache {
    repo: Arc<dyn ApiCacheRepository>,
    deny: Vec<Regex>,
    rules: Vec<TtlRule>,
    default_ttl: Duration,
}

impl ApiResponseCache {
    pub fn new(repo: Arc<dyn ApiCacheRepository>) -> Self {
        // Deny-list: never cache these.
        let deny = vec![
            Regex::new(r"^/auth/").unwrap(),
            Regex::new(r"/stream(\?|$)").unwrap(),
            Regex::new(r"/urls?(\?|$)").unwrap(),
        ];

        // TTL table, first match wins.
        let rules = vec![
            TtlRule {
                // Book detail
                pattern: Regex::new(r"^/books/[^/?]+$").unwrap(),
                ttl: Duration::from_secs(60 * 60),
            },
            TtlRule {
                // Book listing
                pattern: Regex::new(r"^/books(\?|$)").unwrap(),
                ttl: Duration::from_secs(5 * 60),
            },
            TtlRule {
                pattern: Regex::new(r"^/history").unwrap(),
                ttl: Duration::from_secs(60),
            },
        ];

        Self {
            repo,
            deny,
            rules,
            default_ttl: Duration::from_secs(5 * 60),
        }
    }

    /// Whether responses for this path may be cached at all.
    pub fn should_cache(&self, path: &str) -> bool {
        !self.deny.iter().any(|p| p.is_match(path))
    }

    /// The TTL applicable to a path.
    pub fn ttl_for(&self, path: &str) -> Duration {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(path))
            .map(|rule| rule.ttl)
            .unwrap_or(self.default_ttl)
    }

    /// Look up a cached response.
    ///
    /// Storage errors degrade to a miss. An entry past its TTL is returned
    /// with `expired = true`, never withheld.
    pub async fn get(&self, path: &str) -> Option<CachedValue> {
        let entry = match self.repo.get(path).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(path, error = %e, "Response cache read failed; treating as miss");
                return None;
            }
        };

        let age_ms = chrono::Utc::now().timestamp_millis() - entry.timestamp;
        let expired = age_ms > self.ttl_for(path).as_millis() as i64;

        debug!(path, expired, "Response cache hit");
        Some(CachedValue {
            data: entry.payload,
            expired,
        })
    }

    /// Store a response. Best-effort: failures are logged, never thrown.
    pub async fn set(&self, path: &str, payload: &str, etag: Option<String>) {
        if !self.should_cache(path) {
            return;
        }

        let entry = CachedResponse {
            url: path.to_string(),
            payload: payload.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            etag,
        };

        if let Err(e) = self.repo.put(&entry).await {
            warn!(path, error = %e, "Response cache write failed");
        }
    }
}
