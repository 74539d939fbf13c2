//! Token types and expiry arithmetic

use serde::{Deserialize, Serialize};

/// Fallback access-token lifetime when the server omits `expiresIn`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// An access/refresh token pair with a known expiry.
///
/// Token state is ephemeral by design: it lives only in the coordinator and
/// is re-established from the host's sign-in flow on process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix epoch milliseconds when the access token expires.
    pub expires_at: i64,
}

impl AuthTokens {
    pub fn new(access_token: String, refresh_token: String, expires_at: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at,
        }
    }

    /// Whether the access token has already expired at `now` (epoch ms).
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime in milliseconds (zero when expired).
    pub fn remaining_ms(&self, now: i64) -> i64 {
        (self.expires_at - now).max(0)
    }

    /// The proactive-refresh condition: still valid, but the remaining
    /// lifetime has dropped below `buffer_ms`. An already-expired token is
    /// deliberately excluded; it belongs to the reactive 401 path so a hard
    /// refresh failure is not masked.
    pub fn should_refresh_proactively(&self, now: i64, buffer_ms: i64) -> bool {
        !self.is_expired(now) && self.remaining_ms(now) < buffer_ms
    }
}

/// Wire shape of `POST /auth/refresh`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Wire shape of the refresh response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds of validity; servers that omit it get the default lifetime.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl RefreshResponse {
    /// Convert to tokens anchored at `now` (epoch ms).
    pub fn into_tokens(self, now: i64) -> AuthTokens {
        let lifetime_secs = self.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        AuthTokens::new(
            self.access_token,
            self.refresh_token,
            now + lifetime_secs * 1000,
        )
    }
}
