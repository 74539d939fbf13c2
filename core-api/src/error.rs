use core_auth::AuthError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Network unreachable: {0}")]
    Network(String),

    #[error("Server returned HTTP {status}")]
    Http { status: u16 },

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Connectivity failures are handled by falling back to cached data and
    /// are never surfaced as user-facing errors.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_) | ApiError::Auth(AuthError::Network(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
