use thiserror::Error;

/// Authentication errors.
///
/// `Clone` because the settled outcome of a single-flight refresh is shared
/// by every caller that attached to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Token refresh rejected with HTTP {status}; session torn down")]
    RefreshRejected { status: u16 },

    #[error("Network error during authentication: {0}")]
    Network(String),

    #[error("Malformed auth response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
