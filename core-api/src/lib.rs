//! # Core API
//!
//! The engine's HTTP surface to the audiobook server:
//!
//! - [`ApiClient`] - authenticated requests with the reactive 401 path and
//!   transparent offline fallback through the response cache
//! - [`ApiResponseCache`] - TTL-ruled cache of GET responses enabling
//!   offline browsing; expired entries are still served, flagged stale
//! - [`CoverCache`] - persisted cover images for offline artwork
//! - typed wire shapes for every consumed endpoint

pub mod client;
pub mod covers;
pub mod error;
pub mod response_cache;
pub mod types;

pub use client::ApiClient;
pub use covers::CoverCache;
pub use error::{ApiError, Result};
pub use response_cache::{ApiResponseCache, CachedValue};
