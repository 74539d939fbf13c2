//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the continuity engine and
//! platform-specific implementations. Each trait represents a capability the
//! engine requires but that must be implemented differently per platform
//! (desktop, iOS, Android).
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations plus chunked
//!   download streams
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Durable file I/O for
//!   downloaded episodes, with a capability flag for platforms without local
//!   file support
//! - [`ConnectivitySignal`](network::ConnectivitySignal) - Native
//!   online/offline and link-type change notifications
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type.
//! Platform implementations should convert platform-specific errors to
//! `BridgeError` and include error context (file paths, URLs).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent
//! usage across async tasks.

pub mod error;
pub mod http;
pub mod network;
pub mod storage;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{ByteStream, HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use network::{ConnectionMode, ConnectivitySignal, LinkChangeStream, LinkState};
pub use storage::{FileMetadata, FileSystemAccess};
