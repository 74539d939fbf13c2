//! # Desktop Bridge Implementations
//!
//! Reference implementations of the `bridge-traits` contracts for desktop
//! hosts:
//!
//! - [`ReqwestHttpClient`] - HTTP via `reqwest` with chunked download streams
//! - [`DesktopFileSystem`] - file I/O via `tokio::fs` under the platform data
//!   directory
//! - [`DesktopConnectivitySignal`] - connectivity via a cheap TCP reachability
//!   check, polled for change notifications
//!
//! Mobile hosts ship their own adapters; this crate is what the engine's
//! integration tests and the desktop shell run against.

pub mod filesystem;
pub mod http;
pub mod network;

pub use filesystem::DesktopFileSystem;
pub use http::ReqwestHttpClient;
pub use network::DesktopConnectivitySignal;
