//! # Core Runtime
//!
//! Shared runtime infrastructure for the Audiobook Platform Core: the typed
//! event bus, logging bootstrap, engine configuration, and the advisory
//! error-telemetry reporter.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod telemetry;

pub use config::EngineConfig;
pub use error::{Result, RuntimeError};
pub use events::{CoreEvent, EventBus};
pub use telemetry::TelemetryReporter;
