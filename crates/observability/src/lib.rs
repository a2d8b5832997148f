//! Tracing and logging setup shared by the binaries.

/// `log.*` configuration section.
pub mod config;

/// Subscriber installation.
pub mod tracing;

pub use config::LogConfig;
pub use tracing::{ObservabilityError, init};
