//! Tracing and logging (shared setup).

/// Initialize process-wide tracing, reading the format from the environment.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::from_env());
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use tracing::{LOG_FORMAT_ENV, LogFormat, UnknownLogFormat};
