//! Observability
//!
//! - Redacting structured log sink
//! - `tracing` subscriber installation

pub mod logging;

pub use logging::{
    mask_sensitive, summarize_context, InteropLogger, LogEntry, LogFormat, LogLevel, LoggerConfig,
};

/// Install a global fmt subscriber at the configured level.
///
/// Meant for the outermost composition point. Returns `false` when a
/// subscriber was already installed.
pub fn init_tracing(config: &LoggerConfig) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(config.level))
        .try_init()
        .is_ok()
}
