//! Logging initialization

/// Default filter used when neither the config nor `RUST_LOG` specify one
pub const DEFAULT_FILTER: &str = "info";

/// Initialize the logging system
///
/// Uses env_logger with `default_filter` (usually `EngineConfig::log_filter`).
/// Override with RUST_LOG environment variable.
///
/// # Example
/// ```
/// chunkstream::core::logging::init("debug");
/// log::info!("Streaming started");
/// ```
pub fn init(default_filter: &str) {
    let filter = if default_filter.is_empty() {
        DEFAULT_FILTER
    } else {
        default_filter
    };

    // A second init (tests, embedding apps) keeps the first logger.
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .try_init();
}
