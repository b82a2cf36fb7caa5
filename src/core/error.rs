//! Error types for chunk streaming

use thiserror::Error;

/// Main error type for the crate
///
/// Only fatal conditions end up here. Buffer exhaustion, duplicate
/// allocations and frees of unknown chunks are expected during streaming and
/// are reported through plain return values instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid chunk buffer: {0}")]
    InvalidBuffer(String),
}
