//! Error types for the offload proxy.

use std::time::Duration;

use offload_core::CoreError;
use thiserror::Error;

/// Everything that can go wrong outside the core policy.
///
/// No-selection is not an error: it is reported as `None` by the engine.
#[derive(Debug, Error)]
pub enum OffloadError {
    /// The configured decision algorithm is not registered.
    #[error("unknown decision algorithm: {0}")]
    UnknownAlgorithm(String),

    /// The requested configuration profile does not exist.
    #[error("unknown config profile: {0}")]
    UnknownProfile(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Reading configuration from disk failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON document could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The task or URL does not form a valid request target.
    #[error("invalid request target: {0}")]
    InvalidUri(String),

    /// The outbound call failed on the wire.
    #[error("transport error: {0}")]
    Transport(String),

    /// The outbound call did not complete in time.
    #[error("dispatch timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The pending dispatch was cancelled before it completed.
    #[error("dispatch cancelled")]
    Cancelled,

    /// The worker running the dispatch panicked.
    #[error("dispatch worker panicked: {0}")]
    WorkerPanicked(String),
}

impl From<CoreError> for OffloadError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownAlgorithm(name) => OffloadError::UnknownAlgorithm(name),
        }
    }
}

impl From<hyper::Error> for OffloadError {
    fn from(err: hyper::Error) -> Self {
        OffloadError::Transport(err.to_string())
    }
}

impl From<hyper::http::Error> for OffloadError {
    fn from(err: hyper::http::Error) -> Self {
        OffloadError::InvalidUri(err.to_string())
    }
}

/// Result alias used across the proxy crate.
pub type Result<T> = std::result::Result<T, OffloadError>;
