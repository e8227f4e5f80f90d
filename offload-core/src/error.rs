//! Errors raised by the core crate.

use thiserror::Error;

/// Errors from resolving core configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No selection policy is registered under this name.
    #[error("unknown decision algorithm: {0}")]
    UnknownAlgorithm(String),
}
