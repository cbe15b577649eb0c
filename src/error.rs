//! Error types for call path detection
//!
//! Only a capture that yields no frames aborts an operation. Symbol
//! resolution failures, registry saturation and report truncation are
//! reported through ordinary return values instead.

use thiserror::Error;

/// Errors that can occur while detecting call paths
#[derive(Error, Debug)]
pub enum CallPathError {
    #[error("Stack capture returned no frames; cannot fingerprint an empty call path")]
    EmptyCapture,

    #[error("Invalid detector configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to serialize registry: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for call path operations
pub type Result<T> = std::result::Result<T, CallPathError>;
