//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding wire messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The payload is not valid for the expected message shape.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required field is missing.
    #[error("missing field: {0}")]
    MissingField(&'static str),
}
