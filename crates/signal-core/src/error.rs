//! Errors produced while framing or parsing control-channel messages.

use thiserror::Error;

/// Result type for protocol encode/decode operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Errors produced by the protocol layer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame could not be serialized to JSON.
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),

    /// Incoming text was not a valid control-channel frame.
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// A frame parsed as JSON but violated the protocol shape.
    #[error("malformed frame: {reason}")]
    Malformed { reason: String },
}

impl ProtocolError {
    /// Create a malformed-frame error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}
