//! Error types for the signaling registry.

use peercall_signal_core::{PeerId, ProtocolError};
use thiserror::Error;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors produced by the signaling registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The control-channel transport could not be established.
    #[error("registration failed: {reason}")]
    Registration { reason: String },

    /// Relay target is not currently registered.
    ///
    /// Recoverable from the caller's point of view: the target may register
    /// later, but the registry never retries on the caller's behalf.
    #[error("unknown peer: {peer}")]
    UnknownPeer { peer: PeerId },

    /// The target's outbound queue is gone; its connection is mid-teardown.
    #[error("control channel to {peer} is closed")]
    ChannelClosed { peer: PeerId },

    /// A control channel violated the protocol.
    #[error("protocol violation: {reason}")]
    Protocol { reason: String },

    /// Socket or listener failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// WebSocket handshake or framing failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegistryError {
    /// Create a registration error.
    pub fn registration(reason: impl Into<String>) -> Self {
        Self::Registration {
            reason: reason.into(),
        }
    }

    /// Create an unknown-peer error.
    pub fn unknown_peer(peer: PeerId) -> Self {
        Self::UnknownPeer { peer }
    }

    /// Create a protocol-violation error.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// True for errors the caller may meaningfully act on and try again
    /// later, as opposed to faults in the registry or the transport.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnknownPeer { .. } | Self::ChannelClosed { .. })
    }
}

impl From<ProtocolError> for RegistryError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol {
            reason: e.to_string(),
        }
    }
}
