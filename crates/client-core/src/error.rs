//! Error types for call session management.

use std::time::Duration;

use thiserror::Error;

use peercall_signal_core::{PeerId, ProtocolError};

use crate::call::CallId;

/// Result type for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the call session manager.
///
/// Recoverability matters more than the variant itself: a failed registration
/// ends the whole attempt and the user starts over, while an unknown peer
/// only ends the dial attempt and different input may succeed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Registration with the signaling registry failed. Fatal: nothing else
    /// works without an identity.
    #[error("Registration failed: {reason}")]
    Registration { reason: String },

    /// The addressed peer is not currently registered.
    #[error("Peer not currently registered: {peer}")]
    UnknownPeer { peer: PeerId },

    /// Local capture could not be acquired. Fatal to the call attempt.
    #[error("Local media unavailable: {reason}")]
    MediaUnavailable { reason: String },

    /// Media negotiation did not complete inside the bounded wait.
    #[error("Negotiation timed out after {seconds}s")]
    NegotiationTimeout { seconds: u64 },

    /// No session matches the given call id.
    #[error("Call not found: {call_id}")]
    CallNotFound { call_id: CallId },

    /// The operation is not legal in the session's current state.
    #[error("Invalid call state: {reason}")]
    InvalidState { reason: String },

    /// The control channel to the registry failed.
    #[error("Connection error: {reason}")]
    Connection { reason: String },

    /// A frame or payload did not decode as expected.
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    /// Bug-shaped condition inside the manager itself.
    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl ClientError {
    /// Registration failure.
    pub fn registration(reason: impl Into<String>) -> Self {
        Self::Registration {
            reason: reason.into(),
        }
    }

    /// Local media failure.
    pub fn media_unavailable(reason: impl Into<String>) -> Self {
        Self::MediaUnavailable {
            reason: reason.into(),
        }
    }

    /// Negotiation deadline expired.
    pub fn negotiation_timeout(waited: Duration) -> Self {
        Self::NegotiationTimeout {
            seconds: waited.as_secs(),
        }
    }

    /// The operation does not fit the current state.
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Control-channel failure.
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    /// Malformed frame or payload.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Internal invariant violation.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// True when retrying with different input can reasonably succeed.
    ///
    /// `UnknownPeer` is the canonical case: the callee may simply register a
    /// moment later. Fatal errors mean the surrounding attempt is dead.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownPeer { .. } | Self::CallNotFound { .. } | Self::InvalidState { .. }
        )
    }

    /// Coarse category for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Registration { .. } => "registration",
            Self::UnknownPeer { .. } => "signaling",
            Self::MediaUnavailable { .. } | Self::NegotiationTimeout { .. } => "media",
            Self::CallNotFound { .. } | Self::InvalidState { .. } => "call",
            Self::Connection { .. } => "connection",
            Self::Protocol { .. } => "protocol",
            Self::Internal { .. } => "internal",
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol {
            reason: e.to_string(),
        }
    }
}
