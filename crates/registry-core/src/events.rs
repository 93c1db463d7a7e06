//! Registry observability events.
//!
//! Emitted on an in-process broadcast channel for monitoring and logging.
//! Nothing here travels to peers over the wire: when a peer disconnects, its
//! former counterpart learns about it through its own channel, not from the
//! registry.

use std::fmt;

use chrono::{DateTime, Utc};
use peercall_signal_core::PeerId;
use serde::{Deserialize, Serialize};

/// Events emitted by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// A control channel completed registration.
    PeerRegistered {
        peer_id: PeerId,
        registered_at: DateTime<Utc>,
    },

    /// A registration was removed. Removal happens the moment the channel
    /// is lost; there is no grace period.
    PeerDisconnected {
        peer_id: PeerId,
        reason: DisconnectReason,
        disconnected_at: DateTime<Utc>,
    },
}

impl RegistryEvent {
    /// Stable name for log and metric labels.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PeerRegistered { .. } => "peer_registered",
            Self::PeerDisconnected { .. } => "peer_disconnected",
        }
    }

    /// The peer the event concerns.
    pub fn peer_id(&self) -> &PeerId {
        match self {
            Self::PeerRegistered { peer_id, .. } => peer_id,
            Self::PeerDisconnected { peer_id, .. } => peer_id,
        }
    }
}

/// Why a registration went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The client sent a close frame.
    ClientClosed,
    /// The socket failed or dropped without a close frame.
    ChannelLost,
    /// The connection was dropped after a protocol violation.
    ProtocolError,
}

impl DisconnectReason {
    /// Short label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::ChannelLost => "channel_lost",
            Self::ProtocolError => "protocol_error",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
