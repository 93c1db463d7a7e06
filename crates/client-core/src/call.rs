//! Call identity and metadata.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use peercall_signal_core::PeerId;

use crate::state::CallState;

/// Unique identifier for a call session.
pub type CallId = Uuid;

/// Which side initiated the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallDirection {
    /// We dialed.
    Outgoing,
    /// The remote dialed us.
    Incoming,
}

impl std::fmt::Display for CallDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outgoing => write!(f, "outgoing"),
            Self::Incoming => write!(f, "incoming"),
        }
    }
}

/// Snapshot of a call session's metadata.
///
/// Returned by [`CallSessionManager::current_call`], including after the
/// session has closed, so callers can inspect how a finished call ended.
///
/// [`CallSessionManager::current_call`]: crate::session::CallSessionManager::current_call
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// Unique call identifier, shared by both sides.
    pub call_id: CallId,
    /// State at the time of the snapshot.
    pub state: CallState,
    /// Who initiated.
    pub direction: CallDirection,
    /// Our registry identity.
    pub local_peer_id: PeerId,
    /// The other party's registry identity.
    pub remote_peer_id: PeerId,
    /// When the session was created locally.
    pub created_at: DateTime<Utc>,
    /// When media started flowing, if it ever did.
    pub connected_at: Option<DateTime<Utc>>,
    /// When the session closed, if it has.
    pub ended_at: Option<DateTime<Utc>>,
    /// Why the session closed, if it has.
    pub close_reason: Option<String>,
}

impl CallInfo {
    /// How long media has been (or was) flowing. `None` before connection.
    pub fn connected_duration(&self) -> Option<chrono::Duration> {
        let connected = self.connected_at?;
        let end = self.ended_at.unwrap_or_else(Utc::now);
        Some(end - connected)
    }
}
