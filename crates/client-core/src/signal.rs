//! Call-control signals carried inside relay payloads.
//!
//! The registry never inspects these: to it they are opaque JSON handed from
//! one peer to another. Both endpoints must agree on this vocabulary, which is
//! why it lives here rather than in the shared wire crate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::call::CallId;
use crate::error::ClientResult;

/// A call-control signal exchanged between two endpoints through the registry.
///
/// Every variant carries the call id so an endpoint can discard signals for
/// calls it no longer has.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CallSignal {
    /// Ask the remote peer to take a call.
    #[serde(rename_all = "camelCase")]
    Invite { call_id: CallId },

    /// Decline an invite, or abandon a call that never connected.
    #[serde(rename_all = "camelCase")]
    Reject {
        call_id: CallId,
        /// Optional human-readable reason ("busy", "media unavailable", ...).
        reason: Option<String>,
    },

    /// One step of the media negotiation. The body is owned by the media
    /// engine and is not interpreted here.
    #[serde(rename_all = "camelCase")]
    Negotiate { call_id: CallId, body: Value },

    /// Tear down an established or establishing call.
    #[serde(rename_all = "camelCase")]
    Hangup { call_id: CallId },
}

impl CallSignal {
    /// The call this signal belongs to.
    pub fn call_id(&self) -> CallId {
        match self {
            Self::Invite { call_id }
            | Self::Reject { call_id, .. }
            | Self::Negotiate { call_id, .. }
            | Self::Hangup { call_id } => *call_id,
        }
    }

    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invite { .. } => "invite",
            Self::Reject { .. } => "reject",
            Self::Negotiate { .. } => "negotiate",
            Self::Hangup { .. } => "hangup",
        }
    }

    /// Serializes the signal into a relay payload.
    pub fn to_value(&self) -> ClientResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parses a relay payload into a signal.
    pub fn from_value(value: Value) -> ClientResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}
