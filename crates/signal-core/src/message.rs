//! Control-channel method names and typed parameter payloads.
//!
//! The registry dispatches on [`methods`] names; the structs here are the
//! typed views of each method's `params` / `result` values. Field names are
//! camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::peer::PeerId;

/// Method names understood on the control channel.
pub mod methods {
    /// Allocate a PeerIdentity for this connection (client to registry).
    pub const REGISTER: &str = "registry.register";
    /// Relay an opaque payload to another peer (client to registry).
    pub const RELAY: &str = "registry.relay";
    /// Deliver a relayed payload (registry to client, notification).
    pub const DELIVER: &str = "registry.deliver";
}

/// Result body of `registry.register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResult {
    /// The identity allocated to this connection.
    pub peer_id: PeerId,
}

/// Parameters of `registry.relay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayParams {
    /// Target identity. The sender is stamped by the registry on delivery,
    /// so there is no `from` here; clients cannot spoof the source.
    pub to: PeerId,
    /// Opaque negotiation payload; never inspected by the registry.
    pub payload: Value,
}

/// Parameters of `registry.deliver`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverParams {
    /// The registered identity the payload came from.
    pub from: PeerId,
    /// Opaque payload exactly as supplied by the sender.
    pub payload: Value,
}
