//! Live peer registry: the identity-to-channel mapping.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use peercall_signal_core::message::{methods, DeliverParams};
use peercall_signal_core::rpc::RpcRequest;
use peercall_signal_core::PeerId;

use crate::error::{RegistryError, Result};
use crate::events::{DisconnectReason, RegistryEvent};

/// Capacity of the observability event channel. Slow subscribers lag and
/// lose events rather than backpressuring the registry.
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// One registered peer's live entry.
#[derive(Debug, Clone)]
pub struct RegisteredPeer {
    /// Identity allocated to the connection.
    pub peer_id: PeerId,
    /// Outbound frame queue of the owning connection task.
    pub sender: mpsc::Sender<String>,
    /// When registration completed.
    pub registered_at: DateTime<Utc>,
    /// Remote socket address, for logs.
    pub remote_addr: SocketAddr,
}

/// Concurrent mapping from PeerIdentity to live control channels.
///
/// Insert, remove and lookup are safe to call from any task. Relays to
/// different peers never contend beyond the map itself.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    peers: Arc<DashMap<PeerId, RegisteredPeer>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            peers: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Allocate a collision-free identity and bind it to `sender`.
    ///
    /// The returned identity stays valid until [`unregister`](Self::unregister)
    /// and is never handed out again while this registration lives.
    pub fn register(&self, sender: mpsc::Sender<String>, remote_addr: SocketAddr) -> PeerId {
        // v4 tokens do not collide in practice; loop anyway so the
        // uniqueness invariant never rests on the generator alone.
        let mut peer_id = PeerId::generate();
        while self.peers.contains_key(&peer_id) {
            peer_id = PeerId::generate();
        }

        let now = Utc::now();
        self.peers.insert(
            peer_id.clone(),
            RegisteredPeer {
                peer_id: peer_id.clone(),
                sender,
                registered_at: now,
                remote_addr,
            },
        );

        info!("Registered peer {} from {}", peer_id, remote_addr);
        let _ = self.events.send(RegistryEvent::PeerRegistered {
            peer_id: peer_id.clone(),
            registered_at: now,
        });
        peer_id
    }

    /// Remove a registration immediately.
    ///
    /// Returns `false` when the identity was not present. Emits a
    /// `PeerDisconnected` observability event on successful removal.
    pub fn unregister(&self, peer_id: &PeerId, reason: DisconnectReason) -> bool {
        match self.peers.remove(peer_id) {
            Some(_) => {
                info!("Unregistered peer {} ({})", peer_id, reason);
                let _ = self.events.send(RegistryEvent::PeerDisconnected {
                    peer_id: peer_id.clone(),
                    reason,
                    disconnected_at: Utc::now(),
                });
                true
            }
            None => false,
        }
    }

    /// Relay an opaque payload from `from` to `to`.
    ///
    /// The payload is forwarded untouched inside a `registry.deliver`
    /// notification with `from` stamped by this side, so receivers can trust
    /// the source field. Fails with [`RegistryError::UnknownPeer`] when `to`
    /// has no live registration.
    pub async fn relay(&self, from: &PeerId, to: &PeerId, payload: Value) -> Result<()> {
        let sender = match self.peers.get(to) {
            Some(entry) => entry.sender.clone(),
            None => {
                debug!("Relay from {} to unknown peer {}", from, to);
                return Err(RegistryError::unknown_peer(to.clone()));
            }
        };

        let note = RpcRequest::notification(
            methods::DELIVER,
            serde_json::to_value(DeliverParams {
                from: from.clone(),
                payload,
            })?,
        );
        let frame = note.to_json()?;

        if sender.send(frame).await.is_err() {
            warn!("Control channel to {} closed during relay", to);
            return Err(RegistryError::ChannelClosed { peer: to.clone() });
        }
        debug!("Relayed payload from {} to {}", from, to);
        Ok(())
    }

    /// True when the identity currently maps to a live channel.
    pub fn is_registered(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Number of live registrations.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Snapshot of currently registered identities.
    pub fn list_peers(&self) -> Vec<PeerId> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Subscribe to observability events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
