//! Media engine abstraction.
//!
//! The session manager owns call lifecycle and signaling; everything that
//! touches actual capture, transport negotiation, and playback sits behind
//! [`MediaEngine`]. This keeps the manager testable with an in-process engine
//! and leaves the real transport choice to the embedding application.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::call::CallDirection;
use crate::error::ClientResult;

/// Which local tracks to acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Handle to acquired local capture.
///
/// Tracks its own release so the session manager can guarantee the underlying
/// devices are given back exactly once no matter how many teardown paths race.
#[derive(Debug)]
pub struct LocalMedia {
    id: Uuid,
    constraints: MediaConstraints,
    released: AtomicBool,
}

impl LocalMedia {
    /// Creates a handle for freshly acquired capture.
    pub fn new(constraints: MediaConstraints) -> Self {
        Self {
            id: Uuid::new_v4(),
            constraints,
            released: AtomicBool::new(false),
        }
    }

    /// Identifier of this capture handle.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The constraints this capture was acquired with.
    pub fn constraints(&self) -> MediaConstraints {
        self.constraints
    }

    /// Marks the capture released. Returns `true` exactly once; later calls
    /// return `false` so racing teardown paths cannot double-release.
    pub fn release(&self) -> bool {
        !self.released.swap(true, Ordering::SeqCst)
    }

    /// Whether the capture has been released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Descriptor of the remote party's media as negotiated.
#[derive(Debug, Clone)]
pub struct RemoteMedia {
    pub id: Uuid,
    pub constraints: MediaConstraints,
}

/// The product of a successful negotiation.
///
/// Besides the remote media descriptor it carries the data side channel:
/// `outbound_text` feeds text to the remote party over the peer-to-peer
/// link and `inbound_text` yields what the remote party sends us.
#[derive(Debug)]
pub struct EstablishedMedia {
    pub remote: RemoteMedia,
    pub outbound_text: mpsc::Sender<String>,
    pub inbound_text: mpsc::Receiver<String>,
}

/// Signaling conduit handed to the engine for the duration of one negotiation.
///
/// `outbound` payloads are relayed to the remote peer; `inbound` yields the
/// remote peer's payloads, including any that arrived before negotiation
/// started on this side. The engine owns the conduit only until
/// [`MediaEngine::negotiate`] returns; payloads have no meaning afterwards.
#[derive(Debug)]
pub struct SignalChannel {
    pub outbound: mpsc::Sender<Value>,
    pub inbound: mpsc::Receiver<Value>,
}

/// Pluggable media stack.
///
/// Implementations do the actual capture and transport work. The session
/// manager calls `acquire_local` before a call leaves `Idle`, `negotiate`
/// exactly once per call, and `release_local` exactly once per acquired
/// capture.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Acquires local capture matching the constraints.
    ///
    /// # Errors
    /// [`ClientError::MediaUnavailable`] when the devices cannot be opened.
    /// The failure is fatal to the call attempt that requested it.
    ///
    /// [`ClientError::MediaUnavailable`]: crate::error::ClientError::MediaUnavailable
    async fn acquire_local(&self, constraints: &MediaConstraints) -> ClientResult<LocalMedia>;

    /// Runs one media negotiation to completion.
    ///
    /// The initiator (the `Outgoing` side) is expected to send the first
    /// payload on `signals.outbound`. Returns once media is flowing
    /// peer-to-peer. Cancellation-safe: the caller may drop this future at
    /// any point (deadline, hangup) and then call `release_local`.
    async fn negotiate(
        &self,
        direction: CallDirection,
        local: &LocalMedia,
        signals: SignalChannel,
    ) -> ClientResult<EstablishedMedia>;

    /// Gives back local capture.
    async fn release_local(&self, local: &LocalMedia) -> ClientResult<()>;
}
