//! # peercall
//!
//! Umbrella crate for the peercall stack: a signaling registry, call session
//! management, and the expression-to-side-channel bridge, re-exported under
//! one roof.
//!
//! - [`signal_core`] - wire-level types shared by both sides: peer
//!   identities, JSON-RPC framing, method names
//! - [`registry_core`] - the signaling registry server: identity allocation
//!   and addressed payload relay over WebSocket, plus the HTTP helpers
//! - [`client_core`] - the endpoint: call lifecycle, media engine seam,
//!   side channel, and the expression bridge
//!
//! Most applications embed either the registry or an endpoint, not both;
//! depend on the matching member crate directly if the other half is dead
//! weight. This crate exists for demos and tests that run the whole stack
//! in one process.

pub use peercall_client_core as client_core;
pub use peercall_registry_core as registry_core;
pub use peercall_signal_core as signal_core;

/// The commonly used surface of the whole stack in one import.
pub mod prelude {
    pub use crate::client_core::{
        AutoAcceptHandler, CallDecision, CallDirection, CallHandler, CallId, CallInfo,
        CallSessionManager, CallState, CallStatusInfo, ClientConfig, ClientError, ClientResult,
        EstablishedMedia, ExpressionConfig, ExpressionLabel, ExpressionSample, ExpressionSource,
        IncomingCallInfo, LocalMedia, MediaConstraints, MediaEngine, RemoteMedia,
        SessionManagerBuilder, SignalChannel,
    };
    pub use crate::registry_core::{
        RegistryConfig, RegistryEvent, ServerHandle, SignalingServer,
    };
    pub use crate::signal_core::PeerId;
}

/// Current version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
