//! # peercall-client-core
//!
//! Call session management: the endpoint side of the peercall stack.
//!
//! A [`CallSessionManager`] registers with the signaling registry, holds at
//! most one call session at a time, and walks it through a strict lifecycle:
//!
//! ```text
//! Idle -> Requesting -> Negotiating -> Active -> Closed     (outgoing)
//! Idle -> Ringing    -> Negotiating -> Active -> Closed     (incoming)
//! ```
//!
//! `Closed` is reachable from every state and terminal. Local media is
//! acquired before a call leaves `Idle` and released exactly once when the
//! session closes, no matter which teardown path ran. Exactly one media
//! negotiation runs per call, bounded by a configurable deadline.
//!
//! Actual capture and transport sit behind the [`MediaEngine`] trait; call
//! decisions and lifecycle observation go through a [`CallHandler`]. The
//! optional expression bridge samples an [`ExpressionSource`] during active
//! calls and feeds matches into the call's side channel.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use peercall_client_core::{
//!     CallSessionManager, ClientConfig, MediaEngine, PeerId,
//! };
//!
//! # async fn demo(engine: Arc<dyn MediaEngine>) -> peercall_client_core::ClientResult<()> {
//! let manager = CallSessionManager::builder(
//!     ClientConfig::new("ws://localhost:9000/channel"),
//! )
//! .with_media_engine(engine)
//! .connect()
//! .await?;
//!
//! let call_id = manager.start_call(&PeerId::from("some-peer")).await?;
//! println!("dialing, call {}", call_id);
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod expression;
pub mod media;
pub mod session;
pub mod signal;
pub mod state;

pub use call::{CallDirection, CallId, CallInfo};
pub use config::{ClientConfig, ExpressionConfig};
pub use connection::{LinkEvent, SignalingLink};
pub use error::{ClientError, ClientResult};
pub use events::{
    AutoAcceptHandler, CallDecision, CallHandler, CallStatusInfo, IncomingCallInfo,
};
pub use expression::{ExpressionBridge, ExpressionLabel, ExpressionSample, ExpressionSource};
pub use media::{
    EstablishedMedia, LocalMedia, MediaConstraints, MediaEngine, RemoteMedia, SignalChannel,
};
pub use session::{CallSessionManager, SessionManagerBuilder};
pub use signal::CallSignal;
pub use state::{AtomicCallState, CallState};

// Re-exported so endpoint users do not need a direct signal-core dependency.
pub use peercall_signal_core::PeerId;

/// Current version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
