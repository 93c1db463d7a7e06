//! Call event handling.
//!
//! The session manager pushes lifecycle events to an application-provided
//! [`CallHandler`]. The handler decides what to do with an incoming call and
//! observes state changes, side-channel traffic, and failures.
//!
//! # Usage
//!
//! ```rust
//! use async_trait::async_trait;
//! use peercall_client_core::events::{CallDecision, CallHandler, IncomingCallInfo};
//!
//! struct MyHandler;
//!
//! #[async_trait]
//! impl CallHandler for MyHandler {
//!     async fn on_incoming_call(&self, info: IncomingCallInfo) -> CallDecision {
//!         println!("Incoming call from {}", info.from);
//!         CallDecision::Accept
//!     }
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use peercall_signal_core::PeerId;

use crate::call::CallId;
use crate::error::ClientError;
use crate::state::CallState;

/// What to do with an incoming call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallDecision {
    /// Accept the call: acquire media and start negotiating.
    Accept,
    /// Decline the call with an optional reason for the caller.
    Reject { reason: Option<String> },
    /// Leave the call ringing; the application will accept or reject it
    /// later through the session manager.
    Defer,
}

/// Information about a new incoming call.
#[derive(Debug, Clone)]
pub struct IncomingCallInfo {
    /// Identifier of the call, shared with the caller.
    pub call_id: CallId,
    /// The caller's registry identity.
    pub from: PeerId,
    /// When the invite arrived.
    pub received_at: DateTime<Utc>,
}

/// Information about a call state change.
#[derive(Debug, Clone)]
pub struct CallStatusInfo {
    /// The call that changed.
    pub call_id: CallId,
    /// The state it is in now.
    pub new_state: CallState,
    /// The state it was in before, when known.
    pub previous_state: Option<CallState>,
    /// Why the change happened, when there is more to say than the states
    /// themselves ("rejected by remote", "negotiation timed out", ...).
    pub reason: Option<String>,
    /// When the change happened.
    pub timestamp: DateTime<Utc>,
}

/// Application-side observer of call lifecycle events.
///
/// Only [`on_incoming_call`] requires an implementation; the rest default to
/// doing nothing. All methods are invoked from spawned tasks, never while the
/// session manager holds internal locks, so implementations may freely call
/// back into the manager.
///
/// [`on_incoming_call`]: CallHandler::on_incoming_call
#[async_trait]
pub trait CallHandler: Send + Sync {
    /// Called when an invite arrives. The returned decision drives the
    /// session: `Accept` commits media, `Reject` answers the caller,
    /// `Defer` leaves the session ringing.
    async fn on_incoming_call(&self, info: IncomingCallInfo) -> CallDecision;

    /// Called on every session state change, including the final `Closed`.
    async fn on_call_state_changed(&self, _status: CallStatusInfo) {}

    /// Called for each side-channel message received while a call is active.
    async fn on_side_channel_message(&self, _call_id: CallId, _message: String) {}

    /// Called when a background failure ends or degrades a call. `call_id`
    /// is `None` for failures not tied to a session.
    async fn on_error(&self, _error: ClientError, _call_id: Option<CallId>) {}
}

/// Handler that accepts every incoming call.
///
/// The default when no handler is configured. Useful for demos and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoAcceptHandler;

#[async_trait]
impl CallHandler for AutoAcceptHandler {
    async fn on_incoming_call(&self, info: IncomingCallInfo) -> CallDecision {
        info!("Auto-accepting call {} from {}", info.call_id, info.from);
        CallDecision::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingHandler {
        decision: CallDecision,
    }

    #[async_trait]
    impl CallHandler for RecordingHandler {
        async fn on_incoming_call(&self, _info: IncomingCallInfo) -> CallDecision {
            self.decision.clone()
        }
    }

    #[tokio::test]
    async fn test_default_methods_are_callable() {
        let handler = RecordingHandler {
            decision: CallDecision::Defer,
        };
        let call_id = CallId::new_v4();

        let decision = handler
            .on_incoming_call(IncomingCallInfo {
                call_id,
                from: PeerId::from("alice"),
                received_at: Utc::now(),
            })
            .await;
        assert_eq!(decision, CallDecision::Defer);

        // Defaulted methods are no-ops but must be invocable through the trait
        handler
            .on_call_state_changed(CallStatusInfo {
                call_id,
                new_state: CallState::Ringing,
                previous_state: Some(CallState::Idle),
                reason: None,
                timestamp: Utc::now(),
            })
            .await;
        handler
            .on_side_channel_message(call_id, "hello".to_string())
            .await;
        handler
            .on_error(ClientError::internal("test"), Some(call_id))
            .await;
    }

    #[tokio::test]
    async fn test_auto_accept() {
        let decision = AutoAcceptHandler
            .on_incoming_call(IncomingCallInfo {
                call_id: CallId::new_v4(),
                from: PeerId::from("bob"),
                received_at: Utc::now(),
            })
            .await;
        assert_eq!(decision, CallDecision::Accept);
    }
}
