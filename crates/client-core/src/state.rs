use std::sync::atomic::{AtomicU8, Ordering};

use crate::call::CallDirection;

/// Represents the lifecycle state of a call session.
///
/// The state determines which operations are legal on the session and how it
/// reacts to incoming call signals. Outgoing and incoming calls follow
/// different paths through the machine but share the same terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    /// No call in progress. Sessions are born here; a finished call parks in
    /// `Closed` rather than returning to `Idle`, and the next call starts a
    /// fresh session.
    Idle,

    /// **Outgoing calls only:**
    /// The invite has been handed to the registry but the relay has not yet
    /// been acknowledged. Media is already acquired at this point.
    Requesting,

    /// **Incoming calls only:**
    /// An invite arrived and the handler was notified; we have not yet
    /// committed local media to the call.
    Ringing,

    /// **Both directions:**
    /// Exactly one media negotiation is in flight. Negotiation payloads are
    /// being exchanged through the registry until media flows or the bounded
    /// wait expires.
    Negotiating,

    /// **Both directions:**
    /// Media is flowing peer-to-peer. The side channel is usable and the
    /// expression bridge (if configured) is sampling.
    Active,

    /// **Both directions:**
    /// The session has ended and all its resources are released. Terminal:
    /// no transition leaves this state.
    Closed,
}

impl CallState {
    /// Checks whether the session has reached its terminal state.
    pub fn is_closed(&self) -> bool {
        *self == CallState::Closed
    }
}

/// Numeric representation of call states for atomic operations.
/// This internal enum allows `CallState` to be stored and manipulated
/// as a `u8` in `AtomicCallState`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StateValue {
    Idle = 0,
    Requesting = 1,
    Ringing = 2,
    Negotiating = 3,
    Active = 4,
    Closed = 5,
}

impl From<CallState> for StateValue {
    fn from(state: CallState) -> Self {
        match state {
            CallState::Idle => StateValue::Idle,
            CallState::Requesting => StateValue::Requesting,
            CallState::Ringing => StateValue::Ringing,
            CallState::Negotiating => StateValue::Negotiating,
            CallState::Active => StateValue::Active,
            CallState::Closed => StateValue::Closed,
        }
    }
}

impl From<StateValue> for CallState {
    fn from(value: StateValue) -> Self {
        match value {
            StateValue::Idle => CallState::Idle,
            StateValue::Requesting => CallState::Requesting,
            StateValue::Ringing => CallState::Ringing,
            StateValue::Negotiating => CallState::Negotiating,
            StateValue::Active => CallState::Active,
            StateValue::Closed => CallState::Closed,
        }
    }
}

impl From<u8> for StateValue {
    fn from(value: u8) -> Self {
        match value {
            0 => StateValue::Idle,
            1 => StateValue::Requesting,
            2 => StateValue::Ringing,
            3 => StateValue::Negotiating,
            4 => StateValue::Active,
            5 => StateValue::Closed,
            _ => StateValue::Closed, // Default to closed for unknown values
        }
    }
}

/// Provides thread-safe, atomic management of a `CallState`.
///
/// The session state is read and written by several tasks at once: the public
/// API methods, the signaling event loop, and the negotiation task. Wrapping
/// the state in an `AtomicU8` keeps those readers and writers coherent without
/// taking a lock on the hot path.
#[derive(Debug)]
pub struct AtomicCallState {
    value: AtomicU8,
}

impl AtomicCallState {
    /// Creates a new `AtomicCallState` initialized to the given `state`.
    pub fn new(state: CallState) -> Self {
        Self {
            value: AtomicU8::new(StateValue::from(state) as u8),
        }
    }

    /// Atomically loads and returns the current `CallState`.
    /// Uses `Ordering::Acquire` so writes released by other tasks are visible.
    pub fn get(&self) -> CallState {
        let value = self.value.load(Ordering::Acquire);
        CallState::from(StateValue::from(value))
    }

    /// Atomically sets the current state to `new_state` and returns the
    /// previous state. Uses `Ordering::AcqRel` to synchronize both the read
    /// and the write with other tasks.
    pub fn set(&self, new_state: CallState) -> CallState {
        let prev_value = self
            .value
            .swap(StateValue::from(new_state) as u8, Ordering::AcqRel);
        CallState::from(StateValue::from(prev_value))
    }

    /// Atomically transitions the state from `current_state` to `new_state`
    /// if the current state matches `current_state`.
    ///
    /// This is a compare-and-swap operation.
    ///
    /// # Behavior
    /// - If the actual state equals `current_state`, it becomes `new_state`
    ///   and `true` is returned.
    /// - If the actual state is already `new_state`, `true` is returned
    ///   (idempotent success).
    /// - If `new_state` is `CallState::Closed`, the store happens
    ///   unconditionally and `true` is returned: a session can always be
    ///   closed.
    /// - Otherwise the state is left unchanged and `false` is returned.
    pub fn transition_if(&self, current_state: CallState, new_state: CallState) -> bool {
        let current_value = StateValue::from(current_state) as u8;
        let new_value = StateValue::from(new_state) as u8;

        match self.value.compare_exchange(
            current_value,
            new_value,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(actual_loaded_value) => {
                if actual_loaded_value == new_value {
                    // Already where we wanted to be.
                    true
                } else if new_state == CallState::Closed {
                    // Closing must never lose a race.
                    self.value.store(new_value, Ordering::Release);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Validates whether a transition from `current_state` to `new_state` is
    /// legal for a call of the given direction.
    ///
    /// Returns `Ok(())` when the transition is part of the lifecycle, or
    /// `Err(String)` describing the violation.
    pub fn validate_transition(
        direction: CallDirection,
        current_state: CallState,
        new_state: CallState,
    ) -> std::result::Result<(), String> {
        if current_state == new_state {
            // Same-state transitions are no-ops, always allowed
            return Ok(());
        }

        // Closing is allowed from every state for both directions
        if new_state == CallState::Closed {
            return Ok(());
        }

        match direction {
            CallDirection::Outgoing => {
                match current_state {
                    CallState::Idle => {
                        // Dialing moves straight to Requesting
                        if new_state == CallState::Requesting {
                            return Ok(());
                        }
                    }
                    CallState::Requesting => {
                        // The relay acknowledgement admits the call into negotiation
                        if new_state == CallState::Negotiating {
                            return Ok(());
                        }
                    }
                    CallState::Negotiating => {
                        if new_state == CallState::Active {
                            return Ok(());
                        }
                    }
                    CallState::Active => {
                        // Active only ever closes, handled above
                    }
                    CallState::Closed => {
                        return Err("Cannot transition out of Closed state".to_string());
                    }
                    // Ringing does not occur on the outgoing path
                    _ => {}
                }
            }
            CallDirection::Incoming => {
                match current_state {
                    CallState::Idle => {
                        // An invite rings; an accept-before-ring from a deferred
                        // handler goes straight to Negotiating
                        match new_state {
                            CallState::Ringing | CallState::Negotiating => return Ok(()),
                            _ => {}
                        }
                    }
                    CallState::Ringing => {
                        // Accepting commits media and enters negotiation
                        if new_state == CallState::Negotiating {
                            return Ok(());
                        }
                    }
                    CallState::Negotiating => {
                        if new_state == CallState::Active {
                            return Ok(());
                        }
                    }
                    CallState::Active => {
                        // Active only ever closes, handled above
                    }
                    CallState::Closed => {
                        return Err("Cannot transition out of Closed state".to_string());
                    }
                    // Requesting does not occur on the incoming path
                    _ => {}
                }
            }
        }

        Err(format!(
            "Invalid transition for {:?} call: {:?} -> {:?}",
            direction, current_state, new_state
        ))
    }
}
