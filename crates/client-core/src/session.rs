//! Call session management.
//!
//! [`CallSessionManager`] owns at most one call session at a time and drives
//! it through its lifecycle: dialing, ringing, one bounded media negotiation,
//! the active call, and teardown. It glues together the signaling link, the
//! media engine, the application's [`CallHandler`], and the optional
//! expression bridge.
//!
//! Handler callbacks are never invoked while internal locks are held, so a
//! handler may freely call back into the manager (accept, reject, hang up).

use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use peercall_signal_core::PeerId;

use crate::call::{CallDirection, CallId, CallInfo};
use crate::config::ClientConfig;
use crate::connection::{LinkEvent, SignalingLink};
use crate::error::{ClientError, ClientResult};
use crate::events::{
    AutoAcceptHandler, CallDecision, CallHandler, CallStatusInfo, IncomingCallInfo,
};
use crate::expression::{ExpressionBridge, ExpressionSource};
use crate::media::{EstablishedMedia, LocalMedia, MediaEngine, SignalChannel};
use crate::signal::CallSignal;
use crate::state::{AtomicCallState, CallState};

/// Negotiation payloads buffered per direction. Covers an offer plus a
/// generous trickle of candidates arriving before the callee accepts.
const SIGNAL_CHANNEL_CAPACITY: usize = 64;

/// Builder for [`CallSessionManager`].
///
/// A media engine is mandatory; the handler defaults to
/// [`AutoAcceptHandler`] and the expression bridge stays off unless a source
/// is supplied.
pub struct SessionManagerBuilder {
    config: ClientConfig,
    media: Option<Arc<dyn MediaEngine>>,
    handler: Option<Arc<dyn CallHandler>>,
    expression_source: Option<Arc<dyn ExpressionSource>>,
}

impl SessionManagerBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            media: None,
            handler: None,
            expression_source: None,
        }
    }

    /// Sets the media engine. Required.
    pub fn with_media_engine(mut self, engine: Arc<dyn MediaEngine>) -> Self {
        self.media = Some(engine);
        self
    }

    /// Sets the application's call handler.
    pub fn with_handler(mut self, handler: Arc<dyn CallHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Enables the expression bridge, fed by the given source.
    pub fn with_expression_source(mut self, source: Arc<dyn ExpressionSource>) -> Self {
        self.expression_source = Some(source);
        self
    }

    /// Connects to the registry, registers, and starts the event loop.
    ///
    /// # Errors
    /// - [`ClientError::Internal`] when no media engine was supplied
    /// - [`ClientError::Connection`] when the registry is unreachable
    /// - [`ClientError::Registration`] when registration is refused
    pub async fn connect(self) -> ClientResult<CallSessionManager> {
        let media = self
            .media
            .ok_or_else(|| ClientError::internal("a media engine is required"))?;
        let handler = self
            .handler
            .unwrap_or_else(|| Arc::new(AutoAcceptHandler));

        let (link, events) = SignalingLink::connect(&self.config.registry_url).await?;
        let local_peer_id = link.register().await?;

        let inner = Arc::new(ManagerInner {
            config: self.config,
            link,
            media,
            handler,
            expression_source: self.expression_source,
            local_peer_id,
            session: Mutex::new(None),
            event_task: StdMutex::new(None),
        });

        let event_task = tokio::spawn(event_loop(Arc::clone(&inner), events));
        {
            let mut guard = match inner.event_task.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Some(event_task);
        }

        Ok(CallSessionManager { inner })
    }
}

/// Manages the lifecycle of calls for one registered endpoint.
///
/// Cheap to clone; all clones drive the same endpoint. At most one session
/// exists at a time and a finished session stays inspectable through
/// [`current_call`](Self::current_call) until the next call replaces it.
#[derive(Clone)]
pub struct CallSessionManager {
    inner: Arc<ManagerInner>,
}

impl CallSessionManager {
    /// Starts building a manager for the given configuration.
    pub fn builder(config: ClientConfig) -> SessionManagerBuilder {
        SessionManagerBuilder::new(config)
    }

    /// The identity the registry allocated to this endpoint.
    pub fn local_peer_id(&self) -> &PeerId {
        &self.inner.local_peer_id
    }

    /// Dials another peer.
    ///
    /// Local media is acquired before anything goes on the wire; the call
    /// only enters `Requesting` once capture is in hand. The returned id is
    /// shared with the callee through the invite.
    ///
    /// # Errors
    /// - [`ClientError::InvalidState`] when a call is already in progress
    /// - [`ClientError::MediaUnavailable`] when capture cannot be acquired;
    ///   the manager stays idle
    /// - [`ClientError::UnknownPeer`] when the callee is not registered; the
    ///   attempt is closed without ever negotiating
    pub async fn start_call(&self, to: &PeerId) -> ClientResult<CallId> {
        self.inner.start_call(to).await
    }

    /// Accepts a ringing incoming call.
    ///
    /// Media commits here: capture is acquired and negotiation starts. When
    /// capture fails, the caller is answered with a reject and the session
    /// closes.
    ///
    /// # Errors
    /// - [`ClientError::CallNotFound`] when no session matches `call_id`
    /// - [`ClientError::InvalidState`] outside `Idle`/`Ringing`
    /// - [`ClientError::MediaUnavailable`] when capture fails
    pub async fn accept_incoming(&self, call_id: CallId) -> ClientResult<()> {
        self.inner.accept_incoming(call_id).await
    }

    /// Declines a ringing incoming call.
    ///
    /// # Errors
    /// - [`ClientError::CallNotFound`] when no session matches `call_id`
    /// - [`ClientError::InvalidState`] outside `Idle`/`Ringing`
    pub async fn reject_incoming(&self, call_id: CallId, reason: Option<String>) -> ClientResult<()> {
        self.inner.reject_incoming(call_id, reason).await
    }

    /// Ends the current call, whatever state it is in. Idempotent: ending
    /// with no call, or a call that already closed, is a quiet no-op.
    ///
    /// Cancels a pending negotiation, releases local media exactly once, and
    /// tells the remote party on a best-effort basis.
    pub async fn end_call(&self) -> ClientResult<()> {
        self.inner.end_call().await
    }

    /// Sends a text message over the active call's side channel.
    ///
    /// Outside an active call the message is logged and dropped; this is
    /// never an error, so UI code can fire without checking state first.
    pub async fn send_side_channel(&self, message: impl Into<String>) -> ClientResult<()> {
        self.inner.send_side_channel(message.into()).await
    }

    /// Snapshot of the current (or most recently finished) session.
    pub async fn current_call(&self) -> Option<CallInfo> {
        self.inner.snapshot().await
    }

    /// The current session state, `Idle` when there is none.
    pub async fn call_state(&self) -> CallState {
        self.inner.call_state().await
    }

    /// Ends any call, closes the registry link, and stops the event loop.
    pub async fn shutdown(&self) -> ClientResult<()> {
        self.inner.shutdown().await
    }
}

struct ManagerInner {
    config: ClientConfig,
    link: SignalingLink,
    media: Arc<dyn MediaEngine>,
    handler: Arc<dyn CallHandler>,
    expression_source: Option<Arc<dyn ExpressionSource>>,
    local_peer_id: PeerId,
    session: Mutex<Option<CallSession>>,
    event_task: StdMutex<Option<JoinHandle<()>>>,
}

/// One call, from creation to close. Lives in the manager's single slot.
struct CallSession {
    call_id: CallId,
    direction: CallDirection,
    remote: PeerId,
    state: Arc<AtomicCallState>,
    local_media: Option<Arc<LocalMedia>>,
    /// Feeds remote negotiation payloads to the media engine. Payloads that
    /// arrive before negotiation starts wait in the channel.
    inbound_signals: mpsc::Sender<Value>,
    /// The engine's end of `inbound_signals`, taken when negotiation starts.
    pending_inbound: Option<mpsc::Receiver<Value>>,
    negotiation: Option<NegotiationHandles>,
    side_channel: Option<mpsc::Sender<String>>,
    inbound_text_task: Option<JoinHandle<()>>,
    bridge: Option<ExpressionBridge>,
    created_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    close_reason: Option<String>,
}

struct NegotiationHandles {
    negotiate_task: JoinHandle<()>,
    outbound_task: JoinHandle<()>,
}

impl CallSession {
    fn new(call_id: CallId, direction: CallDirection, remote: PeerId) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        Self {
            call_id,
            direction,
            remote,
            state: Arc::new(AtomicCallState::new(CallState::Idle)),
            local_media: None,
            inbound_signals: inbound_tx,
            pending_inbound: Some(inbound_rx),
            negotiation: None,
            side_channel: None,
            inbound_text_task: None,
            bridge: None,
            created_at: Utc::now(),
            connected_at: None,
            ended_at: None,
            close_reason: None,
        }
    }

    fn info(&self, local_peer_id: &PeerId) -> CallInfo {
        CallInfo {
            call_id: self.call_id,
            state: self.state.get(),
            direction: self.direction,
            local_peer_id: local_peer_id.clone(),
            remote_peer_id: self.remote.clone(),
            created_at: self.created_at,
            connected_at: self.connected_at,
            ended_at: self.ended_at,
            close_reason: self.close_reason.clone(),
        }
    }
}

impl ManagerInner {
    async fn start_call(self: &Arc<Self>, to: &PeerId) -> ClientResult<CallId> {
        let mut slot = self.session.lock().await;
        if let Some(existing) = slot.as_ref() {
            if !existing.state.get().is_closed() {
                return Err(ClientError::invalid_state(format!(
                    "a call is already in progress ({})",
                    existing.call_id
                )));
            }
        }

        let call_id = CallId::new_v4();
        let invite = CallSignal::Invite { call_id }.to_value()?;

        // Media comes first; without capture the call never leaves Idle
        let local = self.media.acquire_local(&self.config.media).await?;

        let mut session = CallSession::new(call_id, CallDirection::Outgoing, to.clone());
        session.local_media = Some(Arc::new(local));
        info!("Starting call {} to {}", call_id, to);
        self.transition(&session, CallState::Idle, CallState::Requesting, None);

        match self.link.relay(to, invite).await {
            Ok(()) => {
                // The registry accepted the relay towards a live peer; that
                // acknowledgement is what admits us into negotiation
                self.transition(&session, CallState::Requesting, CallState::Negotiating, None);
                self.start_negotiation(&mut session);
                *slot = Some(session);
                Ok(call_id)
            }
            Err(error) => {
                // The callee never saw the invite; close without negotiating
                // and keep the closed session around for inspection
                self.close_session(&mut session, error.to_string()).await;
                *slot = Some(session);
                Err(error)
            }
        }
    }

    async fn accept_incoming(self: &Arc<Self>, call_id: CallId) -> ClientResult<()> {
        let mut slot = self.session.lock().await;
        let session = slot
            .as_mut()
            .filter(|s| s.call_id == call_id)
            .ok_or(ClientError::CallNotFound { call_id })?;

        if session.direction != CallDirection::Incoming {
            return Err(ClientError::invalid_state("only incoming calls can be accepted"));
        }
        let state = session.state.get();
        if !matches!(state, CallState::Idle | CallState::Ringing) {
            return Err(ClientError::invalid_state(format!(
                "cannot accept a call in state {:?}",
                state
            )));
        }

        // Media commits only on accept. Failure answers the caller so they
        // are not left ringing into the void.
        let local = match self.media.acquire_local(&self.config.media).await {
            Ok(local) => local,
            Err(error) => {
                let remote = session.remote.clone();
                self.close_session(session, "local media unavailable").await;
                drop(slot);
                self.send_reject(&remote, call_id, Some("media unavailable".to_string()))
                    .await;
                return Err(error);
            }
        };

        session.local_media = Some(Arc::new(local));
        info!("Accepting call {} from {}", call_id, session.remote);
        self.transition(session, state, CallState::Negotiating, None);
        self.start_negotiation(session);
        Ok(())
    }

    async fn reject_incoming(
        self: &Arc<Self>,
        call_id: CallId,
        reason: Option<String>,
    ) -> ClientResult<()> {
        let mut slot = self.session.lock().await;
        let session = slot
            .as_mut()
            .filter(|s| s.call_id == call_id)
            .ok_or(ClientError::CallNotFound { call_id })?;

        let state = session.state.get();
        if state.is_closed() {
            // The remote gave up first; nothing left to decline
            return Ok(());
        }
        if !matches!(state, CallState::Idle | CallState::Ringing) {
            return Err(ClientError::invalid_state(format!(
                "cannot reject a call in state {:?}",
                state
            )));
        }

        let remote = session.remote.clone();
        info!("Rejecting call {} from {}", call_id, remote);
        self.close_session(session, "rejected locally").await;
        drop(slot);
        self.send_reject(&remote, call_id, reason).await;
        Ok(())
    }

    async fn end_call(self: &Arc<Self>) -> ClientResult<()> {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut() else {
            return Ok(());
        };
        if session.state.get().is_closed() {
            return Ok(());
        }

        let call_id = session.call_id;
        let remote = session.remote.clone();
        self.close_session(session, "ended locally").await;
        drop(slot);

        // Best effort: the remote may already be gone
        if let Ok(payload) = (CallSignal::Hangup { call_id }).to_value() {
            if let Err(e) = self.link.relay(&remote, payload).await {
                debug!("Could not deliver hangup for {}: {}", call_id, e);
            }
        }
        Ok(())
    }

    async fn send_side_channel(&self, message: String) -> ClientResult<()> {
        let sender = {
            let slot = self.session.lock().await;
            match slot.as_ref() {
                Some(session) if session.state.get() == CallState::Active => {
                    session.side_channel.clone()
                }
                _ => None,
            }
        };

        match sender {
            Some(sender) => {
                if sender.send(message).await.is_err() {
                    debug!("Side channel is gone; message dropped");
                }
                Ok(())
            }
            None => {
                // Messages outside an active call are dropped, not errors:
                // senders fire without checking state first
                debug!("Dropping side-channel message outside an active call");
                Ok(())
            }
        }
    }

    async fn snapshot(&self) -> Option<CallInfo> {
        let slot = self.session.lock().await;
        slot.as_ref().map(|s| s.info(&self.local_peer_id))
    }

    async fn call_state(&self) -> CallState {
        let slot = self.session.lock().await;
        slot.as_ref()
            .map(|s| s.state.get())
            .unwrap_or(CallState::Idle)
    }

    async fn shutdown(self: &Arc<Self>) -> ClientResult<()> {
        self.end_call().await?;
        self.link.close();
        let task = {
            let mut guard = match self.event_task.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        if let Some(task) = task {
            task.abort();
        }
        Ok(())
    }

    /// Spawns the negotiation for a session that just entered `Negotiating`.
    /// Must be called with the session lock held; at most one negotiation
    /// ever runs for a session.
    fn start_negotiation(self: &Arc<Self>, session: &mut CallSession) {
        if session.negotiation.is_some() {
            warn!("Call {} is already negotiating", session.call_id);
            return;
        }
        let Some(inbound) = session.pending_inbound.take() else {
            warn!("Call {} has no inbound signal channel left", session.call_id);
            return;
        };
        let Some(local) = session.local_media.clone() else {
            warn!("Call {} entered negotiation without local media", session.call_id);
            return;
        };

        let call_id = session.call_id;
        let (engine_tx, mut engine_rx) = mpsc::channel::<Value>(SIGNAL_CHANNEL_CAPACITY);

        // Relay everything the engine emits to the remote peer
        let link = self.link.clone();
        let remote = session.remote.clone();
        let outbound_task = tokio::spawn(async move {
            while let Some(body) = engine_rx.recv().await {
                let payload = match (CallSignal::Negotiate { call_id, body }).to_value() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Call {}: unencodable negotiation payload: {}", call_id, e);
                        continue;
                    }
                };
                if let Err(e) = link.relay(&remote, payload).await {
                    warn!("Call {}: negotiation payload lost: {}", call_id, e);
                    break;
                }
            }
        });

        let signals = SignalChannel {
            outbound: engine_tx,
            inbound,
        };
        let engine = Arc::clone(&self.media);
        let direction = session.direction;
        let deadline = self.config.negotiation_timeout;
        let manager = Arc::clone(self);
        let negotiate_task = tokio::spawn(async move {
            match timeout(deadline, engine.negotiate(direction, &local, signals)).await {
                Ok(Ok(established)) => manager.complete_negotiation(call_id, established).await,
                Ok(Err(error)) => manager.fail_session(call_id, error).await,
                Err(_) => {
                    manager
                        .fail_session(call_id, ClientError::negotiation_timeout(deadline))
                        .await
                }
            }
        });

        session.negotiation = Some(NegotiationHandles {
            negotiate_task,
            outbound_task,
        });
    }

    /// Runs on the negotiation task after the engine succeeded.
    async fn complete_negotiation(self: &Arc<Self>, call_id: CallId, established: EstablishedMedia) {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut() else { return };
        if session.call_id != call_id {
            return;
        }

        // The negotiation is over either way. We are running on the
        // negotiate task itself: drop our own handle, stop only the pump.
        if let Some(handles) = session.negotiation.take() {
            handles.outbound_task.abort();
        }

        if session.state.get().is_closed() {
            // A hangup won the race; the established media dies here
            debug!("Call {} closed before negotiation finished", call_id);
            return;
        }

        if !self.transition(session, CallState::Negotiating, CallState::Active, None) {
            warn!("Call {} could not enter Active", call_id);
            return;
        }
        session.connected_at = Some(Utc::now());

        let EstablishedMedia {
            remote,
            outbound_text,
            mut inbound_text,
        } = established;
        info!("Call {} is active, remote media {}", call_id, remote.id);
        session.side_channel = Some(outbound_text.clone());

        // Deliver incoming side-channel text to the handler
        let handler = Arc::clone(&self.handler);
        session.inbound_text_task = Some(tokio::spawn(async move {
            while let Some(message) = inbound_text.recv().await {
                handler.on_side_channel_message(call_id, message).await;
            }
        }));

        if let Some(source) = self.expression_source.as_ref() {
            let bridge = ExpressionBridge::new(Arc::clone(source), self.config.expression.clone());
            bridge.start(outbound_text);
            session.bridge = Some(bridge);
        }
    }

    /// Runs on the negotiation task after the engine failed or timed out.
    async fn fail_session(self: &Arc<Self>, call_id: CallId, error: ClientError) {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut() else { return };
        if session.call_id != call_id || session.state.get().is_closed() {
            return;
        }

        // Same self-abort concern as in complete_negotiation: take the
        // handles before closing so close_session cannot cancel this task
        if let Some(handles) = session.negotiation.take() {
            handles.outbound_task.abort();
        }

        warn!("Call {} failed: {}", call_id, error);
        let handler = Arc::clone(&self.handler);
        let notified = error.clone();
        tokio::spawn(async move {
            handler.on_error(notified, Some(call_id)).await;
        });

        self.close_session(session, error.to_string()).await;
    }

    /// Moves a session to `Closed` and releases everything it holds. Safe to
    /// call from any state and any task except the session's own negotiation
    /// task; those paths go through `fail_session`/`complete_negotiation`.
    async fn close_session(self: &Arc<Self>, session: &mut CallSession, reason: impl Into<String>) {
        let reason = reason.into();
        let previous = session.state.set(CallState::Closed);
        if previous == CallState::Closed {
            return;
        }
        info!("Call {} closed: {}", session.call_id, reason);

        if let Some(handles) = session.negotiation.take() {
            handles.negotiate_task.abort();
            handles.outbound_task.abort();
        }
        if let Some(bridge) = session.bridge.take() {
            bridge.stop();
        }
        if let Some(task) = session.inbound_text_task.take() {
            task.abort();
        }
        session.side_channel = None;

        // Capture goes back exactly once no matter which teardown path ran
        if let Some(media) = session.local_media.as_ref() {
            if media.release() {
                if let Err(e) = self.media.release_local(media).await {
                    warn!(
                        "Failed to release local media for call {}: {}",
                        session.call_id, e
                    );
                }
            }
        }

        session.ended_at = Some(Utc::now());
        session.close_reason = Some(reason.clone());
        self.notify_state_change(session.call_id, CallState::Closed, Some(previous), Some(reason));
    }

    /// CAS-transitions a session and notifies the handler on success.
    fn transition(
        self: &Arc<Self>,
        session: &CallSession,
        from: CallState,
        to: CallState,
        reason: Option<String>,
    ) -> bool {
        if let Err(violation) =
            AtomicCallState::validate_transition(session.direction, from, to)
        {
            warn!("Call {}: {}", session.call_id, violation);
        }
        if !session.state.transition_if(from, to) {
            return false;
        }
        debug!("Call {} moved {:?} -> {:?}", session.call_id, from, to);
        self.notify_state_change(session.call_id, to, Some(from), reason);
        true
    }

    fn notify_state_change(
        &self,
        call_id: CallId,
        new_state: CallState,
        previous_state: Option<CallState>,
        reason: Option<String>,
    ) {
        let handler = Arc::clone(&self.handler);
        let status = CallStatusInfo {
            call_id,
            new_state,
            previous_state,
            reason,
            timestamp: Utc::now(),
        };
        // Spawned so handlers can call back into the manager
        tokio::spawn(async move {
            handler.on_call_state_changed(status).await;
        });
    }

    async fn send_reject(&self, to: &PeerId, call_id: CallId, reason: Option<String>) {
        match (CallSignal::Reject { call_id, reason }).to_value() {
            Ok(payload) => {
                if let Err(e) = self.link.relay(to, payload).await {
                    debug!("Could not deliver reject for {}: {}", call_id, e);
                }
            }
            Err(e) => warn!("Unencodable reject for {}: {}", call_id, e),
        }
    }

    /// Handles one relayed payload from another peer.
    async fn handle_signal(self: &Arc<Self>, from: PeerId, payload: Value) {
        let signal = match CallSignal::from_value(payload) {
            Ok(signal) => signal,
            Err(e) => {
                warn!("Discarding undecodable payload from {}: {}", from, e);
                return;
            }
        };
        debug!("Received {} signal from {}", signal.kind(), from);

        match signal {
            CallSignal::Invite { call_id } => self.handle_invite(from, call_id).await,
            CallSignal::Negotiate { call_id, body } => {
                let sender = {
                    let slot = self.session.lock().await;
                    match slot.as_ref() {
                        Some(s)
                            if s.call_id == call_id
                                && s.remote == from
                                && !s.state.get().is_closed() =>
                        {
                            Some(s.inbound_signals.clone())
                        }
                        _ => None,
                    }
                };
                match sender {
                    // Lock released first: the engine may need the manager
                    // to make progress before it drains this channel
                    Some(sender) => {
                        let _ = sender.send(body).await;
                    }
                    None => debug!("Dropping negotiation payload for unknown call {}", call_id),
                }
            }
            CallSignal::Reject { call_id, reason } => {
                let mut slot = self.session.lock().await;
                if let Some(session) = slot.as_mut() {
                    if session.call_id == call_id
                        && session.remote == from
                        && !session.state.get().is_closed()
                    {
                        let why = match reason {
                            Some(reason) => format!("rejected by remote: {}", reason),
                            None => "rejected by remote".to_string(),
                        };
                        self.close_session(session, why).await;
                    }
                }
            }
            CallSignal::Hangup { call_id } => {
                let mut slot = self.session.lock().await;
                if let Some(session) = slot.as_mut() {
                    if session.call_id == call_id
                        && session.remote == from
                        && !session.state.get().is_closed()
                    {
                        self.close_session(session, "hung up by remote").await;
                    }
                }
            }
        }
    }

    async fn handle_invite(self: &Arc<Self>, from: PeerId, call_id: CallId) {
        let busy = {
            let mut slot = self.session.lock().await;
            match slot.as_ref() {
                Some(existing) if !existing.state.get().is_closed() => true,
                _ => {
                    let session = CallSession::new(call_id, CallDirection::Incoming, from.clone());
                    self.transition(&session, CallState::Idle, CallState::Ringing, None);
                    *slot = Some(session);
                    false
                }
            }
        };

        if busy {
            debug!("Rejecting invite {} from {}: already in a call", call_id, from);
            self.send_reject(&from, call_id, Some("busy".to_string())).await;
            return;
        }

        info!("Incoming call {} from {}", call_id, from);
        // Lock released: the handler may accept or reject from inside
        let decision = self
            .handler
            .on_incoming_call(IncomingCallInfo {
                call_id,
                from: from.clone(),
                received_at: Utc::now(),
            })
            .await;

        match decision {
            CallDecision::Accept => {
                if let Err(e) = self.accept_incoming(call_id).await {
                    warn!("Failed to accept call {}: {}", call_id, e);
                }
            }
            CallDecision::Reject { reason } => {
                if let Err(e) = self.reject_incoming(call_id, reason).await {
                    warn!("Failed to reject call {}: {}", call_id, e);
                }
            }
            CallDecision::Defer => {
                debug!("Call {} left ringing for a later decision", call_id);
            }
        }
    }
}

/// Drives the manager from signaling-link events until the link dies.
async fn event_loop(manager: Arc<ManagerInner>, mut events: mpsc::Receiver<LinkEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Delivery { from, payload } => manager.handle_signal(from, payload).await,
            LinkEvent::Disconnected { reason } => {
                // Media flows peer-to-peer, so an active call survives losing
                // the registry; a pending negotiation starves and dies on its
                // own deadline. New signaling is impossible either way.
                warn!("Lost the signaling registry: {}", reason);
                let handler = Arc::clone(&manager.handler);
                tokio::spawn(async move {
                    handler.on_error(ClientError::connection(reason), None).await;
                });
                break;
            }
        }
    }
}
