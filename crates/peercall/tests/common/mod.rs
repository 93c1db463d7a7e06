//! Shared harness for whole-stack tests: an in-process registry, a loopback
//! media engine whose negotiation really travels through the relay, and a
//! handler that records everything it sees.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use peercall::prelude::*;

/// Messages buffered per direction of a loopback side channel.
const TEXT_CHANNEL_CAPACITY: usize = 32;

pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Starts a registry on ephemeral ports.
pub async fn start_registry() -> ServerHandle {
    init_logging();
    let config = RegistryConfig::default()
        .with_signal_addr("127.0.0.1:0".parse().unwrap())
        .with_http_addr("127.0.0.1:0".parse().unwrap());
    SignalingServer::new(config)
        .start()
        .await
        .expect("registry failed to start")
}

/// Pairs the two halves of a call's side channel by negotiation token.
///
/// Whichever endpoint claims a token first creates both directions and
/// leaves the counterpart half behind for the second claimer.
#[derive(Default)]
pub struct LoopbackHub {
    pending: Mutex<HashMap<Uuid, PendingHalf>>,
}

struct PendingHalf {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<String>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn claim(&self, token: Uuid) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        let mut pending = self.pending.lock().unwrap();
        if let Some(half) = pending.remove(&token) {
            (half.outbound, half.inbound)
        } else {
            let (first_tx, first_rx) = mpsc::channel(TEXT_CHANNEL_CAPACITY);
            let (second_tx, second_rx) = mpsc::channel(TEXT_CHANNEL_CAPACITY);
            pending.insert(
                token,
                PendingHalf {
                    outbound: second_tx,
                    inbound: first_rx,
                },
            );
            (first_tx, second_rx)
        }
    }
}

/// Media engine for tests. Capture is simulated; negotiation exchanges one
/// offer/answer pair through the manager's signaling conduit, so the payloads
/// genuinely cross the registry relay.
pub struct LoopbackMediaEngine {
    hub: Arc<LoopbackHub>,
    fail_acquire: bool,
    stall_negotiation: bool,
    acquired: AtomicUsize,
    released: AtomicUsize,
    negotiations: AtomicUsize,
}

impl LoopbackMediaEngine {
    pub fn new(hub: Arc<LoopbackHub>) -> Arc<Self> {
        Arc::new(Self {
            hub,
            fail_acquire: false,
            stall_negotiation: false,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            negotiations: AtomicUsize::new(0),
        })
    }

    /// An engine whose capture always fails.
    pub fn failing_acquire(hub: Arc<LoopbackHub>) -> Arc<Self> {
        Arc::new(Self {
            fail_acquire: true,
            ..Self::unwrapped(hub)
        })
    }

    /// An engine whose negotiation never completes.
    pub fn stalling(hub: Arc<LoopbackHub>) -> Arc<Self> {
        Arc::new(Self {
            stall_negotiation: true,
            ..Self::unwrapped(hub)
        })
    }

    fn unwrapped(hub: Arc<LoopbackHub>) -> Self {
        Self {
            hub,
            fail_acquire: false,
            stall_negotiation: false,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            negotiations: AtomicUsize::new(0),
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn negotiations(&self) -> usize {
        self.negotiations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaEngine for LoopbackMediaEngine {
    async fn acquire_local(&self, constraints: &MediaConstraints) -> ClientResult<LocalMedia> {
        if self.fail_acquire {
            return Err(ClientError::media_unavailable("camera is in use"));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(LocalMedia::new(*constraints))
    }

    async fn negotiate(
        &self,
        direction: CallDirection,
        local: &LocalMedia,
        mut signals: SignalChannel,
    ) -> ClientResult<EstablishedMedia> {
        self.negotiations.fetch_add(1, Ordering::SeqCst);
        if self.stall_negotiation {
            std::future::pending::<()>().await;
        }

        let token = match direction {
            CallDirection::Outgoing => {
                let token = Uuid::new_v4();
                signals
                    .outbound
                    .send(json!({ "step": "offer", "token": token }))
                    .await
                    .map_err(|_| ClientError::protocol("negotiation conduit closed"))?;
                let answer = signals
                    .inbound
                    .recv()
                    .await
                    .ok_or_else(|| ClientError::protocol("negotiation conduit closed"))?;
                assert_eq!(answer["step"], json!("answer"), "unexpected payload: {answer}");
                parse_token(&answer)?
            }
            CallDirection::Incoming => {
                let offer = signals
                    .inbound
                    .recv()
                    .await
                    .ok_or_else(|| ClientError::protocol("negotiation conduit closed"))?;
                assert_eq!(offer["step"], json!("offer"), "unexpected payload: {offer}");
                let token = parse_token(&offer)?;
                // Claim before answering so the caller's claim always pairs
                let claimed = self.hub.claim(token);
                signals
                    .outbound
                    .send(json!({ "step": "answer", "token": token }))
                    .await
                    .map_err(|_| ClientError::protocol("negotiation conduit closed"))?;
                let (outbound_text, inbound_text) = claimed;
                return Ok(EstablishedMedia {
                    remote: RemoteMedia {
                        id: Uuid::new_v4(),
                        constraints: local.constraints(),
                    },
                    outbound_text,
                    inbound_text,
                });
            }
        };

        let (outbound_text, inbound_text) = self.hub.claim(token);
        Ok(EstablishedMedia {
            remote: RemoteMedia {
                id: Uuid::new_v4(),
                constraints: local.constraints(),
            },
            outbound_text,
            inbound_text,
        })
    }

    async fn release_local(&self, local: &LocalMedia) -> ClientResult<()> {
        assert!(local.is_released(), "release_local before the handle was marked");
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn parse_token(payload: &Value) -> ClientResult<Uuid> {
    payload["token"]
        .as_str()
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| ClientError::protocol(format!("negotiation payload without token: {payload}")))
}

/// Records every event and answers invites with a fixed decision.
pub struct RecordingHandler {
    decision: CallDecision,
    incoming: Mutex<Vec<IncomingCallInfo>>,
    states: Mutex<Vec<CallStatusInfo>>,
    side_messages: Mutex<Vec<(CallId, String)>>,
    errors: Mutex<Vec<ClientError>>,
}

impl RecordingHandler {
    pub fn accepting() -> Arc<Self> {
        Self::with_decision(CallDecision::Accept)
    }

    pub fn deferring() -> Arc<Self> {
        Self::with_decision(CallDecision::Defer)
    }

    pub fn rejecting(reason: Option<&str>) -> Arc<Self> {
        Self::with_decision(CallDecision::Reject {
            reason: reason.map(str::to_string),
        })
    }

    fn with_decision(decision: CallDecision) -> Arc<Self> {
        Arc::new(Self {
            decision,
            incoming: Mutex::new(Vec::new()),
            states: Mutex::new(Vec::new()),
            side_messages: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
        })
    }

    pub fn incoming(&self) -> Vec<IncomingCallInfo> {
        self.incoming.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<CallStatusInfo> {
        self.states.lock().unwrap().clone()
    }

    pub fn side_messages(&self) -> Vec<(CallId, String)> {
        self.side_messages.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<ClientError> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallHandler for RecordingHandler {
    async fn on_incoming_call(&self, info: IncomingCallInfo) -> CallDecision {
        self.incoming.lock().unwrap().push(info);
        self.decision.clone()
    }

    async fn on_call_state_changed(&self, status: CallStatusInfo) {
        self.states.lock().unwrap().push(status);
    }

    async fn on_side_channel_message(&self, call_id: CallId, message: String) {
        self.side_messages.lock().unwrap().push((call_id, message));
    }

    async fn on_error(&self, error: ClientError, _call_id: Option<CallId>) {
        self.errors.lock().unwrap().push(error);
    }
}

/// Replays a fixed sample sequence, then reports no face forever.
pub struct ScriptedExpressions {
    samples: Mutex<VecDeque<Option<ExpressionSample>>>,
}

impl ScriptedExpressions {
    pub fn new(samples: Vec<Option<ExpressionSample>>) -> Arc<Self> {
        Arc::new(Self {
            samples: Mutex::new(samples.into()),
        })
    }
}

#[async_trait]
impl ExpressionSource for ScriptedExpressions {
    async fn sample(&self) -> Option<ExpressionSample> {
        self.samples.lock().unwrap().pop_front().flatten()
    }
}

pub fn happy_sample() -> Option<ExpressionSample> {
    Some(ExpressionSample::new(vec![
        (ExpressionLabel::Happy, 0.92),
        (ExpressionLabel::Neutral, 0.05),
    ]))
}

pub fn sad_sample() -> Option<ExpressionSample> {
    Some(ExpressionSample::new(vec![
        (ExpressionLabel::Happy, 0.1),
        (ExpressionLabel::Sad, 0.82),
    ]))
}

/// Connects an endpoint with default configuration.
pub async fn connect_endpoint(
    registry: &ServerHandle,
    engine: Arc<LoopbackMediaEngine>,
    handler: Arc<RecordingHandler>,
) -> CallSessionManager {
    connect_endpoint_with(ClientConfig::new(registry.channel_url()), engine, handler).await
}

/// Connects an endpoint with a caller-tuned configuration.
pub async fn connect_endpoint_with(
    config: ClientConfig,
    engine: Arc<LoopbackMediaEngine>,
    handler: Arc<RecordingHandler>,
) -> CallSessionManager {
    CallSessionManager::builder(config)
        .with_media_engine(engine)
        .with_handler(handler)
        .connect()
        .await
        .expect("endpoint failed to connect")
}

/// Polls until the manager reaches `want` or five seconds pass.
pub async fn wait_for_state(manager: &CallSessionManager, want: CallState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let current = manager.call_state().await;
        if current == want {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {:?}, still {:?}",
            want,
            current
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Polls until `predicate` holds or five seconds pass.
pub async fn wait_until(what: &str, mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(Instant::now() < deadline, "timed out waiting until {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
