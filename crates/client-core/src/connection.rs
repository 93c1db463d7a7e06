//! Client side of the registry control channel.
//!
//! [`SignalingLink`] owns one WebSocket connection to the signaling registry
//! and speaks the JSON-RPC framing from `peercall-signal-core` over it. It
//! correlates request/response pairs, surfaces deliveries and the disconnect
//! as [`LinkEvent`]s, and maps registry error codes onto [`ClientError`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use peercall_signal_core::{
    error_codes, methods, DeliverParams, PeerId, RegisterResult, RelayParams, RpcFrame,
    RpcRequest, RpcResponse,
};

use crate::error::{ClientError, ClientResult};

/// Frames queued towards the registry before senders start blocking.
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Link events queued towards the consumer before the read loop blocks.
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// How long to wait for the registry to answer a request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingMap = DashMap<u64, oneshot::Sender<RpcResponse>>;

/// Something the registry pushed at us outside the request/response flow.
#[derive(Debug)]
pub enum LinkEvent {
    /// A relayed payload arrived from another peer.
    Delivery { from: PeerId, payload: Value },
    /// The control channel is gone. Terminal: no further events follow.
    Disconnected { reason: String },
}

/// A live control-channel connection to the signaling registry.
///
/// Cheap to clone; all clones share the connection. Created by
/// [`SignalingLink::connect`], which also yields the event stream.
#[derive(Debug, Clone)]
pub struct SignalingLink {
    inner: Arc<LinkInner>,
}

#[derive(Debug)]
struct LinkInner {
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    pending: Arc<PendingMap>,
    outbound: mpsc::Sender<String>,
    peer_id: OnceLock<PeerId>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl SignalingLink {
    /// Connects to the registry's control channel.
    ///
    /// Returns the link and the stream of [`LinkEvent`]s. The stream ends
    /// with a single `Disconnected` event when the channel dies.
    ///
    /// # Errors
    /// [`ClientError::Connection`] when the URL is not a `ws`/`wss` URL or
    /// the registry cannot be reached.
    pub async fn connect(url: &str) -> ClientResult<(Self, mpsc::Receiver<LinkEvent>)> {
        let parsed = Url::parse(url)
            .map_err(|e| ClientError::connection(format!("invalid registry URL {}: {}", url, e)))?;
        match parsed.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ClientError::connection(format!(
                    "unsupported registry URL scheme {:?}, expected ws or wss",
                    other
                )));
            }
        }

        let (ws_stream, _response) = connect_async(parsed.as_str()).await.map_err(|e| {
            ClientError::connection(format!("failed to reach registry at {}: {}", url, e))
        })?;
        debug!("Connected to signaling registry at {}", url);

        let (ws_sink, ws_source) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let closed = Arc::new(AtomicBool::new(false));
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());

        let send_task = tokio::spawn(pump_outbound(ws_sink, outbound_rx));
        let recv_task = tokio::spawn(pump_inbound(
            ws_source,
            Arc::clone(&pending),
            Arc::clone(&closed),
            event_tx,
        ));

        let link = Self {
            inner: Arc::new(LinkInner {
                closed,
                next_id: AtomicU64::new(1),
                pending,
                outbound: outbound_tx,
                peer_id: OnceLock::new(),
                tasks: StdMutex::new(vec![send_task, recv_task]),
            }),
        };
        Ok((link, event_rx))
    }

    /// Sends a request and waits for the matching response.
    ///
    /// # Errors
    /// [`ClientError::Connection`] when the channel is closed or the registry
    /// does not answer within [`REQUEST_TIMEOUT`]. A returned response may
    /// still carry an application-level error object.
    pub async fn request(&self, method: &str, params: Value) -> ClientResult<RpcResponse> {
        if self.is_closed() {
            return Err(ClientError::connection("control channel is closed"));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = RpcRequest::new(method, params, id).to_json()?;

        let (response_tx, response_rx) = oneshot::channel();
        self.inner.pending.insert(id, response_tx);

        if self.inner.outbound.send(frame).await.is_err() {
            self.inner.pending.remove(&id);
            return Err(ClientError::connection("control channel is closed"));
        }

        match timeout(REQUEST_TIMEOUT, response_rx).await {
            Ok(Ok(response)) => Ok(response),
            // Entry dropped by the read loop on teardown
            Ok(Err(_)) => Err(ClientError::connection(
                "control channel closed while awaiting response",
            )),
            Err(_) => {
                self.inner.pending.remove(&id);
                Err(ClientError::connection(format!(
                    "no response to {} within {:?}",
                    method, REQUEST_TIMEOUT
                )))
            }
        }
    }

    /// Registers this connection with the registry and returns the allocated
    /// identity.
    ///
    /// # Errors
    /// [`ClientError::Registration`] for any failure, including a refused
    /// double registration. Registration failures are fatal to the client.
    pub async fn register(&self) -> ClientResult<PeerId> {
        let response = self
            .request(methods::REGISTER, serde_json::json!({}))
            .await
            .map_err(|e| ClientError::registration(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(ClientError::registration(error.message));
        }
        let result: RegisterResult = serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(|e| {
                ClientError::registration(format!("malformed registration result: {}", e))
            })?;

        let _ = self.inner.peer_id.set(result.peer_id.clone());
        info!("Registered with signaling registry as {}", result.peer_id);
        Ok(result.peer_id)
    }

    /// Relays an opaque payload to another registered peer.
    ///
    /// A success response means the registry queued the payload towards a
    /// currently registered peer; it does not mean the peer has acted on it.
    ///
    /// # Errors
    /// - [`ClientError::UnknownPeer`] when the target is not registered
    /// - [`ClientError::Registration`] when this link never registered
    /// - [`ClientError::Connection`] / [`ClientError::Protocol`] for
    ///   channel and framing failures
    pub async fn relay(&self, to: &PeerId, payload: Value) -> ClientResult<()> {
        let params = serde_json::to_value(RelayParams {
            to: to.clone(),
            payload,
        })?;
        let response = self.request(methods::RELAY, params).await?;

        match response.error {
            None => Ok(()),
            Some(error) if error.code == error_codes::PEER_NOT_FOUND => {
                Err(ClientError::UnknownPeer { peer: to.clone() })
            }
            Some(error) if error.code == error_codes::NOT_REGISTERED => {
                Err(ClientError::registration(error.message))
            }
            Some(error) => Err(ClientError::protocol(format!(
                "relay refused: {} (code {})",
                error.message, error.code
            ))),
        }
    }

    /// The identity allocated by [`register`](Self::register), if any.
    pub fn local_peer_id(&self) -> Option<PeerId> {
        self.inner.peer_id.get().cloned()
    }

    /// Whether the control channel is gone.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Tears the connection down. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Closing control channel");
        let handles = {
            let mut guard = match self.inner.tasks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            handle.abort();
        }
        self.inner.pending.clear();
    }
}

/// Drains the outbound queue into the WebSocket sink.
async fn pump_outbound(mut ws_sink: WsSink, mut outbound_rx: mpsc::Receiver<String>) {
    while let Some(frame) = outbound_rx.recv().await {
        if let Err(e) = ws_sink.send(Message::Text(frame)).await {
            debug!("Control channel send failed: {}", e);
            break;
        }
    }
}

/// Reads frames until the channel dies, then reports the disconnect.
async fn pump_inbound(
    mut ws_source: WsSource,
    pending: Arc<PendingMap>,
    closed: Arc<AtomicBool>,
    event_tx: mpsc::Sender<LinkEvent>,
) {
    let reason = loop {
        match ws_source.next().await {
            Some(Ok(Message::Text(text))) => handle_frame(&text, &pending, &event_tx).await,
            Some(Ok(Message::Close(_))) => break "registry closed the connection".to_string(),
            Some(Ok(_)) => {
                // Ping/pong handled by the library; binary frames have no meaning
            }
            Some(Err(e)) => break format!("control channel error: {}", e),
            None => break "control channel ended".to_string(),
        }
    };

    closed.store(true, Ordering::SeqCst);
    // Dropping the waiters fails every in-flight request with a channel error
    pending.clear();
    let _ = event_tx.send(LinkEvent::Disconnected { reason }).await;
}

async fn handle_frame(text: &str, pending: &PendingMap, event_tx: &mpsc::Sender<LinkEvent>) {
    let frame = match RpcFrame::from_json(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Discarding unparseable frame from registry: {}", e);
            return;
        }
    };

    match frame {
        RpcFrame::Response(response) => {
            let Some(id) = response.id.as_u64() else {
                warn!("Discarding response with non-numeric id {}", response.id);
                return;
            };
            match pending.remove(&id) {
                Some((_, waiter)) => {
                    // Waiter may have timed out already
                    let _ = waiter.send(response);
                }
                None => debug!("Response for unknown request id {}", id),
            }
        }
        RpcFrame::Request(request) if request.method == methods::DELIVER => {
            match serde_json::from_value::<DeliverParams>(request.params) {
                Ok(params) => {
                    let _ = event_tx
                        .send(LinkEvent::Delivery {
                            from: params.from,
                            payload: params.payload,
                        })
                        .await;
                }
                Err(e) => warn!("Discarding malformed delivery: {}", e),
            }
        }
        RpcFrame::Request(request) => {
            debug!("Ignoring unexpected method {} from registry", request.method);
        }
    }
}
