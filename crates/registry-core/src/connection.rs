//! Per-connection control-channel handling.
//!
//! Each accepted socket gets one task running [`handle_connection`]. The
//! task owns the WebSocket, funnels every outbound frame through a single
//! queue (so relays from other connections' tasks can write here safely),
//! and removes the registration the moment the channel is gone.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use peercall_signal_core::message::{methods, RegisterResult, RelayParams};
use peercall_signal_core::rpc::{error_codes, RpcErrorObject, RpcRequest, RpcResponse};
use peercall_signal_core::PeerId;

use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::events::DisconnectReason;
use crate::registry::PeerRegistry;

/// Outbound frame queue length per connection.
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Serve one control channel until it closes.
///
/// Refuses upgrade requests whose path differs from the configured channel
/// path. Whatever identity this connection registered is removed before the
/// function returns; removal is immediate, with no grace period.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    registry: PeerRegistry,
    config: RegistryConfig,
) {
    let expected_path = config.channel_path.clone();
    let path_check = move |request: &Request, response: Response| {
        if request.uri().path() == expected_path {
            Ok(response)
        } else {
            warn!(
                "Refused control-channel upgrade for path {}",
                request.uri().path()
            );
            let mut refusal = ErrorResponse::new(Some("not found".to_string()));
            *refusal.status_mut() = StatusCode::NOT_FOUND;
            Err(refusal)
        }
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, path_check).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("WebSocket handshake with {} failed: {}", remote_addr, e);
            return;
        }
    };
    info!("Control channel open from {}", remote_addr);

    let (mut ws_sink, mut ws_source) = ws_stream.split();

    // Single outbound queue per connection. Responses from this task and
    // deliveries relayed by other connections' tasks both land here.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_CHANNEL_CAPACITY);
    let forward_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if ws_sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let mut registered: Option<PeerId> = None;
    let mut reason = DisconnectReason::ChannelLost;

    while let Some(frame) = ws_source.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Err(e) =
                    dispatch_frame(&text, &registry, &outbound_tx, remote_addr, &mut registered)
                        .await
                {
                    debug!("Connection {} unable to respond: {}", remote_addr, e);
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!("Close frame from {}", remote_addr);
                reason = DisconnectReason::ClientClosed;
                break;
            }
            Ok(_) => {
                // Ping/pong are handled by the library; binary frames have
                // no meaning on the control channel and are ignored.
            }
            Err(e) => {
                debug!("Control channel from {} failed: {}", remote_addr, e);
                break;
            }
        }
    }

    // Immediate removal: the identity must be unknown to relays from the
    // instant the channel is gone.
    if let Some(peer_id) = registered.take() {
        registry.unregister(&peer_id, reason);
    }
    forward_task.abort();
    info!("Control channel from {} closed", remote_addr);
}

/// Parse and dispatch one inbound frame.
///
/// Protocol problems are answered with error responses on the channel; the
/// returned error only signals that this connection's outbound queue is dead
/// and the read loop should stop.
async fn dispatch_frame(
    text: &str,
    registry: &PeerRegistry,
    outbound: &mpsc::Sender<String>,
    remote_addr: SocketAddr,
    registered: &mut Option<PeerId>,
) -> Result<(), RegistryError> {
    let request = match RpcRequest::from_json(text) {
        Ok(request) => request,
        Err(e) => {
            debug!("Unparseable frame from {}: {}", remote_addr, e);
            // Valid JSON that is not a request frame gets the distinct code
            let (code, message) = if serde_json::from_str::<Value>(text).is_ok() {
                (error_codes::INVALID_REQUEST, "not a request frame")
            } else {
                (error_codes::PARSE_ERROR, "invalid JSON")
            };
            return respond_error(outbound, Value::Null, code, message).await;
        }
    };
    let id = request.id.clone().unwrap_or(Value::Null);

    match request.method.as_str() {
        methods::REGISTER => handle_register(registry, outbound, remote_addr, registered, id).await,
        methods::RELAY => {
            handle_relay(registry, outbound, registered.as_ref(), request.params, id).await
        }
        other => {
            debug!("Unknown method {} from {}", other, remote_addr);
            respond_error(
                outbound,
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("unknown method: {}", other),
            )
            .await
        }
    }
}

async fn handle_register(
    registry: &PeerRegistry,
    outbound: &mpsc::Sender<String>,
    remote_addr: SocketAddr,
    registered: &mut Option<PeerId>,
    id: Value,
) -> Result<(), RegistryError> {
    if registered.is_some() {
        return respond_error(
            outbound,
            id,
            error_codes::ALREADY_REGISTERED,
            "connection already registered",
        )
        .await;
    }

    let peer_id = registry.register(outbound.clone(), remote_addr);
    *registered = Some(peer_id.clone());

    let result = serde_json::to_value(RegisterResult { peer_id })?;
    respond_ok(outbound, id, result).await
}

async fn handle_relay(
    registry: &PeerRegistry,
    outbound: &mpsc::Sender<String>,
    registered: Option<&PeerId>,
    params: Value,
    id: Value,
) -> Result<(), RegistryError> {
    let from = match registered {
        Some(peer_id) => peer_id.clone(),
        None => {
            return respond_error(
                outbound,
                id,
                error_codes::NOT_REGISTERED,
                "register before relaying",
            )
            .await;
        }
    };

    let params: RelayParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => {
            return respond_error(
                outbound,
                id,
                error_codes::INVALID_PARAMS,
                format!("bad relay params: {}", e),
            )
            .await;
        }
    };

    match registry.relay(&from, &params.to, params.payload).await {
        Ok(()) => respond_ok(outbound, id, json!({})).await,
        // A mid-teardown target looks exactly like an absent one to the
        // sender, so both map to the same wire error.
        Err(RegistryError::UnknownPeer { peer }) | Err(RegistryError::ChannelClosed { peer }) => {
            respond_error(
                outbound,
                id,
                error_codes::PEER_NOT_FOUND,
                format!("peer not registered: {}", peer),
            )
            .await
        }
        Err(e) => {
            warn!("Relay from {} failed internally: {}", from, e);
            respond_error(outbound, id, error_codes::INTERNAL_ERROR, e.to_string()).await
        }
    }
}

async fn respond_ok(
    outbound: &mpsc::Sender<String>,
    id: Value,
    result: Value,
) -> Result<(), RegistryError> {
    send_frame(outbound, RpcResponse::success(result, id)).await
}

async fn respond_error(
    outbound: &mpsc::Sender<String>,
    id: Value,
    code: i32,
    message: impl Into<String>,
) -> Result<(), RegistryError> {
    send_frame(outbound, RpcResponse::failure(RpcErrorObject::new(code, message), id)).await
}

async fn send_frame(
    outbound: &mpsc::Sender<String>,
    response: RpcResponse,
) -> Result<(), RegistryError> {
    let frame = response.to_json()?;
    outbound
        .send(frame)
        .await
        .map_err(|_| RegistryError::protocol("outbound queue closed"))
}
