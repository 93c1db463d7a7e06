//! Signaling server assembly.
//!
//! [`SignalingServer::start`] binds two listeners: the WebSocket control
//! channel and the HTTP helper endpoints. Each accepted control connection
//! runs in its own task; all of them share one [`PeerRegistry`].

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::RegistryConfig;
use crate::connection::handle_connection;
use crate::error::Result;
use crate::events::RegistryEvent;
use crate::http;
use crate::registry::PeerRegistry;

/// The signaling server, ready to start.
#[derive(Debug, Default)]
pub struct SignalingServer {
    config: RegistryConfig,
}

impl SignalingServer {
    /// Create a server with the given configuration.
    pub fn new(config: RegistryConfig) -> Self {
        Self { config }
    }

    /// Bind both listeners and start serving.
    ///
    /// Returns once the sockets are bound, so a port of `0` in the
    /// configuration can be resolved through [`ServerHandle::signal_addr`].
    pub async fn start(self) -> Result<ServerHandle> {
        let config = self.config;

        let signal_listener = TcpListener::bind(config.signal_addr).await?;
        let signal_addr = signal_listener.local_addr()?;
        let http_listener = TcpListener::bind(config.http_addr).await?;
        let http_addr = http_listener.local_addr()?;

        let registry = PeerRegistry::new();
        let (shutdown_tx, _) = broadcast::channel(1);

        let accept_task = tokio::spawn(accept_loop(
            signal_listener,
            registry.clone(),
            config.clone(),
            shutdown_tx.subscribe(),
        ));
        let http_task = tokio::spawn(http::serve(http_listener, shutdown_tx.subscribe()));

        info!(
            "Signaling server up: control channel ws://{}{}, http http://{}",
            signal_addr, config.channel_path, http_addr
        );

        Ok(ServerHandle {
            signal_addr,
            http_addr,
            channel_path: config.channel_path,
            registry,
            shutdown_tx,
            accept_task,
            http_task,
        })
    }
}

/// Accept control-channel connections until shutdown.
async fn accept_loop(
    listener: TcpListener,
    registry: PeerRegistry,
    config: RegistryConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    tokio::spawn(handle_connection(
                        stream,
                        remote_addr,
                        registry.clone(),
                        config.clone(),
                    ));
                }
                Err(e) => {
                    warn!("Accept on control channel failed: {}", e);
                }
            },
            _ = shutdown_rx.recv() => {
                info!("Control-channel listener stopping");
                break;
            }
        }
    }
}

/// Handle to a running server.
///
/// Dropping the handle leaves the server running; call
/// [`ServerHandle::shutdown`] to stop it.
#[derive(Debug)]
pub struct ServerHandle {
    signal_addr: SocketAddr,
    http_addr: SocketAddr,
    channel_path: String,
    registry: PeerRegistry,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
    http_task: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address of the control-channel listener.
    pub fn signal_addr(&self) -> SocketAddr {
        self.signal_addr
    }

    /// Bound address of the HTTP listener.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Full URL a client dials to open a control channel.
    pub fn channel_url(&self) -> String {
        format!("ws://{}{}", self.signal_addr, self.channel_path)
    }

    /// Base URL of the HTTP helper endpoints.
    pub fn http_url(&self) -> String {
        format!("http://{}", self.http_addr)
    }

    /// The shared peer registry.
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Subscribe to registration and disconnect events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe()
    }

    /// Stop both listeners and wait for them to finish.
    ///
    /// Connections already in flight keep their tasks; only the listeners
    /// stop. Tests and short-lived tools tear the process down right after.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.accept_task.await;
        let _ = self.http_task.await;
        info!("Signaling server stopped");
    }
}
