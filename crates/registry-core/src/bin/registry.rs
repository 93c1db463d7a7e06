//! Standalone signaling registry server.
//!
//! Runs the WebSocket control channel and the HTTP helper endpoints until
//! interrupted. Peer registrations and disconnects are mirrored into the log.

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use peercall_registry_core::{RegistryConfig, RegistryEvent, SignalingServer};

#[derive(Parser, Debug)]
#[command(name = "peercall-registry")]
#[command(about = "Signaling registry: identity allocation and opaque payload relay")]
#[command(version)]
struct Args {
    /// Control-channel (WebSocket) bind address
    #[arg(long, default_value = "0.0.0.0:9000", env = "PEERCALL_SIGNAL_ADDR")]
    signal_addr: SocketAddr,

    /// HTTP helper-endpoint bind address
    #[arg(long, default_value = "0.0.0.0:3000", env = "PEERCALL_HTTP_ADDR")]
    http_addr: SocketAddr,

    /// URI path the control channel accepts upgrades on
    #[arg(long, default_value = "/channel", env = "PEERCALL_CHANNEL_PATH")]
    channel_path: String,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log)),
        )
        .init();

    let config = RegistryConfig::new()
        .with_signal_addr(args.signal_addr)
        .with_http_addr(args.http_addr)
        .with_channel_path(args.channel_path);

    let handle = SignalingServer::new(config)
        .start()
        .await
        .context("failed to start signaling server")?;

    info!("Control channel listening on {}", handle.channel_url());
    info!("Helper endpoints listening on {}", handle.http_url());

    let mut events = handle.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RegistryEvent::PeerRegistered { peer_id, .. }) => {
                    info!("Peer registered: {}", peer_id);
                }
                Ok(RegistryEvent::PeerDisconnected {
                    peer_id, reason, ..
                }) => {
                    info!("Peer disconnected: {} ({})", peer_id, reason);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Event log fell behind, missed {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    handle.shutdown().await;
    Ok(())
}
