//! # peercall-registry-core
//!
//! The signaling registry: the server side of the peercall stack.
//!
//! The registry does two things and deliberately nothing more:
//!
//! 1. **Identity allocation** - each control channel that registers receives
//!    a collision-free [`PeerId`]. The identity lives exactly as long as the
//!    channel: when the socket closes, the registration is removed
//!    immediately, with no grace period.
//! 2. **Addressed relay** - a registered peer can ask the registry to
//!    forward an opaque JSON payload to another identity. The registry never
//!    inspects payloads; it only stamps the true sender and delivers.
//!
//! Peer disconnects are announced on an in-process broadcast channel for
//! observability only. Surviving peers are not notified over the wire; a
//! counterpart discovers the loss through its own channel.
//!
//! Alongside the control channel the server exposes two HTTP convenience
//! endpoints: a plain-text liveness probe at `/` and a user-id generator at
//! `/new-user` whose tokens are unrelated to registry identities.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use peercall_registry_core::{RegistryConfig, SignalingServer};
//!
//! #[tokio::main]
//! async fn main() -> peercall_registry_core::Result<()> {
//!     let handle = SignalingServer::new(RegistryConfig::default()).start().await?;
//!     println!("control channel at {}", handle.channel_url());
//!     tokio::signal::ctrl_c().await.ok();
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod registry;
pub mod server;

mod connection;

pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use events::{DisconnectReason, RegistryEvent};
pub use http::{NewUser, LIVENESS_MESSAGE};
pub use registry::{PeerRegistry, RegisteredPeer};
pub use server::{ServerHandle, SignalingServer};

// Re-exported so registry users do not need a direct signal-core dependency.
pub use peercall_signal_core::PeerId;

/// Current version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
