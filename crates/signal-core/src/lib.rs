//! # peercall-signal-core
//!
//! Wire protocol types for the peercall control channel.
//!
//! The control channel is a persistent connection between a client and the
//! signaling registry. Every frame is a single JSON document following the
//! JSON-RPC 2.0 shape: requests carry a correlation `id` and always receive a
//! response; notifications omit the `id` and receive nothing.
//!
//! Three methods exist:
//!
//! - [`methods::REGISTER`] allocates a [`PeerId`] for the connection
//! - [`methods::RELAY`] forwards an opaque payload to another registered peer
//! - [`methods::DELIVER`] hands a relayed payload to its addressee
//!
//! Relay payloads are opaque at this layer: the registry forwards the JSON
//! value untouched and never interprets it. Whatever vocabulary two peers
//! speak over the relay is their own business.

pub mod error;
pub mod message;
pub mod peer;
pub mod rpc;

pub use error::{ProtocolError, ProtocolResult};
pub use message::{methods, DeliverParams, RegisterResult, RelayParams};
pub use peer::PeerId;
pub use rpc::{error_codes, RpcErrorObject, RpcFrame, RpcRequest, RpcResponse};

/// Current version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
