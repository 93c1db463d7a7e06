//! Server configuration.

use std::net::SocketAddr;

/// Configuration for [`crate::server::SignalingServer`].
///
/// The control channel and the HTTP helper endpoints listen on separate
/// sockets so either can be firewalled or rebound independently.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Address for the WebSocket control channel.
    pub signal_addr: SocketAddr,
    /// Address for the HTTP helper endpoints.
    pub http_addr: SocketAddr,
    /// URI path the control channel accepts upgrades on.
    pub channel_path: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            signal_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            channel_path: "/channel".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Create a configuration with default addresses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the control-channel bind address.
    pub fn with_signal_addr(mut self, addr: SocketAddr) -> Self {
        self.signal_addr = addr;
        self
    }

    /// Set the HTTP bind address.
    pub fn with_http_addr(mut self, addr: SocketAddr) -> Self {
        self.http_addr = addr;
        self
    }

    /// Set the control-channel path. A missing leading slash is supplied.
    pub fn with_channel_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.channel_path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self
    }
}
