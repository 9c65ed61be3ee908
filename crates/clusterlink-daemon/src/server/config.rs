//! Server configuration.

use std::net::SocketAddr;
#[cfg(unix)]
use std::path::PathBuf;
use std::time::Duration;

use crate::listener::ListenAddr;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Where the control plane listens.
    pub listen: ListenAddr,

    /// Maximum decoded request size. `None` keeps tonic's default.
    pub max_receive_size: Option<usize>,

    /// HTTP/2 keepalive ping interval.
    pub keepalive_interval: Duration,

    /// How long to wait for a keepalive ack.
    pub keepalive_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: ListenAddr::default(),
            max_receive_size: None,
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Create a new server config with TCP transport.
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            listen: ListenAddr::Tcp(addr),
            ..Default::default()
        }
    }

    /// Create a new server config with Unix socket transport.
    #[cfg(unix)]
    pub fn unix(path: PathBuf) -> Self {
        Self {
            listen: ListenAddr::Unix(path),
            ..Default::default()
        }
    }

    /// Set the maximum decoded request size.
    #[must_use]
    pub const fn with_max_receive_size(mut self, max: Option<usize>) -> Self {
        self.max_receive_size = max;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn default_config_uses_unix_socket() {
        let config = ServerConfig::default();
        assert_eq!(
            config.listen,
            ListenAddr::Unix(PathBuf::from(crate::listener::DEFAULT_SOCKET_PATH))
        );
        assert!(config.max_receive_size.is_none());
    }

    #[test]
    fn tcp_config() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let config = ServerConfig::tcp(addr).with_max_receive_size(Some(1024));
        assert_eq!(config.listen, ListenAddr::Tcp(addr));
        assert_eq!(config.max_receive_size, Some(1024));
    }
}
