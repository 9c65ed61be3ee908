//! The socket the control plane listens on.
//!
//! On unix the daemon listens on a Unix socket that any local user may connect
//! to; the socket file is removed again when the listener is dropped. TCP is
//! available for hosts without Unix sockets and for tests.

use std::fmt;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::{Path, PathBuf};

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

/// Default Unix socket path.
#[cfg(unix)]
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/clusterlink-daemon.socket";

/// Default TCP address where Unix sockets are unavailable.
pub const DEFAULT_TCP_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 50052);

/// Where to listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    #[cfg(unix)]
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl Default for ListenAddr {
    fn default() -> Self {
        #[cfg(unix)]
        {
            Self::Unix(PathBuf::from(DEFAULT_SOCKET_PATH))
        }
        #[cfg(not(unix))]
        {
            Self::Tcp(DEFAULT_TCP_ADDR)
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// A bound listener, ready to accept connections.
#[derive(Debug)]
pub enum Listener {
    #[cfg(unix)]
    Unix {
        listener: UnixListener,
        guard: SocketFileGuard,
    },
    Tcp(TcpListener),
}

impl Listener {
    /// Bind `addr`. A stale socket file left by an earlier run is replaced.
    pub async fn bind(addr: &ListenAddr) -> std::io::Result<Self> {
        match addr {
            #[cfg(unix)]
            ListenAddr::Unix(path) => bind_unix(path),
            ListenAddr::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await?;
                info!(addr = %listener.local_addr()?, "Listening on TCP");
                Ok(Self::Tcp(listener))
            }
        }
    }

    /// The bound TCP address, if this is a TCP listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Self::Unix { .. } => None,
        }
    }
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> std::io::Result<Listener> {
    use std::os::unix::fs::PermissionsExt;

    if path.exists() {
        debug!(path = %path.display(), "Removing stale socket file");
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;
    let guard = SocketFileGuard {
        path: path.to_path_buf(),
    };
    // Clients run unprivileged.
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))?;
    info!(path = %path.display(), "Listening on Unix socket");
    Ok(Listener::Unix { listener, guard })
}

/// Removes the socket file when dropped.
#[cfg(unix)]
#[derive(Debug)]
pub struct SocketFileGuard {
    path: PathBuf,
}

#[cfg(unix)]
impl Drop for SocketFileGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed socket file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove socket file"),
        }
    }
}
