//! gRPC server for the clusterlink daemon.
//!
//! Serves the `Daemon` control plane on a Unix socket or TCP listener until
//! the root token is cancelled.

mod config;
mod daemon_svc;


pub use config::ServerConfig;
pub use daemon_svc::{API_VERSION, DaemonServiceImpl, PROCESS_NAME};

use thiserror::Error;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::info;

use clusterlink_proto::daemon::daemon_server::DaemonServer;

use crate::listener::Listener;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serve `service` on `listener` until `shutdown` is cancelled.
///
/// In-flight requests are allowed to finish after `shutdown` fires.
pub async fn serve(
    listener: Listener,
    service: DaemonServiceImpl,
    config: ServerConfig,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let mut daemon = DaemonServer::new(service);
    if let Some(max) = config.max_receive_size {
        daemon = daemon.max_decoding_message_size(max);
    }

    let router = Server::builder()
        .http2_keepalive_interval(Some(config.keepalive_interval))
        .http2_keepalive_timeout(Some(config.keepalive_timeout))
        .add_service(daemon);

    info!(listen = %config.listen, "gRPC server ready");
    let signal = shutdown.cancelled_owned();
    match listener {
        #[cfg(unix)]
        Listener::Unix { listener, guard } => {
            let incoming = tokio_stream::wrappers::UnixListenerStream::new(listener);
            router.serve_with_incoming_shutdown(incoming, signal).await?;
            drop(guard);
        }
        Listener::Tcp(listener) => {
            router
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
                .await?;
        }
    }

    info!("gRPC server stopped");
    Ok(())
}
