//! Tunnel sessions as seen by the daemon.
//!
//! The daemon never looks inside a session. It creates one through a
//! [`SessionFactory`], runs it until it ends or its token is cancelled, and
//! forwards a few queries to it. Everything about how traffic actually
//! reaches the cluster lives behind the [`Session`] trait.

pub mod manager;

use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use clusterlink_proto::daemon::OutboundInfo;
use clusterlink_proto::manager::ClusterInfo;

pub use manager::ManagerSessionFactory;

/// Server-push stream of cluster info updates.
pub type ClusterInfoStream = Pin<Box<dyn Stream<Item = Result<ClusterInfo, Status>> + Send>>;

/// Errors raised while creating or running a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid connect request: {0}")]
    InvalidRequest(String),

    #[error("traffic manager unreachable: {0}")]
    Unreachable(String),

    #[error("traffic manager error: {0}")]
    Rpc(#[from] Status),

    #[error("session creation was cancelled")]
    Cancelled,

    #[error("connection broker is not running")]
    BrokerGone,
}

/// One established tunnel session.
#[tonic::async_trait]
pub trait Session: Send + Sync {
    /// Run the session until it fails or `cancel` fires.
    async fn run(&self, cancel: CancellationToken) -> Result<(), SessionError>;

    /// The outbound configuration the session was created with.
    fn outbound_info(&self) -> OutboundInfo;

    /// Replace the DNS search path.
    async fn set_search_path(&self, paths: Vec<String>, namespaces: Vec<String>);

    /// Open the cluster info stream. It never signals completion on its own
    /// while the cluster keeps changing.
    async fn watch_cluster_info(&self) -> Result<ClusterInfoStream, Status>;
}

/// Creates sessions on behalf of the connection broker.
#[tonic::async_trait]
pub trait SessionFactory: Send + Sync {
    /// Establish a session. `cancel` is the token the session will run under;
    /// creation should give up when it fires.
    async fn create(
        &self,
        info: OutboundInfo,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn Session>, SessionError>;
}
