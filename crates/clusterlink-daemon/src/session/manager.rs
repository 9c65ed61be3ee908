//! Sessions backed by a traffic manager connection.
//!
//! A [`ManagerSession`] keeps its registration with the traffic manager
//! alive and exposes the manager's cluster info stream. Traffic redirection
//! and DNS interception are handled elsewhere; the search path is only
//! recorded here.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use tracing::{debug, info, warn};

use clusterlink_core::Config;
use clusterlink_proto::SessionInfo;
use clusterlink_proto::daemon::OutboundInfo;
use clusterlink_proto::manager::RemainRequest;
use clusterlink_proto::manager::manager_client::ManagerClient;

use super::{ClusterInfoStream, Session, SessionError, SessionFactory};

/// Interval between `Remain` keep-alives.
pub const REMAIN_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on the goodbye sent when a session is cancelled.
const DEPART_TIMEOUT: Duration = Duration::from_secs(1);

/// Creates [`ManagerSession`]s, reading timeouts from the live config.
#[derive(Clone)]
pub struct ManagerSessionFactory {
    config: watch::Receiver<Arc<Config>>,
}

impl ManagerSessionFactory {
    pub const fn new(config: watch::Receiver<Arc<Config>>) -> Self {
        Self { config }
    }
}

/// Check that `info` names a session and a manager to talk to.
fn validate(info: &OutboundInfo) -> Result<SessionInfo, SessionError> {
    let session = info
        .session
        .clone()
        .filter(|s| !s.session_id.is_empty())
        .ok_or_else(|| SessionError::InvalidRequest("missing session id".to_string()))?;
    if info.manager_address.is_empty() {
        return Err(SessionError::InvalidRequest(
            "missing traffic manager address".to_string(),
        ));
    }
    Ok(session)
}

#[tonic::async_trait]
impl SessionFactory for ManagerSessionFactory {
    async fn create(
        &self,
        info: OutboundInfo,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn Session>, SessionError> {
        let session = validate(&info)?;
        let connect_timeout = self.config.borrow().timeouts.manager_connect();

        let endpoint = Endpoint::from_shared(format!("http://{}", info.manager_address))
            .map_err(|e| SessionError::InvalidRequest(e.to_string()))?
            .connect_timeout(connect_timeout);

        info!(
            session_id = %session.session_id,
            manager = %info.manager_address,
            "Connecting to traffic manager"
        );
        let channel = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SessionError::Cancelled),
            channel = endpoint.connect() => {
                channel.map_err(|e| SessionError::Unreachable(e.to_string()))?
            }
        };

        Ok(Arc::new(ManagerSession::new(session, info, channel)))
    }
}

/// A session registered with a traffic manager.
pub struct ManagerSession {
    session: SessionInfo,
    info: OutboundInfo,
    client: ManagerClient<Channel>,
    search_path: Mutex<(Vec<String>, Vec<String>)>,
}

impl ManagerSession {
    pub fn new(session: SessionInfo, info: OutboundInfo, channel: Channel) -> Self {
        Self {
            session,
            info,
            client: ManagerClient::new(channel),
            search_path: Mutex::new((Vec::new(), Vec::new())),
        }
    }

    /// The most recently applied `(paths, namespaces)`.
    pub fn search_path(&self) -> (Vec<String>, Vec<String>) {
        self.search_path
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    async fn depart(&self) {
        let mut client = self.client.clone();
        match tokio::time::timeout(DEPART_TIMEOUT, client.depart(self.session.clone())).await {
            Ok(Ok(_)) => debug!(session_id = %self.session.session_id, "Departed from traffic manager"),
            Ok(Err(status)) => debug!(error = %status, "Depart failed"),
            Err(_) => debug!("Depart timed out"),
        }
    }
}

#[tonic::async_trait]
impl Session for ManagerSession {
    async fn run(&self, cancel: CancellationToken) -> Result<(), SessionError> {
        let mut client = self.client.clone();
        let mut timer = tokio::time::interval(REMAIN_INTERVAL);
        timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.depart().await;
                    return Ok(());
                }
                _ = timer.tick() => {
                    let request = RemainRequest { session: Some(self.session.clone()) };
                    match client.remain(request).await {
                        Ok(_) => {}
                        Err(status) if status.code() == Code::NotFound => {
                            return Err(SessionError::Rpc(status));
                        }
                        Err(status) => warn!(error = %status, "Remain RPC failed"),
                    }
                }
            }
        }
    }

    fn outbound_info(&self) -> OutboundInfo {
        self.info.clone()
    }

    async fn set_search_path(&self, paths: Vec<String>, namespaces: Vec<String>) {
        info!(?paths, ?namespaces, "Setting DNS search path");
        *self
            .search_path
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = (paths, namespaces);
    }

    async fn watch_cluster_info(&self) -> Result<ClusterInfoStream, Status> {
        let mut client = self.client.clone();
        let stream = client
            .watch_cluster_info(self.session.clone())
            .await?
            .into_inner();
        Ok(Box::pin(stream))
    }
}
