//! `Daemon` gRPC service implementation.
//!
//! The RPC layer never touches a session directly except through the
//! [`SessionSlot`]; connects are handed to the connection broker. Each
//! handler runs inside [`guarded`], so a panic fails only that request.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, error, instrument};

use clusterlink_core::{TimedLevel, level_cache};
use clusterlink_proto::daemon::daemon_server::Daemon;
use clusterlink_proto::methods::{
    METHOD_CONNECT, METHOD_DISCONNECT, METHOD_GET_CLUSTER_SUBNETS, METHOD_QUIT,
    METHOD_SET_DNS_SEARCH_PATH, METHOD_SET_LOG_LEVEL, METHOD_STATUS, METHOD_VERSION,
};
use clusterlink_proto::daemon::{
    ClusterSubnets, DaemonStatus, Empty, LogLevelRequest, OutboundInfo, Paths, VersionInfo,
};

use crate::broker::{BrokerHandle, ConnectReply};
use crate::session::Session;
use crate::slot::SessionSlot;
use crate::subnets::{self, CLUSTER_INFO_WINDOW};
use crate::supervisor::panic_message;
use crate::telemetry::{Action, ReporterHandle};

/// Version of the `Daemon` API spoken by this build.
pub const API_VERSION: i32 = 3;

/// Process name used for the log level cache file.
pub const PROCESS_NAME: &str = "daemon";

/// Run `handler`, turning a panic into `INTERNAL`.
pub(crate) async fn guarded<T, F>(rpc: &'static str, handler: F) -> Result<Response<T>, Status>
where
    F: Future<Output = Result<Response<T>, Status>>,
{
    match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(rpc, panic = %message, "RPC handler panicked");
            Err(Status::internal(format!("{rpc} failed unexpectedly")))
        }
    }
}

fn no_session() -> Status {
    Status::unavailable("no active session")
}

/// `Daemon` service implementation.
pub struct DaemonServiceImpl {
    slot: Arc<SessionSlot>,
    broker: BrokerHandle,
    root: CancellationToken,
    level: TimedLevel,
    logging_dir: PathBuf,
    reporter: ReporterHandle,
    subnet_window: Duration,
}

impl DaemonServiceImpl {
    pub fn new(
        slot: Arc<SessionSlot>,
        broker: BrokerHandle,
        root: CancellationToken,
        level: TimedLevel,
        logging_dir: PathBuf,
        reporter: ReporterHandle,
    ) -> Self {
        Self {
            slot,
            broker,
            root,
            level,
            logging_dir,
            reporter,
            subnet_window: CLUSTER_INFO_WINDOW,
        }
    }

    /// Override how long `GetClusterSubnets` listens.
    #[must_use]
    pub const fn with_subnet_window(mut self, window: Duration) -> Self {
        self.subnet_window = window;
        self
    }

    fn current(&self) -> Result<Arc<dyn Session>, Status> {
        self.slot.current().ok_or_else(no_session)
    }
}

#[tonic::async_trait]
impl Daemon for DaemonServiceImpl {
    #[instrument(skip(self, _request), fields(rpc = "Version"))]
    async fn version(&self, _request: Request<Empty>) -> Result<Response<VersionInfo>, Status> {
        guarded(METHOD_VERSION, async {
            let executable = std::env::current_exe()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            Ok(Response::new(VersionInfo {
                api_version: API_VERSION,
                version: env!("CARGO_PKG_VERSION").to_string(),
                executable,
            }))
        })
        .await
    }

    #[instrument(skip(self, _request), fields(rpc = "Status"))]
    async fn status(&self, _request: Request<Empty>) -> Result<Response<DaemonStatus>, Status> {
        guarded(METHOD_STATUS, async {
            Ok(Response::new(DaemonStatus {
                outbound_config: self.slot.outbound_info(),
            }))
        })
        .await
    }

    #[instrument(skip(self, _request), fields(rpc = "Quit"))]
    async fn quit(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        guarded(METHOD_QUIT, async {
            debug!("Quit requested");
            self.reporter.report(Action::Quit);
            self.root.cancel();
            Ok(Response::new(Empty {}))
        })
        .await
    }

    #[instrument(skip(self, request), fields(rpc = "SetDnsSearchPath"))]
    async fn set_dns_search_path(
        &self,
        request: Request<Paths>,
    ) -> Result<Response<Empty>, Status> {
        guarded(METHOD_SET_DNS_SEARCH_PATH, async {
            let session = self.current()?;
            let Paths { paths, namespaces } = request.into_inner();
            session.set_search_path(paths, namespaces).await;
            Ok(Response::new(Empty {}))
        })
        .await
    }

    #[instrument(skip(self, request), fields(rpc = "Connect"))]
    async fn connect(&self, request: Request<OutboundInfo>) -> Result<Response<Empty>, Status> {
        guarded(METHOD_CONNECT, async {
            let info = request.into_inner();
            let session_id = info
                .session
                .as_ref()
                .map(|s| s.session_id.clone())
                .unwrap_or_default();
            debug!(%session_id, "Connect requested");

            let cancel = self.root.child_token();
            let reply = self
                .broker
                .connect(info, &cancel)
                .await
                .map_err(|e| Status::already_exists(e.to_string()))?;

            match reply {
                ConnectReply::Connected => {
                    self.reporter.report(Action::Connect);
                    Ok(Response::new(Empty {}))
                }
                ConnectReply::Abandoned => {
                    debug!(%session_id, "Connect abandoned by caller");
                    Ok(Response::new(Empty {}))
                }
                ConnectReply::Failed(e) => {
                    self.reporter.report(Action::ConnectFailed);
                    Err(Status::internal(e.to_string()))
                }
            }
        })
        .await
    }

    #[instrument(skip(self, _request), fields(rpc = "Disconnect"))]
    async fn disconnect(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        guarded(METHOD_DISCONNECT, async {
            debug!("Disconnect requested");
            if self.slot.disconnect() {
                self.reporter.report(Action::Disconnect);
            }
            Ok(Response::new(Empty {}))
        })
        .await
    }

    #[instrument(skip(self, _request), fields(rpc = "GetClusterSubnets"))]
    async fn get_cluster_subnets(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<ClusterSubnets>, Status> {
        guarded(METHOD_GET_CLUSTER_SUBNETS, async {
            let session = self.current()?;
            let collected = subnets::aggregate(session.as_ref(), self.subnet_window).await?;
            Ok(Response::new(collected))
        })
        .await
    }

    #[instrument(skip(self, request), fields(rpc = "SetLogLevel"))]
    async fn set_log_level(
        &self,
        request: Request<LogLevelRequest>,
    ) -> Result<Response<Empty>, Status> {
        guarded(METHOD_SET_LOG_LEVEL, async {
            let req = request.into_inner();
            let duration = req
                .duration
                .map(Duration::try_from)
                .transpose()
                .map_err(|e| Status::invalid_argument(format!("invalid duration: {e}")))?
                .unwrap_or_default();

            level_cache::set_and_store(
                &self.logging_dir,
                PROCESS_NAME,
                &self.level,
                &req.log_level,
                duration,
            )
            .map_err(|e| match e {
                clusterlink_core::Error::InvalidLevel(_) => Status::invalid_argument(e.to_string()),
                other => Status::internal(other.to_string()),
            })?;
            Ok(Response::new(Empty {}))
        })
        .await
    }
}
