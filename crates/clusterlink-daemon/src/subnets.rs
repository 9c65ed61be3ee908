//! Collects a cluster's pod and service subnets from the session's cluster
//! info stream.
//!
//! The stream may spread one cluster's subnets over several updates and never
//! says when it has sent everything. Collection therefore runs for a fixed
//! window; whatever has arrived when the window closes is the answer.

use std::time::Duration;

use tokio::time::Instant;
use tokio_stream::StreamExt;
use tonic::Status;
use tracing::debug;

use clusterlink_proto::daemon::ClusterSubnets;

use crate::session::Session;

/// How long to listen for cluster info updates.
pub const CLUSTER_INFO_WINDOW: Duration = Duration::from_secs(5);

/// Gather subnets from `session` for at most `window`.
///
/// Ends early when the stream ends. A stream error before the window closes
/// is returned; an error at or after the deadline ends collection with the
/// subnets gathered so far.
pub async fn aggregate(session: &dyn Session, window: Duration) -> Result<ClusterSubnets, Status> {
    let deadline = Instant::now() + window;
    let mut subnets = ClusterSubnets::default();

    let Ok(opened) = tokio::time::timeout_at(deadline, session.watch_cluster_info()).await else {
        debug!("Cluster info stream did not open within the window");
        return Ok(subnets);
    };
    let mut stream = opened?;

    loop {
        match tokio::time::timeout_at(deadline, stream.next()).await {
            Err(_) => {
                debug!("Cluster info window closed");
                break;
            }
            Ok(None) => break,
            Ok(Some(Ok(info))) => {
                if let Some(svc) = info.service_subnet {
                    subnets.svc_subnets.push(svc);
                }
                subnets.pod_subnets.extend(info.pod_subnets);
            }
            Ok(Some(Err(status))) => {
                if Instant::now() >= deadline {
                    break;
                }
                return Err(status);
            }
        }
    }

    debug!(
        pod_subnets = subnets.pod_subnets.len(),
        svc_subnets = subnets.svc_subnets.len(),
        "Collected cluster subnets"
    );
    Ok(subnets)
}
