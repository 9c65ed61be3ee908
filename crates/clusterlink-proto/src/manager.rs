//! Messages and client code for the `clusterlink.manager.Manager` service.

pub use crate::common::{Empty, IpNet, SessionInfo};

/// Keep-alive sent by a connected session.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct RemainRequest {
    #[prost(message, optional, tag = "1")]
    pub session: Option<SessionInfo>,
}

/// One update on the `WatchClusterInfo` stream. The manager may split the
/// subnets of a cluster across several updates.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ClusterInfo {
    #[prost(message, optional, tag = "1")]
    pub service_subnet: Option<IpNet>,
    #[prost(message, repeated, tag = "2")]
    pub pod_subnets: Vec<IpNet>,
    #[prost(bytes = "vec", tag = "3")]
    pub kube_dns_ip: Vec<u8>,
}

include!(concat!(env!("OUT_DIR"), "/clusterlink.manager.Manager.rs"));
