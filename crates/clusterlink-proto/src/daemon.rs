//! Messages and service code for the `clusterlink.daemon.Daemon` service.

pub use crate::common::{Empty, IpNet, SessionInfo};

/// Version identifiers reported by `Version`.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct VersionInfo {
    #[prost(int32, tag = "1")]
    pub api_version: i32,
    #[prost(string, tag = "2")]
    pub version: String,
    #[prost(string, tag = "3")]
    pub executable: String,
}

/// DNS settings for an outbound session.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DnsConfig {
    #[prost(bytes = "vec", tag = "1")]
    pub local_ip: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub remote_ip: Vec<u8>,
    #[prost(string, repeated, tag = "3")]
    pub exclude_suffixes: Vec<String>,
    #[prost(string, repeated, tag = "4")]
    pub include_suffixes: Vec<String>,
    #[prost(message, optional, tag = "5")]
    pub lookup_timeout: Option<::prost_types::Duration>,
}

/// Everything needed to establish an outbound session.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OutboundInfo {
    #[prost(message, optional, tag = "1")]
    pub session: Option<SessionInfo>,
    /// `host:port` of the traffic manager.
    #[prost(string, tag = "2")]
    pub manager_address: String,
    #[prost(bytes = "vec", tag = "3")]
    pub kube_dns_ip: Vec<u8>,
    #[prost(message, repeated, tag = "4")]
    pub also_proxy_subnets: Vec<IpNet>,
    #[prost(message, repeated, tag = "5")]
    pub never_proxy_subnets: Vec<IpNet>,
    #[prost(message, optional, tag = "6")]
    pub dns: Option<DnsConfig>,
    #[prost(string, tag = "7")]
    pub home_dir: String,
}

/// Result of `Status`. `outbound_config` is absent when no session exists.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DaemonStatus {
    #[prost(message, optional, tag = "1")]
    pub outbound_config: Option<OutboundInfo>,
}

/// Argument of `SetDnsSearchPath`.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Paths {
    #[prost(string, repeated, tag = "1")]
    pub paths: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub namespaces: Vec<String>,
}

/// Result of `GetClusterSubnets`.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ClusterSubnets {
    #[prost(message, repeated, tag = "1")]
    pub pod_subnets: Vec<IpNet>,
    #[prost(message, repeated, tag = "2")]
    pub svc_subnets: Vec<IpNet>,
}

/// Argument of `SetLogLevel`. A missing or zero duration means "until changed".
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogLevelRequest {
    #[prost(string, tag = "1")]
    pub log_level: String,
    #[prost(message, optional, tag = "2")]
    pub duration: Option<::prost_types::Duration>,
}

include!(concat!(env!("OUT_DIR"), "/clusterlink.daemon.Daemon.rs"));
