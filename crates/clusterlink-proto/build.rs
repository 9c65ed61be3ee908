//! Build script for clusterlink-proto
//!
//! Generates the tonic client/server code for the `Daemon` and `Manager`
//! services. Message types are declared in Rust with `prost` derives, so the
//! services are described with tonic-build's manual builder and no `protoc`
//! is needed at build time.

use tonic_build::manual::{Builder, Method, Service};

const CODEC: &str = "tonic_prost::ProstCodec";

/// A unary method taking `input` and returning `output`.
fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(input)
        .output_type(output)
        .codec_path(CODEC)
        .build()
}

fn daemon_service() -> Service {
    const EMPTY: &str = "crate::daemon::Empty";

    Service::builder()
        .name("Daemon")
        .package("clusterlink.daemon")
        .comment("Control plane of the privileged clusterlink daemon.")
        .method(unary("version", "Version", EMPTY, "crate::daemon::VersionInfo"))
        .method(unary("status", "Status", EMPTY, "crate::daemon::DaemonStatus"))
        .method(unary("quit", "Quit", EMPTY, EMPTY))
        .method(unary(
            "set_dns_search_path",
            "SetDnsSearchPath",
            "crate::daemon::Paths",
            EMPTY,
        ))
        .method(unary("connect", "Connect", "crate::daemon::OutboundInfo", EMPTY))
        .method(unary("disconnect", "Disconnect", EMPTY, EMPTY))
        .method(unary(
            "get_cluster_subnets",
            "GetClusterSubnets",
            EMPTY,
            "crate::daemon::ClusterSubnets",
        ))
        .method(unary(
            "set_log_level",
            "SetLogLevel",
            "crate::daemon::LogLevelRequest",
            EMPTY,
        ))
        .build()
}

fn manager_service() -> Service {
    Service::builder()
        .name("Manager")
        .package("clusterlink.manager")
        .comment("Traffic manager running inside the cluster.")
        .method(unary(
            "remain",
            "Remain",
            "crate::manager::RemainRequest",
            "crate::manager::Empty",
        ))
        .method(unary(
            "depart",
            "Depart",
            "crate::manager::SessionInfo",
            "crate::manager::Empty",
        ))
        .method(
            Method::builder()
                .name("watch_cluster_info")
                .route_name("WatchClusterInfo")
                .input_type("crate::manager::SessionInfo")
                .output_type("crate::manager::ClusterInfo")
                .codec_path(CODEC)
                .server_streaming()
                .build(),
        )
        .build()
}

fn main() {
    // The `Connect` RPC would collide with the generated `DaemonClient::connect`
    // transport constructor; clients build their own `Channel` instead.
    Builder::new()
        .build_transport(false)
        .compile(&[daemon_service(), manager_service()]);
}
