//! clusterlink Daemon Library
//!
//! Core functionality for the privileged clusterlink daemon:
//! - Connection broker owning the single tunnel session
//! - gRPC control plane for local clients
//! - Cluster subnet aggregation over the traffic manager's info stream
//! - Config hot reload and timed log levels
//! - Task supervision with graceful shutdown

pub mod broker;
pub mod config_watch;
pub mod daemon;
pub mod listener;
pub mod server;
pub mod session;
pub mod slot;
pub mod subnets;
pub mod supervisor;
pub mod telemetry;

#[cfg(test)]
mod test_support;
