//! clusterlink Protocol Buffers
//!
//! Message types and generated gRPC code for the clusterlink daemon.
//!
//! This crate contains:
//! - `daemon::Daemon`, the control plane served by the privileged daemon
//! - `manager::Manager`, the subset of the traffic manager API a session uses
//! - shared messages in [`common`]

#![allow(clippy::derive_partial_eq_without_eq)]

pub mod common;
pub mod daemon;
pub mod manager;
pub mod methods;

pub use common::{Empty, IpNet, SessionInfo};

// Re-export prost_types for downstream crates that need Duration conversion
pub use prost_types;
