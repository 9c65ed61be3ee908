//! `clusterlink` Core Library
//!
//! Shared functionality for the clusterlink daemon:
//! - Configuration file loading and environment overrides
//! - Tracing initialisation with a runtime-adjustable level
//! - Timed log-level overrides and their on-disk cache
//! - Common error types

pub mod config;
pub mod error;
pub mod level_cache;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod timed_level;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use timed_level::TimedLevel;
