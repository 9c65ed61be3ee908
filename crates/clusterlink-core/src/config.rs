//! Configuration for the clusterlink daemon.
//!
//! Resolution order (lowest to highest priority):
//! 1. Built-in defaults
//! 2. The config file (`<config dir>/config.toml`)
//! 3. Environment variables
//!
//! The file is optional; a missing file yields the defaults. The daemon
//! watches the file's directory and reloads it on change.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::level_filters::LevelFilter;

use crate::error::{Error, Result};
use crate::timed_level::parse_level;

/// Name of the config file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Complete clusterlink configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub log_levels: LogLevels,
    #[serde(default)]
    pub grpc: GrpcConfig,
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// Log levels per process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogLevels {
    /// Level of the privileged root daemon.
    pub root_daemon: String,
}

impl Default for LogLevels {
    fn default() -> Self {
        Self {
            root_daemon: "info".to_string(),
        }
    }
}

/// gRPC server tuning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcConfig {
    /// Maximum size of a decoded request message. Unset means tonic's default.
    pub max_receive_size: Option<usize>,
}

/// Timeouts used when talking to the traffic manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub manager_connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            manager_connect_secs: 10,
        }
    }
}

impl Timeouts {
    pub const fn manager_connect(&self) -> Duration {
        Duration::from_secs(self.manager_connect_secs)
    }
}

impl Config {
    /// The root daemon's configured level.
    ///
    /// Always valid for a config produced by [`load_config`].
    pub fn root_daemon_level(&self) -> Result<LevelFilter> {
        parse_level(&self.log_levels.root_daemon)
    }
}

/// Path of the config file inside `config_dir`.
pub fn config_file(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Default config directory when none is given on the command line.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("clusterlink"))
}

/// Default logging directory when none is given on the command line.
pub fn default_logging_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir().map(|h| h.join("Library/Logs/clusterlink"))
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir().map(|d| d.join("clusterlink"))
    }
}

/// Load the configuration file at `path`, falling back to defaults when the
/// file does not exist, then apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        load_config_file(path)?
    } else {
        Config::default()
    };
    apply_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    Ok(toml::from_str(&content)?)
}

/// Apply `CLUSTERLINK_*` overrides looked up through `var`.
fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(val) = var("CLUSTERLINK_LOG_LEVEL") {
        config.log_levels.root_daemon = val;
    }
    if let Some(n) = var("CLUSTERLINK_GRPC_MAX_RECEIVE_SIZE").and_then(|v| v.parse().ok()) {
        config.grpc.max_receive_size = Some(n);
    }
}

fn validate(config: &Config) -> Result<()> {
    config.root_daemon_level()?;
    if config.grpc.max_receive_size == Some(0) {
        return Err(Error::Config(
            "grpc.max_receive_size must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&config_file(dir.path())).unwrap();
        assert_eq!(config.log_levels.root_daemon, "info");
        assert_eq!(config.timeouts.manager_connect(), Duration::from_secs(10));
        assert!(config.grpc.max_receive_size.is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file(dir.path());
        std::fs::write(&path, "[log_levels]\nroot_daemon = \"debug\"\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.root_daemon_level().unwrap(), LevelFilter::DEBUG);
        assert_eq!(config.timeouts.manager_connect_secs, 10);
    }

    #[test]
    fn grpc_receive_size_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file(dir.path());
        std::fs::write(&path, "[grpc]\nmax_receive_size = 1048576\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.grpc.max_receive_size, Some(1_048_576));
    }

    #[test]
    fn invalid_level_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file(dir.path());
        std::fs::write(&path, "[log_levels]\nroot_daemon = \"chatty\"\n").unwrap();

        assert!(matches!(load_config(&path), Err(Error::InvalidLevel(_))));
    }

    #[test]
    fn malformed_file_is_toml_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file(dir.path());
        std::fs::write(&path, "log_levels = [").unwrap();

        assert!(matches!(load_config(&path), Err(Error::Toml(_))));
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut config = Config::default();
        apply_overrides(&mut config, |key| match key {
            "CLUSTERLINK_LOG_LEVEL" => Some("trace".to_string()),
            "CLUSTERLINK_GRPC_MAX_RECEIVE_SIZE" => Some("2048".to_string()),
            _ => None,
        });
        assert_eq!(config.log_levels.root_daemon, "trace");
        assert_eq!(config.grpc.max_receive_size, Some(2048));
    }

    #[test]
    fn unparseable_size_override_is_ignored() {
        let mut config = Config::default();
        apply_overrides(&mut config, |key| {
            (key == "CLUSTERLINK_GRPC_MAX_RECEIVE_SIZE").then(|| "lots".to_string())
        });
        assert!(config.grpc.max_receive_size.is_none());
    }

    #[test]
    fn zero_receive_size_is_rejected() {
        let config = Config {
            grpc: GrpcConfig {
                max_receive_size: Some(0),
            },
            ..Config::default()
        };
        assert!(validate(&config).is_err());
    }
}
