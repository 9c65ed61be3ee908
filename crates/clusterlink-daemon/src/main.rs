//! clusterlink Daemon
//!
//! The privileged half of clusterlink: owns the tunnel session to the
//! cluster's traffic manager and serves the control plane that local clients
//! use to connect, disconnect and inspect it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use clusterlink_core::config::{self, load_config};
use clusterlink_core::timed_level::LevelSetter;
use clusterlink_core::tracing_init::{self, TracingOptions};
use clusterlink_core::{TimedLevel, level_cache};
use clusterlink_daemon::daemon::{self, DaemonOptions};
use clusterlink_daemon::listener::{ListenAddr, Listener};
use clusterlink_daemon::server::{PROCESS_NAME, ServerConfig};
use clusterlink_daemon::session::ManagerSessionFactory;

#[derive(Parser, Debug)]
#[command(name = "clusterlink-daemon")]
#[command(version, about = "clusterlink daemon - cluster tunnel broker")]
struct Args {
    /// Directory for the daemon log and the log level cache
    #[arg(env = "CLUSTERLINK_LOGGING_DIR")]
    logging_dir: Option<PathBuf>,

    /// Directory holding config.toml
    #[arg(env = "CLUSTERLINK_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Unix socket to serve the control plane on
    #[cfg(unix)]
    #[arg(
        long,
        default_value = clusterlink_daemon::listener::DEFAULT_SOCKET_PATH,
        env = "CLUSTERLINK_SOCKET"
    )]
    socket: PathBuf,

    /// Serve on this TCP address instead of the Unix socket
    #[arg(long, env = "CLUSTERLINK_TCP_ADDR")]
    tcp: Option<SocketAddr>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "CLUSTERLINK_LOG_JSON")]
    log_json: bool,

    /// OpenTelemetry OTLP endpoint for traces and metrics export
    /// (e.g. `http://localhost:4317`). Requires the `metrics` feature.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "CLUSTERLINK_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,
}

impl Args {
    fn listen_addr(&self) -> ListenAddr {
        if let Some(addr) = self.tcp {
            return ListenAddr::Tcp(addr);
        }
        #[cfg(unix)]
        {
            ListenAddr::Unix(self.socket.clone())
        }
        #[cfg(not(unix))]
        {
            ListenAddr::default()
        }
    }
}

#[cfg(unix)]
fn ensure_root() -> anyhow::Result<()> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        anyhow::bail!("clusterlink-daemon must run with elevated privileges")
    }
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
const fn ensure_root() -> anyhow::Result<()> {
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    ensure_root()?;

    let logging_dir = args
        .logging_dir
        .clone()
        .or_else(config::default_logging_dir)
        .context("Cannot determine logging directory")?;
    let config_dir = args
        .config_dir
        .clone()
        .or_else(config::default_config_dir)
        .context("Cannot determine config directory")?;
    let config_file = config::config_file(&config_dir);

    let cfg = load_config(&config_file)
        .with_context(|| format!("Failed to load {}", config_file.display()))?;
    let default_level = cfg.root_daemon_level()?;

    std::fs::create_dir_all(&logging_dir)
        .with_context(|| format!("Failed to create {}", logging_dir.display()))?;
    let log_file = logging_dir.join("daemon.log");
    let options = TracingOptions {
        default_level,
        log_json: args.log_json,
        log_file: Some(&log_file),
    };

    // Hold the guard so the OTel pipeline stays alive for the process lifetime.
    #[cfg(feature = "metrics")]
    let (levels, metrics_guard) = tracing_init::init_tracing_with_metrics(
        options,
        args.metrics_endpoint.as_deref(),
        "clusterlink-daemon",
    )
    .context("Failed to initialise tracing")?;
    #[cfg(not(feature = "metrics"))]
    let levels = tracing_init::init_tracing(options).context("Failed to initialise tracing")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        logging_dir = %logging_dir.display(),
        config = %config_file.display(),
        "Starting clusterlink-daemon"
    );

    let setter: LevelSetter = Arc::new(move |level| {
        if let Err(e) = levels.apply(level) {
            warn!(error = %e, "Failed to apply log level");
        }
    });
    let level = TimedLevel::new(default_level, setter);
    if let Err(e) = level_cache::load_into(&logging_dir, PROCESS_NAME, &level) {
        warn!(error = %e, "Ignoring unreadable log level cache");
    }

    let server = match args.listen_addr() {
        #[cfg(unix)]
        ListenAddr::Unix(path) => ServerConfig::unix(path),
        ListenAddr::Tcp(addr) => ServerConfig::tcp(addr),
    }
    .with_max_receive_size(cfg.grpc.max_receive_size);

    let listener = Listener::bind(&server.listen)
        .await
        .with_context(|| format!("Failed to listen on {}", server.listen))?;

    // Notify systemd that the daemon is ready to serve (unix only).
    #[cfg(unix)]
    sd_notify::notify(false, &[sd_notify::NotifyState::Ready])?;

    let (config_tx, config_rx) = watch::channel(Arc::new(cfg));
    let supervisor = daemon::start(
        listener,
        DaemonOptions {
            logging_dir,
            config_file,
            server,
            config_tx,
            level,
            factory: Arc::new(ManagerSessionFactory::new(config_rx)),
        },
    );
    let result = supervisor.wait().await;

    #[cfg(feature = "metrics")]
    if let Some(guard) = metrics_guard
        && let Err(e) = guard.shutdown()
    {
        warn!(error = %e, "Failed to flush telemetry");
    }

    match result {
        Ok(()) => {
            info!("Daemon stopped");
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("clusterlink-daemon quit")),
    }
}
