//! Wires the daemon's components together and starts its tasks.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;

use clusterlink_core::{Config, TimedLevel};

use crate::broker;
use crate::config_watch::{ConfigReloader, watch_config};
use crate::listener::Listener;
use crate::server::{self, DaemonServiceImpl, ServerConfig};
use crate::session::SessionFactory;
use crate::slot::SessionSlot;
use crate::supervisor::Supervisor;
use crate::telemetry;

/// Everything the daemon needs besides its listener.
pub struct DaemonOptions {
    /// Directory holding the log file and the log level cache.
    pub logging_dir: PathBuf,
    /// The watched config file.
    pub config_file: PathBuf,
    pub server: ServerConfig,
    /// Publishes reloaded configs.
    pub config_tx: watch::Sender<Arc<Config>>,
    pub level: TimedLevel,
    pub factory: Arc<dyn SessionFactory>,
}

/// Start the `config-reload`, `session`, `server-grpc` and `telemetry` tasks.
///
/// Must be called from within a tokio runtime. Await [`Supervisor::wait`] on
/// the result to run the daemon to completion.
pub fn start(listener: Listener, options: DaemonOptions) -> Supervisor {
    let DaemonOptions {
        logging_dir,
        config_file,
        server,
        config_tx,
        level,
        factory,
    } = options;

    let mut supervisor = Supervisor::new();
    let root = supervisor.root();

    let slot = Arc::new(SessionSlot::new());
    let (broker_handle, broker) = broker::channel(Arc::clone(&slot), factory);
    let (reporter_handle, reporter) = telemetry::channel();
    let service = DaemonServiceImpl::new(
        slot,
        broker_handle,
        root.clone(),
        level.clone(),
        logging_dir,
        reporter_handle,
    );
    let reloader = ConfigReloader::new(config_file, config_tx, level);

    supervisor.spawn("config-reload", watch_config(reloader, root.clone()));
    supervisor.spawn("session", broker.run(root.clone()));
    supervisor.spawn(
        "server-grpc",
        server::serve(listener, service, server, root.clone()),
    );
    supervisor.spawn("telemetry", async move {
        reporter.run(root).await;
        Ok::<_, Infallible>(())
    });
    supervisor
}
