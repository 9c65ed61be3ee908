//! Hot reload of the daemon's config file.
//!
//! Editors often save by writing a temporary file and renaming it over the
//! original, which a watch on the file itself would miss. The watcher
//! therefore observes the file's directory and filters events by file name.
//! A burst of events from one save is collapsed into a single reload by a
//! short resettable delay.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use clusterlink_core::config::load_config;
use clusterlink_core::{Config, TimedLevel};

/// Quiet period after the last event before the config is reloaded.
pub const RELOAD_DELAY: Duration = Duration::from_millis(5);

/// Errors that prevent the watch from being established.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("config file {0} has no parent directory")]
    NoParent(PathBuf),

    #[error("failed to watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Loads the config file and applies it to the running daemon.
pub struct ConfigReloader {
    path: PathBuf,
    config_tx: watch::Sender<Arc<Config>>,
    level: TimedLevel,
}

impl ConfigReloader {
    pub const fn new(path: PathBuf, config_tx: watch::Sender<Arc<Config>>, level: TimedLevel) -> Self {
        Self {
            path,
            config_tx,
            level,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload the file, publish the new config and apply its log level.
    ///
    /// On error the current config stays in effect.
    pub fn reload(&self) -> clusterlink_core::Result<()> {
        let config = load_config(&self.path)?;
        let level = config.root_daemon_level()?;
        self.level.set_default(level);
        self.config_tx.send_replace(Arc::new(config));
        info!(path = %self.path.display(), %level, "Reloaded config");
        Ok(())
    }

    fn reload_logged(&self) {
        if let Err(e) = self.reload() {
            warn!(path = %self.path.display(), error = %e, "Failed to reload config");
        }
    }
}

/// Watch the config file's directory and reload on change until `root` is
/// cancelled. The directory is created if it does not exist.
pub async fn watch_config(reloader: ConfigReloader, root: CancellationToken) -> Result<(), WatchError> {
    let path = reloader.path().to_path_buf();
    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .ok_or_else(|| WatchError::NoParent(path.clone()))?;
    std::fs::create_dir_all(dir)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
        // Receiver gone means the loop below has exited.
        let _ = tx.send(event);
    })
    .map_err(|source| WatchError::Notify {
        path: dir.to_path_buf(),
        source,
    })?;
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|source| WatchError::Notify {
            path: dir.to_path_buf(),
            source,
        })?;
    info!(dir = %dir.display(), "Watching config directory");

    debounce_events(rx, &path, RELOAD_DELAY, &root, || reloader.reload_logged()).await;
    drop(watcher);
    Ok(())
}

/// Whether `event` creates or writes the file named like `file`.
fn is_config_change(event: &Event, file: &Path) -> bool {
    let relevant = matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Modify(
                ModifyKind::Any
                    | ModifyKind::Data(_)
                    | ModifyKind::Name(RenameMode::To | RenameMode::Both)
            )
    );
    relevant
        && file.file_name().is_some_and(|name| {
            event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(name))
        })
}

/// Call `on_change` once `delay` has passed without further relevant events.
async fn debounce_events(
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    file: &Path,
    delay: Duration,
    root: &CancellationToken,
    mut on_change: impl FnMut(),
) {
    let timer = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(timer);
    let mut armed = false;
    let mut events_open = true;

    loop {
        tokio::select! {
            () = root.cancelled() => return,
            () = &mut timer, if armed => {
                armed = false;
                on_change();
            }
            event = events.recv(), if events_open => match event {
                Some(Ok(event)) => {
                    if is_config_change(&event, file) {
                        debug!(kind = ?event.kind, "Config file changed");
                        timer.as_mut().reset(Instant::now() + delay);
                        armed = true;
                    }
                }
                Some(Err(e)) => warn!(error = %e, "Config watcher error"),
                None => {
                    warn!("Config watcher stopped delivering events");
                    events_open = false;
                }
            },
        }
    }
}
