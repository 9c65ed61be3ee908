//! Runs the daemon's long-lived tasks under one cancellation root.
//!
//! The first task to stop, for whatever reason, brings the daemon down: the
//! root token is cancelled and the other tasks get [`SOFT_SHUTDOWN_TIMEOUT`]
//! to finish before they are aborted. The first task error (a panic counts)
//! is kept as the reason the daemon stopped.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Grace period between cancelling the root and aborting remaining tasks.
pub const SOFT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Error type a supervised task may return.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Why the daemon stopped.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("{task} failed: {source}")]
    Task {
        task: &'static str,
        #[source]
        source: TaskError,
    },

    #[error("{task} panicked: {message}")]
    Panic { task: &'static str, message: String },
}

impl SupervisorError {
    /// Name of the task that failed.
    pub const fn task(&self) -> &'static str {
        match self {
            Self::Task { task, .. } | Self::Panic { task, .. } => task,
        }
    }
}

type TaskOutcome = (&'static str, Result<(), SupervisorError>);

/// Owner of the root token and the supervised tasks.
pub struct Supervisor {
    root: CancellationToken,
    tasks: JoinSet<TaskOutcome>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    /// The root token. Cancelling it shuts the daemon down.
    pub fn root(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Start a supervised task.
    pub fn spawn<F, E>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<TaskError>,
    {
        debug!(task = name, "Starting task");
        self.tasks.spawn(async move {
            let result = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(SupervisorError::Task {
                    task: name,
                    source: e.into(),
                }),
                Err(panic) => Err(SupervisorError::Panic {
                    task: name,
                    message: panic_message(panic.as_ref()),
                }),
            };
            (name, result)
        });
    }

    /// Wait for the first task to stop or for a shutdown signal, then shut
    /// everything down. Returns the first task error, if any.
    pub async fn wait(mut self) -> Result<(), SupervisorError> {
        let mut cause = None;

        tokio::select! {
            () = self.root.cancelled() => info!("Shutdown requested"),
            () = shutdown_signal() => {}
            joined = self.tasks.join_next() => {
                if let Some(joined) = joined {
                    if let Ok((task, Ok(()))) = &joined {
                        info!(task, "Task exited; shutting down");
                    }
                    record(joined, &mut cause);
                }
            }
        }
        self.root.cancel();

        let deadline = Instant::now() + SOFT_SHUTDOWN_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(joined)) => record(joined, &mut cause),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        remaining = self.tasks.len(),
                        "Tasks still running after grace period; aborting"
                    );
                    self.tasks.abort_all();
                    while self.tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        cause.map_or(Ok(()), Err)
    }
}

fn record(joined: Result<TaskOutcome, JoinError>, cause: &mut Option<SupervisorError>) {
    match joined {
        Ok((task, Ok(()))) => debug!(task, "Task finished"),
        Ok((_, Err(e))) => {
            error!(task = e.task(), error = %e, "Task failed");
            if cause.is_none() {
                *cause = Some(e);
            }
        }
        Err(e) => debug!(error = %e, "Task aborted"),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Resolves on SIGINT or SIGTERM (Ctrl+C elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = ctrl_c() => {}
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn fail(msg: &str) -> Result<(), TaskError> {
        Err(msg.to_string().into())
    }

    fn explode() -> Result<(), TaskError> {
        panic!("kaboom")
    }

    #[tokio::test(start_paused = true)]
    async fn first_error_is_the_cause() {
        let mut sup = Supervisor::new();
        let root = sup.root();

        sup.spawn("first", async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            fail("boom")
        });
        {
            let root = root.clone();
            sup.spawn("second", async move {
                root.cancelled().await;
                fail("also broken")
            });
        }
        {
            let root = root.clone();
            sup.spawn("clean", async move {
                root.cancelled().await;
                Ok::<_, TaskError>(())
            });
        }

        let err = sup.wait().await.unwrap_err();
        assert_eq!(err.task(), "first");
        assert!(err.to_string().contains("boom"));
        assert!(root.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn clean_exit_shuts_everything_down() {
        let mut sup = Supervisor::new();
        let root = sup.root();
        sup.spawn("done", async { Ok::<_, TaskError>(()) });
        {
            let root = root.clone();
            sup.spawn("waiter", async move {
                root.cancelled().await;
                Ok::<_, TaskError>(())
            });
        }

        assert!(sup.wait().await.is_ok());
        assert!(root.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn quit_through_root_is_clean() {
        let mut sup = Supervisor::new();
        let root = sup.root();
        {
            let root = root.clone();
            sup.spawn("server", async move {
                root.cancelled().await;
                Ok::<_, TaskError>(())
            });
        }
        root.cancel();
        assert!(sup.wait().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_is_aborted_after_grace_period() {
        struct SetOnDrop(Arc<AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let mut sup = Supervisor::new();
        {
            let guard = SetOnDrop(Arc::clone(&dropped));
            sup.spawn("stuck", async move {
                let _guard = guard;
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<_, TaskError>(())
            });
        }
        sup.spawn("failing", async { fail("fatal") });

        let start = Instant::now();
        let err = sup.wait().await.unwrap_err();
        let elapsed = start.elapsed();

        assert_eq!(err.task(), "failing");
        assert!(elapsed >= SOFT_SHUTDOWN_TIMEOUT);
        assert!(elapsed < Duration::from_secs(60));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_is_fatal() {
        let mut sup = Supervisor::new();
        let root = sup.root();
        sup.spawn("boom", async { explode() });

        let err = sup.wait().await.unwrap_err();
        assert!(matches!(err, SupervisorError::Panic { task: "boom", ref message } if message == "kaboom"));
        assert!(root.is_cancelled());
    }
}
