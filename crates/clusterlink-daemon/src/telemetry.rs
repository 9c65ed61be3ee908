//! Usage reporting for daemon actions.
//!
//! RPC handlers report what they did through a [`ReporterHandle`]; the
//! `telemetry` task owns the [`Reporter`], counts actions and emits them as
//! structured events on the `telemetry` target. With the `metrics` feature the
//! counts are also exported as an `OpenTelemetry` counter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Reports buffered before new ones are dropped.
const QUEUE_SIZE: usize = 64;

/// An action worth counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Connect,
    ConnectFailed,
    Disconnect,
    Quit,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::ConnectFailed => "connect_failed",
            Self::Disconnect => "disconnect",
            Self::Quit => "quit",
        }
    }
}

/// Per-action totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub connect: u64,
    pub connect_failed: u64,
    pub disconnect: u64,
    pub quit: u64,
    /// Reports lost because the queue was full.
    pub dropped: u64,
}

impl Totals {
    fn record(&mut self, action: Action) {
        let slot = match action {
            Action::Connect => &mut self.connect,
            Action::ConnectFailed => &mut self.connect_failed,
            Action::Disconnect => &mut self.disconnect,
            Action::Quit => &mut self.quit,
        };
        *slot += 1;
    }
}

/// Create a reporter and the handle used to feed it.
pub fn channel() -> (ReporterHandle, Reporter) {
    let (tx, rx) = mpsc::channel(QUEUE_SIZE);
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ReporterHandle {
        tx,
        dropped: Arc::clone(&dropped),
    };
    let reporter = Reporter {
        rx,
        dropped,
        totals: Totals::default(),
        #[cfg(feature = "metrics")]
        counter: opentelemetry::global::meter("clusterlink-daemon")
            .u64_counter("clusterlink.daemon.actions")
            .with_description("Daemon actions by kind")
            .build(),
    };
    (handle, reporter)
}

/// Cheap, cloneable sender side of the reporter.
#[derive(Clone)]
pub struct ReporterHandle {
    tx: mpsc::Sender<Action>,
    dropped: Arc<AtomicU64>,
}

impl ReporterHandle {
    /// Queue `action`. Never waits; a report that does not fit is counted as
    /// dropped.
    pub fn report(&self, action: Action) {
        if self.tx.try_send(action).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Drains reports until shutdown.
pub struct Reporter {
    rx: mpsc::Receiver<Action>,
    dropped: Arc<AtomicU64>,
    totals: Totals,
    #[cfg(feature = "metrics")]
    counter: opentelemetry::metrics::Counter<u64>,
}

impl Reporter {
    /// Record reports until `root` is cancelled, then return the totals.
    pub async fn run(mut self, root: CancellationToken) -> Totals {
        loop {
            tokio::select! {
                () = root.cancelled() => break,
                action = self.rx.recv() => match action {
                    Some(action) => self.record(action),
                    None => {
                        root.cancelled().await;
                        break;
                    }
                },
            }
        }
        while let Ok(action) = self.rx.try_recv() {
            self.record(action);
        }

        self.totals.dropped = self.dropped.load(Ordering::Relaxed);
        let t = self.totals;
        info!(
            target: "telemetry",
            connect = t.connect,
            connect_failed = t.connect_failed,
            disconnect = t.disconnect,
            quit = t.quit,
            dropped = t.dropped,
            "Action totals"
        );
        t
    }

    fn record(&mut self, action: Action) {
        self.totals.record(action);
        #[cfg(feature = "metrics")]
        self.counter
            .add(1, &[opentelemetry::KeyValue::new("action", action.as_str())]);
        info!(target: "telemetry", action = action.as_str(), "Action reported");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_reported_actions() {
        let (handle, reporter) = channel();
        let root = CancellationToken::new();
        let task = tokio::spawn(reporter.run(root.clone()));

        handle.report(Action::Connect);
        handle.report(Action::Disconnect);
        handle.report(Action::Connect);
        handle.report(Action::Quit);
        root.cancel();

        let totals = task.await.unwrap();
        assert_eq!(totals.connect, 2);
        assert_eq!(totals.disconnect, 1);
        assert_eq!(totals.quit, 1);
        assert_eq!(totals.connect_failed, 0);
        assert_eq!(totals.dropped, 0);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (handle, reporter) = channel();
        for _ in 0..QUEUE_SIZE + 3 {
            handle.report(Action::ConnectFailed);
        }

        let root = CancellationToken::new();
        root.cancel();
        let totals = reporter.run(root).await;
        assert_eq!(totals.connect_failed, QUEUE_SIZE as u64);
        assert_eq!(totals.dropped, 3);
    }

    #[test]
    fn action_names_are_stable() {
        assert_eq!(Action::ConnectFailed.as_str(), "connect_failed");
        assert_eq!(Action::Quit.as_str(), "quit");
    }
}
