//! Scriptable sessions and factories for unit tests.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use clusterlink_proto::SessionInfo;
use clusterlink_proto::daemon::OutboundInfo;
use clusterlink_proto::manager::ClusterInfo;

use crate::session::{ClusterInfoStream, Session, SessionError, SessionFactory};

/// A delayed element of a scripted cluster info stream.
pub type FeedItem = (Duration, Result<ClusterInfo, Status>);

/// How a mock session's cluster info stream behaves.
#[derive(Clone)]
pub enum ClusterFeed {
    /// Yield each item after its delay, then end.
    Finite(Vec<FeedItem>),
    /// Yield each item after its delay, then stay open forever.
    Endless(Vec<FeedItem>),
    /// Fail to open the stream.
    OpenError(Status),
    /// Never finish opening the stream.
    OpenHang,
}

impl Default for ClusterFeed {
    fn default() -> Self {
        Self::Finite(Vec::new())
    }
}

fn feed_stream(items: Vec<FeedItem>, endless: bool) -> ClusterInfoStream {
    let items = futures::stream::iter(items).then(|(delay, item)| async move {
        tokio::time::sleep(delay).await;
        item
    });
    if endless {
        Box::pin(items.chain(futures::stream::pending()))
    } else {
        Box::pin(items)
    }
}

/// Connect arguments for session `id`.
pub fn outbound(id: &str) -> OutboundInfo {
    OutboundInfo {
        session: Some(SessionInfo {
            session_id: id.to_string(),
            cluster_id: "test-cluster".to_string(),
        }),
        manager_address: "127.0.0.1:8081".to_string(),
        ..Default::default()
    }
}

/// Poll `cond` every 10ms until it holds. Panics after ten seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// A session that runs until cancelled and serves a scripted feed.
pub struct MockSession {
    info: OutboundInfo,
    feed: ClusterFeed,
    run_error: Option<String>,
    panic_on_search_path: bool,
    runs: AtomicUsize,
    search_path: Mutex<Option<(Vec<String>, Vec<String>)>>,
}

impl MockSession {
    pub fn new(info: OutboundInfo) -> Self {
        Self {
            info,
            feed: ClusterFeed::default(),
            run_error: None,
            panic_on_search_path: false,
            runs: AtomicUsize::new(0),
            search_path: Mutex::new(None),
        }
    }

    pub fn arc(id: &str) -> Arc<dyn Session> {
        Arc::new(Self::new(outbound(id)))
    }

    pub fn with_feed(mut self, feed: ClusterFeed) -> Self {
        self.feed = feed;
        self
    }

    /// How many times `run` has been entered.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn search_path(&self) -> Option<(Vec<String>, Vec<String>)> {
        self.search_path.lock().unwrap().clone()
    }
}

#[tonic::async_trait]
impl Session for MockSession {
    async fn run(&self, cancel: CancellationToken) -> Result<(), SessionError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = &self.run_error {
            return Err(SessionError::Unreachable(msg.clone()));
        }
        cancel.cancelled().await;
        Ok(())
    }

    fn outbound_info(&self) -> OutboundInfo {
        self.info.clone()
    }

    async fn set_search_path(&self, paths: Vec<String>, namespaces: Vec<String>) {
        assert!(!self.panic_on_search_path, "search path rejected");
        *self.search_path.lock().unwrap() = Some((paths, namespaces));
    }

    async fn watch_cluster_info(&self) -> Result<ClusterInfoStream, Status> {
        match self.feed.clone() {
            ClusterFeed::Finite(items) => Ok(feed_stream(items, false)),
            ClusterFeed::Endless(items) => Ok(feed_stream(items, true)),
            ClusterFeed::OpenError(status) => Err(status),
            ClusterFeed::OpenHang => futures::future::pending().await,
        }
    }
}

/// A factory producing [`MockSession`]s, optionally slowly or not at all.
#[derive(Default)]
pub struct MockFactory {
    delay: Duration,
    error: Option<String>,
    run_error: Option<String>,
    panic_on_search_path: bool,
    feed: ClusterFeed,
    attempts: AtomicUsize,
    created: Mutex<Vec<Arc<MockSession>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `delay` to create each session.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every creation with an unreachable error.
    pub fn failing(mut self, msg: &str) -> Self {
        self.error = Some(msg.to_string());
        self
    }

    /// Sessions fail as soon as they start running.
    pub fn with_run_error(mut self, msg: &str) -> Self {
        self.run_error = Some(msg.to_string());
        self
    }

    /// Sessions panic when given a search path.
    pub fn panicking_sessions(mut self) -> Self {
        self.panic_on_search_path = true;
        self
    }

    pub fn with_feed(mut self, feed: ClusterFeed) -> Self {
        self.feed = feed;
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<Arc<MockSession>> {
        self.created.lock().unwrap().clone()
    }
}

#[tonic::async_trait]
impl SessionFactory for MockFactory {
    async fn create(
        &self,
        info: OutboundInfo,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn Session>, SessionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SessionError::Cancelled),
            () = tokio::time::sleep(self.delay) => {}
        }
        if let Some(msg) = &self.error {
            return Err(SessionError::Unreachable(msg.clone()));
        }

        let mut session = MockSession::new(info).with_feed(self.feed.clone());
        session.run_error.clone_from(&self.run_error);
        session.panic_on_search_path = self.panic_on_search_path;
        let session = Arc::new(session);
        self.created.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }
}
