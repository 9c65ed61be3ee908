//! Connection broker: the only task that creates and runs sessions.
//!
//! RPC handlers never construct a session themselves. They admit a request in
//! the [`SessionSlot`], hand it to the broker through a single-slot queue and
//! wait on a one-shot reply. The broker creates the session, installs it,
//! answers, and then runs the session until it ends or is cancelled.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use clusterlink_proto::daemon::OutboundInfo;

use crate::session::{SessionError, SessionFactory};
use crate::slot::{SessionSlot, SlotError};

/// Result of session creation, delivered to the caller that asked for it.
pub type ConnectOutcome = Result<(), SessionError>;

/// A connect request waiting for the broker.
struct ConnectRequest {
    info: OutboundInfo,
    ticket: u64,
    reply: oneshot::Sender<ConnectOutcome>,
}

/// What happened to a connect request, seen from the caller.
#[derive(Debug)]
pub enum ConnectReply {
    /// The session is installed and running.
    Connected,
    /// The caller was cancelled before the broker answered.
    Abandoned,
    /// The session could not be created.
    Failed(SessionError),
}

/// Creates the broker and the handle the RPC layer submits requests with.
pub fn channel(
    slot: Arc<SessionSlot>,
    factory: Arc<dyn SessionFactory>,
) -> (BrokerHandle, ConnectionBroker) {
    let (tx, rx) = mpsc::channel(1);
    let handle = BrokerHandle {
        tx,
        slot: Arc::clone(&slot),
    };
    let broker = ConnectionBroker { rx, slot, factory };
    (handle, broker)
}

/// Submits connect requests to the broker.
#[derive(Clone)]
pub struct BrokerHandle {
    tx: mpsc::Sender<ConnectRequest>,
    slot: Arc<SessionSlot>,
}

impl BrokerHandle {
    /// Ask the broker for a session and wait for its answer.
    ///
    /// Fails straight away while a session is active or another request is
    /// in flight. When `cancel` fires first the request is abandoned and
    /// the broker will not install a session for it.
    pub async fn connect(
        &self,
        info: OutboundInfo,
        cancel: &CancellationToken,
    ) -> Result<ConnectReply, SlotError> {
        let permit = self.slot.begin_connect()?;
        let (reply, outcome) = oneshot::channel();
        let request = ConnectRequest {
            info,
            ticket: permit.ticket(),
            reply,
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(ConnectReply::Abandoned),
            sent = self.tx.send(request) => {
                if sent.is_err() {
                    return Ok(ConnectReply::Failed(SessionError::BrokerGone));
                }
            }
        }

        let reply = tokio::select! {
            biased;
            outcome = outcome => match outcome {
                Ok(Ok(())) => ConnectReply::Connected,
                Ok(Err(_)) | Err(_) if cancel.is_cancelled() => ConnectReply::Abandoned,
                Ok(Err(e)) => ConnectReply::Failed(e),
                Err(_) => ConnectReply::Failed(SessionError::BrokerGone),
            },
            () = cancel.cancelled() => ConnectReply::Abandoned,
        };
        drop(permit);
        Ok(reply)
    }
}

/// Owns session creation and the session's lifetime.
pub struct ConnectionBroker {
    rx: mpsc::Receiver<ConnectRequest>,
    slot: Arc<SessionSlot>,
    factory: Arc<dyn SessionFactory>,
}

impl ConnectionBroker {
    /// Serve connect requests until `root` is cancelled.
    pub async fn run(mut self, root: CancellationToken) -> Result<(), SessionError> {
        loop {
            let request = tokio::select! {
                () = root.cancelled() => return Ok(()),
                request = self.rx.recv() => match request {
                    Some(request) => request,
                    None => return Ok(()),
                },
            };
            self.serve(request, &root).await;
        }
    }

    async fn serve(&self, request: ConnectRequest, root: &CancellationToken) {
        let ConnectRequest {
            info,
            ticket,
            mut reply,
        } = request;
        let session_id = info
            .session
            .as_ref()
            .map(|s| s.session_id.clone())
            .unwrap_or_default();

        if reply.is_closed() {
            debug!(%session_id, "Discarding connect request abandoned by its caller");
            return;
        }

        let cancel = root.child_token();
        let created = tokio::select! {
            () = root.cancelled() => return,
            () = reply.closed() => {
                debug!(%session_id, "Caller left during session creation; abandoning it");
                cancel.cancel();
                return;
            }
            created = self.factory.create(info, cancel.clone()) => created,
        };
        let session = match created {
            Ok(session) => session,
            Err(e) => {
                warn!(%session_id, error = %e, "Failed to create session");
                if reply.send(Err(e)).is_err() {
                    debug!(%session_id, "Caller left before the failure was reported");
                }
                return;
            }
        };

        if !self.slot.activate(ticket, Arc::clone(&session), cancel.clone()) {
            debug!(%session_id, "Caller left during session creation; discarding session");
            cancel.cancel();
            return;
        }
        if reply.send(Ok(())).is_err() {
            debug!(%session_id, "Caller left before the session was reported; discarding session");
            self.slot.clear(ticket);
            cancel.cancel();
            return;
        }

        info!(%session_id, "Session started");
        match session.run(cancel.clone()).await {
            Ok(()) => info!(%session_id, "Session ended"),
            Err(e) => error!(%session_id, error = %e, "Session ended with error"),
        }
        cancel.cancel();
        self.slot.clear(ticket);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::{MockFactory, outbound, wait_until};

    fn start(factory: MockFactory) -> (BrokerHandle, Arc<SessionSlot>, Arc<MockFactory>, CancellationToken) {
        let slot = Arc::new(SessionSlot::new());
        let factory = Arc::new(factory);
        let (handle, broker) = channel(Arc::clone(&slot), Arc::clone(&factory) as Arc<dyn SessionFactory>);
        let root = CancellationToken::new();
        tokio::spawn(broker.run(root.clone()));
        (handle, slot, factory, root)
    }

    #[tokio::test(start_paused = true)]
    async fn connect_installs_and_runs_session() {
        let (handle, slot, factory, _root) = start(MockFactory::new());

        let reply = handle.connect(outbound("s1"), &CancellationToken::new()).await.unwrap();
        assert!(matches!(reply, ConnectReply::Connected));
        assert!(slot.is_active());
        assert_eq!(slot.outbound_info().unwrap(), outbound("s1"));

        let created = factory.created();
        wait_until(|| created[0].runs() == 1).await;

        assert!(slot.disconnect());
        wait_until(|| !slot.is_active()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_session_at_a_time() {
        let (handle, slot, factory, _root) =
            start(MockFactory::new().with_delay(Duration::from_secs(1)));

        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.connect(outbound("s1"), &CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = handle.connect(outbound("s2"), &CancellationToken::new()).await;
        assert_eq!(second.err(), Some(SlotError::ConnectInProgress));

        assert!(matches!(first.await.unwrap(), Ok(ConnectReply::Connected)));
        let third = handle.connect(outbound("s3"), &CancellationToken::new()).await;
        assert_eq!(third.err(), Some(SlotError::SessionActive));

        assert_eq!(factory.attempts(), 1);
        assert_eq!(slot.outbound_info().unwrap(), outbound("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_creation_is_reported_and_frees_slot() {
        let (handle, slot, factory, _root) = start(MockFactory::new().failing("no route"));

        let reply = handle.connect(outbound("s1"), &CancellationToken::new()).await.unwrap();
        assert!(matches!(reply, ConnectReply::Failed(SessionError::Unreachable(_))));
        assert!(!slot.is_active());

        let reply = handle.connect(outbound("s1"), &CancellationToken::new()).await.unwrap();
        assert!(matches!(reply, ConnectReply::Failed(_)));
        assert_eq!(factory.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_leaving_during_creation_discards_session() {
        let (handle, slot, factory, _root) =
            start(MockFactory::new().with_delay(Duration::from_secs(1)));

        let cancel = CancellationToken::new();
        let pending = {
            let handle = handle.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { handle.connect(outbound("s1"), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        assert!(matches!(pending.await.unwrap(), Ok(ConnectReply::Abandoned)));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!slot.is_active());
        assert_eq!(factory.attempts(), 1);
        assert!(factory.created().is_empty());

        let reply = handle.connect(outbound("s2"), &CancellationToken::new()).await.unwrap();
        assert!(matches!(reply, ConnectReply::Connected));
        assert_eq!(slot.outbound_info().unwrap(), outbound("s2"));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_creation_does_not_delay_next_connect() {
        let (handle, slot, factory, _root) =
            start(MockFactory::new().with_delay(Duration::from_secs(60)));

        let cancel = CancellationToken::new();
        let pending = {
            let handle = handle.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { handle.connect(outbound("s1"), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        assert!(matches!(pending.await.unwrap(), Ok(ConnectReply::Abandoned)));

        let started = tokio::time::Instant::now();
        let reply = handle.connect(outbound("s2"), &CancellationToken::new()).await.unwrap();
        assert!(matches!(reply, ConnectReply::Connected));
        assert!(started.elapsed() < Duration::from_secs(61));
        assert_eq!(factory.attempts(), 2);
        assert_eq!(slot.outbound_info().unwrap(), outbound("s2"));
    }

    #[tokio::test(start_paused = true)]
    async fn request_abandoned_before_acceptance_is_skipped() {
        let slot = Arc::new(SessionSlot::new());
        let factory = Arc::new(MockFactory::new());
        let (handle, broker) = channel(Arc::clone(&slot), Arc::clone(&factory) as Arc<dyn SessionFactory>);

        let cancel = CancellationToken::new();
        let pending = {
            let handle = handle.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { handle.connect(outbound("s1"), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert!(matches!(pending.await.unwrap(), Ok(ConnectReply::Abandoned)));

        tokio::spawn(broker.run(CancellationToken::new()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(factory.attempts(), 0);
        assert!(!slot.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn session_error_ends_session_but_not_broker() {
        let (handle, slot, factory, _root) = start(MockFactory::new().with_run_error("gone"));

        let reply = handle.connect(outbound("s1"), &CancellationToken::new()).await.unwrap();
        assert!(matches!(reply, ConnectReply::Connected));
        wait_until(|| !slot.is_active()).await;

        let reply = handle.connect(outbound("s2"), &CancellationToken::new()).await.unwrap();
        assert!(matches!(reply, ConnectReply::Connected));
        assert_eq!(factory.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn root_cancellation_stops_session_and_broker() {
        let slot = Arc::new(SessionSlot::new());
        let factory = Arc::new(MockFactory::new());
        let (handle, broker) = channel(Arc::clone(&slot), Arc::clone(&factory) as Arc<dyn SessionFactory>);
        let root = CancellationToken::new();
        let task = tokio::spawn(broker.run(root.clone()));

        let reply = handle.connect(outbound("s1"), &CancellationToken::new()).await.unwrap();
        assert!(matches!(reply, ConnectReply::Connected));

        root.cancel();
        assert!(task.await.unwrap().is_ok());
        assert!(!slot.is_active());
        assert_eq!(factory.created()[0].runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_fails_when_broker_is_gone() {
        let slot = Arc::new(SessionSlot::new());
        let (handle, broker) = channel(Arc::clone(&slot), Arc::new(MockFactory::new()));
        drop(broker);

        let reply = handle.connect(outbound("s1"), &CancellationToken::new()).await.unwrap();
        assert!(matches!(reply, ConnectReply::Failed(SessionError::BrokerGone)));
        assert!(slot.begin_connect().is_ok());
    }
}
