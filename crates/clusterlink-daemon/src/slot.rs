//! The current-session slot shared by the RPC layer and the broker.
//!
//! All reads and writes of the current session go through one mutex. The
//! slot is `Idle`, `Connecting` while a connect request is in flight to the
//! broker, or `Active` while a session runs. A connect request carries the
//! ticket it was admitted with; the broker can only activate a session for
//! the ticket that is still `Connecting`, so a caller that gave up can never
//! have a session installed on its behalf.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use clusterlink_proto::daemon::OutboundInfo;

use crate::session::Session;

/// Why a connect request was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("an active session exists")]
    SessionActive,

    #[error("a connect request is already in progress")]
    ConnectInProgress,
}

enum SlotState {
    Idle,
    Connecting(u64),
    Active {
        ticket: u64,
        session: Arc<dyn Session>,
        cancel: CancellationToken,
    },
}

/// Mutex-guarded holder of the current session.
pub struct SessionSlot {
    state: Mutex<SlotState>,
    next_ticket: AtomicU64,
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSlot {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Idle),
            next_ticket: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The active session, if any.
    pub fn current(&self) -> Option<Arc<dyn Session>> {
        match &*self.lock() {
            SlotState::Active { session, .. } => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Outbound configuration of the active session, read under the lock.
    pub fn outbound_info(&self) -> Option<OutboundInfo> {
        match &*self.lock() {
            SlotState::Active { session, .. } => Some(session.outbound_info()),
            _ => None,
        }
    }

    /// Whether a session is active.
    pub fn is_active(&self) -> bool {
        matches!(*self.lock(), SlotState::Active { .. })
    }

    /// Admit a connect request. Fails while a session is active or another
    /// request is in flight. Dropping the permit before the broker activates
    /// a session returns the slot to `Idle`.
    pub fn begin_connect(&self) -> Result<ConnectPermit<'_>, SlotError> {
        let mut state = self.lock();
        match *state {
            SlotState::Active { .. } => Err(SlotError::SessionActive),
            SlotState::Connecting(_) => Err(SlotError::ConnectInProgress),
            SlotState::Idle => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                *state = SlotState::Connecting(ticket);
                Ok(ConnectPermit { slot: self, ticket })
            }
        }
    }

    /// Install `session` for `ticket`. Returns `false`, leaving the slot
    /// untouched, when `ticket` is no longer the request in flight.
    pub(crate) fn activate(
        &self,
        ticket: u64,
        session: Arc<dyn Session>,
        cancel: CancellationToken,
    ) -> bool {
        let mut state = self.lock();
        if !matches!(*state, SlotState::Connecting(t) if t == ticket) {
            return false;
        }
        *state = SlotState::Active {
            ticket,
            session,
            cancel,
        };
        true
    }

    /// Clear the session installed for `ticket`. A slot holding anything else
    /// is left alone.
    pub(crate) fn clear(&self, ticket: u64) -> bool {
        let mut state = self.lock();
        if matches!(*state, SlotState::Active { ticket: t, .. } if t == ticket) {
            *state = SlotState::Idle;
            true
        } else {
            false
        }
    }

    /// Cancel the active session. Returns whether there was one.
    pub fn disconnect(&self) -> bool {
        match &*self.lock() {
            SlotState::Active { cancel, .. } => {
                cancel.cancel();
                true
            }
            _ => false,
        }
    }
}

/// Admission of one connect request; see [`SessionSlot::begin_connect`].
#[must_use = "dropping the permit abandons the connect request"]
pub struct ConnectPermit<'a> {
    slot: &'a SessionSlot,
    ticket: u64,
}

impl ConnectPermit<'_> {
    pub const fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl Drop for ConnectPermit<'_> {
    fn drop(&mut self) {
        let mut state = self.slot.lock();
        if matches!(*state, SlotState::Connecting(t) if t == self.ticket) {
            *state = SlotState::Idle;
        }
    }
}
