//! Capability gate: permission state, pending-write queue, gesture recovery.
//!
//! Every durable-store operation goes through the gate. Outside a user
//! gesture the gate only ever probes the grant (prompting there is a hard
//! error in hosts with interactive grant flows); writes attempted while the
//! grant is lost are queued, bounded, and replayed in FIFO order once a
//! gesture restores access.

use crate::container::{AccessMode, StorageContainer};
use crate::types::{GrantState, PendingOperation, StorageError};
use parking_lot::Mutex;
use retrace_events::{EventBus, RetraceEvent};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Only the most recent backlog is kept; older deferred writes are dropped
/// rather than retried indefinitely.
pub const PENDING_QUEUE_CAP: usize = 32;

/// At most this many queued writes are replayed per recovery, avoiding a
/// write storm after a long outage.
pub const REPLAY_LIMIT: usize = 5;

pub struct CapabilityGate<C: ?Sized> {
    container: Arc<C>,
    state: Mutex<GrantState>,
    pending: Mutex<VecDeque<PendingOperation>>,
    bus: EventBus,
}

impl<C: StorageContainer + ?Sized> CapabilityGate<C> {
    pub fn new(container: Arc<C>, bus: EventBus) -> Self {
        Self {
            container,
            state: Mutex::new(GrantState::Active),
            pending: Mutex::new(VecDeque::new()),
            bus,
        }
    }

    pub fn state(&self) -> GrantState {
        *self.state.lock()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Non-prompting grant check performed before every store operation.
    /// Never attempts an interactive re-prompt; a denied probe marks the
    /// grant lost and fails fast.
    pub fn ensure_active(&self) -> Result<(), StorageError> {
        if self.container.check_permission(AccessMode::ReadWrite) {
            Ok(())
        } else {
            self.mark_lost();
            Err(StorageError::CapabilityUnavailable)
        }
    }

    /// Record an authorization failure raised by the container mid-call.
    pub fn mark_lost(&self) {
        let mut state = self.state.lock();
        if *state != GrantState::Lost {
            *state = GrantState::Lost;
            warn!("storage grant lost; deferring writes");
            self.bus.send(RetraceEvent::CapabilityLost);
        }
    }

    /// Defer a write while the grant is lost. Bounded: the oldest entries
    /// are dropped once the queue exceeds [`PENDING_QUEUE_CAP`].
    pub fn enqueue_pending(&self, op: PendingOperation) {
        let mut pending = self.pending.lock();
        pending.push_back(op);
        while pending.len() > PENDING_QUEUE_CAP {
            pending.pop_front();
            debug!("pending queue full, dropped oldest deferred write");
        }
    }

    /// Recovery attempt, valid only from a user-interaction context (click,
    /// visibility restore). Re-checks the grant via the prompting path; on
    /// success returns the most recent [`REPLAY_LIMIT`] deferred writes in
    /// their original order for the caller to replay. Idempotent: returns
    /// `None` while already `Active`.
    pub async fn recover_on_gesture(&self) -> Option<Vec<PendingOperation>> {
        {
            let mut state = self.state.lock();
            match *state {
                GrantState::Active => return None,
                GrantState::PendingRecovery => return None,
                GrantState::Lost => *state = GrantState::PendingRecovery,
            }
        }

        if !self.container.request_permission(AccessMode::ReadWrite).await {
            *self.state.lock() = GrantState::Lost;
            debug!("grant still unavailable after gesture re-check");
            return None;
        }

        let replay: Vec<PendingOperation> = {
            let mut pending = self.pending.lock();
            let skip = pending.len().saturating_sub(REPLAY_LIMIT);
            let kept = pending.split_off(skip);
            pending.clear();
            kept.into_iter().collect()
        };

        *self.state.lock() = GrantState::Active;
        info!(replayed = replay.len(), "storage grant restored");
        self.bus.send(RetraceEvent::CapabilityRestored {
            replayed: replay.len(),
        });
        Some(replay)
    }
}
