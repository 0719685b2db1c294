//! Counting permit pool with a resizable capacity.
//!
//! The gate bounds how many tasks may be active at once. Waiters are served
//! strictly in request order. Every mutation (grant, release, resize) happens
//! as one step under the gate's lock, and each of them reports which waiters
//! were granted a permit in that step so the caller can update its own
//! bookkeeping before anyone else observes the new counts.
//!
//! # Shrinking
//!
//! Lowering the capacity first withdraws permits nobody holds. If that is not
//! enough, the shortfall is remembered as a pending reduction and paid off by
//! subsequent releases, which are then swallowed instead of being handed to
//! the next waiter. At all times
//! `available + issued == capacity + pending_reduction`.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::cancel::CancelHandle;
use crate::error::{PoolError, PoolResult};
use crate::task::TaskId;

static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);

/// Authorization for one task to be active.
///
/// Permits cannot be cloned; handing one back to [`AdmissionGate::release`]
/// consumes it.
#[must_use = "a permit must be returned with `AdmissionGate::release`"]
#[derive(Debug, PartialEq, Eq)]
pub struct Permit {
    task_id: TaskId,
    gate_id: u64,
}

impl Permit {
    /// The task this permit was granted to
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }
}

/// An outstanding admission request.
///
/// Await [`granted`](AdmissionRequest::granted) for the permit, or give the
/// request up with [`AdmissionGate::withdraw`].
#[derive(Debug)]
pub struct AdmissionRequest {
    task_id: TaskId,
    ticket: u64,
    rx: oneshot::Receiver<Permit>,
}

impl AdmissionRequest {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Wait until the gate hands this request a permit.
    ///
    /// Cancel safe: dropping the future leaves the request queued.
    pub async fn granted(&mut self) -> Option<Permit> {
        (&mut self.rx).await.ok()
    }
}

/// Counters of the gate at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSnapshot {
    /// Configured maximum number of simultaneously held permits
    pub capacity: usize,
    /// Permits nobody holds
    pub available: usize,
    /// Permits currently held
    pub issued: usize,
    /// Releases still to be swallowed after a capacity decrease
    pub pending_reduction: usize,
    /// Queued admission requests
    pub waiting: usize,
}

/// Outcome of [`AdmissionGate::set_capacity`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityChange {
    pub previous: usize,
    pub current: usize,
    /// Waiters that received one of the newly available permits
    pub granted: Vec<TaskId>,
}

#[derive(Debug)]
struct Waiter {
    task_id: TaskId,
    ticket: u64,
    tx: oneshot::Sender<Permit>,
}

#[derive(Debug)]
struct GateState {
    gate_id: u64,
    capacity: usize,
    available: usize,
    issued: usize,
    pending_reduction: usize,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

impl GateState {
    /// Hand available permits to waiters in FIFO order.
    fn dispatch(&mut self) -> Vec<TaskId> {
        let mut granted = Vec::new();
        while self.available > 0 {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            let task_id = waiter.task_id;
            // A closed receiver means the request was abandoned; skip it.
            let permit = Permit {
                task_id,
                gate_id: self.gate_id,
            };
            if waiter.tx.send(permit).is_ok() {
                self.available -= 1;
                self.issued += 1;
                granted.push(task_id);
            } else {
                trace!(task_id = %task_id, "Skipping abandoned admission request");
            }
        }
        self.check_invariant();
        granted
    }

    fn check_invariant(&self) {
        debug_assert_eq!(
            self.available + self.issued,
            self.capacity + self.pending_reduction,
            "permit accounting out of balance"
        );
    }

    fn snapshot(&self) -> GateSnapshot {
        GateSnapshot {
            capacity: self.capacity,
            available: self.available,
            issued: self.issued,
            pending_reduction: self.pending_reduction,
            waiting: self.waiters.len(),
        }
    }
}

/// Resizable counting semaphore with FIFO waiters
#[derive(Debug)]
pub struct AdmissionGate {
    state: Mutex<GateState>,
}

impl AdmissionGate {
    /// Create a gate with `capacity` permits, all available
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            state: Mutex::new(GateState {
                gate_id: NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed),
                capacity: capacity.get(),
                available: capacity.get(),
                issued: 0,
                pending_reduction: 0,
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    pub fn snapshot(&self) -> GateSnapshot {
        self.state.lock().snapshot()
    }

    /// Queue an admission request for `task_id`.
    ///
    /// Returns the request together with every task granted a permit in this
    /// step. When a permit is free and nobody is ahead in the queue, that list
    /// is `[task_id]`.
    pub fn request(&self, task_id: TaskId) -> (AdmissionRequest, Vec<TaskId>) {
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(Waiter { task_id, ticket, tx });
        let granted = state.dispatch();

        trace!(task_id = %task_id, ticket, granted = granted.len(), "Admission requested");
        (AdmissionRequest { task_id, ticket, rx }, granted)
    }

    /// Give up an admission request.
    ///
    /// Returns `None` if the request was still queued; no permit was issued.
    /// Returns the permit if it had already been granted, in which case the
    /// caller owns it and must release it.
    pub fn withdraw(&self, mut request: AdmissionRequest) -> Option<Permit> {
        let mut state = self.state.lock();
        if let Some(position) = state
            .waiters
            .iter()
            .position(|waiter| waiter.ticket == request.ticket)
        {
            state.waiters.remove(position);
            trace!(task_id = %request.task_id, "Admission request withdrawn");
            return None;
        }
        // Not queued any more, so the grant has already been sent.
        request.rx.try_recv().ok()
    }

    /// Return a permit to the pool.
    ///
    /// Returns the waiters granted a permit as a result. A permit issued by
    /// another gate is ignored.
    pub fn release(&self, permit: Permit) -> Vec<TaskId> {
        let mut state = self.state.lock();
        if permit.gate_id != state.gate_id {
            warn!(task_id = %permit.task_id, "Ignoring permit issued by another gate");
            return Vec::new();
        }
        state.issued -= 1;
        if state.pending_reduction > 0 {
            state.pending_reduction -= 1;
            trace!(
                task_id = %permit.task_id,
                pending_reduction = state.pending_reduction,
                "Permit retired by capacity reduction"
            );
            state.check_invariant();
            return Vec::new();
        }
        state.available += 1;
        state.dispatch()
    }

    /// Change the capacity.
    ///
    /// Growing pays off any pending reduction first and offers the rest to
    /// waiters. Shrinking withdraws free permits, deferring the remainder.
    pub fn set_capacity(&self, capacity: NonZeroUsize) -> CapacityChange {
        let mut state = self.state.lock();
        let previous = state.capacity;
        let current = capacity.get();

        if current > previous {
            let delta = current - previous;
            let paid = delta.min(state.pending_reduction);
            state.pending_reduction -= paid;
            state.available += delta - paid;
        } else if current < previous {
            let delta = previous - current;
            let withdrawn = delta.min(state.available);
            state.available -= withdrawn;
            state.pending_reduction += delta - withdrawn;
        }
        state.capacity = current;
        let granted = state.dispatch();

        debug!(
            previous,
            current,
            available = state.available,
            pending_reduction = state.pending_reduction,
            granted = granted.len(),
            "Gate capacity changed"
        );
        CapacityChange {
            previous,
            current,
            granted,
        }
    }

    /// Wait for a permit unless `cancel` is raised first.
    ///
    /// Fails with [`PoolError::Cancelled`] without holding a permit if the handle
    /// wins. Cancel safe: if the future is dropped, or the handle is raised,
    /// after a permit was granted but before it was returned, the permit goes
    /// back to the gate.
    pub async fn acquire(&self, task_id: TaskId, cancel: &CancelHandle) -> PoolResult<Permit> {
        if cancel.is_raised() {
            return Err(PoolError::Cancelled);
        }

        let (request, _) = self.request(task_id);
        let mut pending = PendingAcquire {
            gate: self,
            request: Some(request),
        };
        pending.wait(cancel).await.ok_or(PoolError::Cancelled)
    }
}

/// An admission request owned by [`AdmissionGate::acquire`]. Dropping it
/// withdraws the request and returns any permit it was already granted.
struct PendingAcquire<'a> {
    gate: &'a AdmissionGate,
    request: Option<AdmissionRequest>,
}

impl PendingAcquire<'_> {
    async fn wait(&mut self, cancel: &CancelHandle) -> Option<Permit> {
        let request = self.request.as_mut()?;
        let granted = tokio::select! {
            biased;
            _ = cancel.raised() => None,
            permit = request.granted() => permit,
        };
        let permit = granted?;
        self.request = None;
        Some(permit)
    }
}

impl Drop for PendingAcquire<'_> {
    fn drop(&mut self) {
        let Some(request) = self.request.take() else {
            return;
        };
        if let Some(permit) = self.gate.withdraw(request) {
            trace!(task_id = %permit.task_id, "Returning permit of an abandoned acquire");
            let _ = self.gate.release(permit);
        }
    }
}
