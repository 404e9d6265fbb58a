//! Shared coordination between the listener and the worker pool.
//!
//! A single mutex guards all cross-thread state: the one-slot pending
//! handoff, the count of busy workers, the shutdown flag and the per-slot
//! states. Four condition variables carry the wake-ups:
//!
//! - `pool_ready`: every worker has started (listener waits once)
//! - `work_available`: a handoff was posted (idle workers wait)
//! - `slot_free`: a worker finished a session (saturated listener waits)
//! - `taken`: the posted handoff was claimed (listener waits)
//!
//! The handoff is a rendezvous, not a queue: [`Coordinator::dispatch`] does
//! not return until exactly one worker has taken the item.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Starting,
    Idle,
    Assigned,
    Serving,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Accepted,
    AlreadyClosing,
    /// Sessions (or a handoff in flight) are still active; nothing changed.
    Refused { serving: usize, pending: bool },
}

struct PoolState<T> {
    slots: Vec<SlotState>,
    ready: usize,
    serving: usize,
    closing: bool,
    pending: Option<T>,
    claimed_by: Option<usize>,
}

pub struct Coordinator<T> {
    size: usize,
    state: Mutex<PoolState<T>>,
    pool_ready: Condvar,
    work_available: Condvar,
    slot_free: Condvar,
    taken: Condvar,
}

impl<T> Coordinator<T> {
    /// `size` must be at least 1.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(PoolState {
                slots: vec![SlotState::Starting; size],
                ready: 0,
                serving: 0,
                closing: false,
                pending: None,
                claimed_by: None,
            }),
            pool_ready: Condvar::new(),
            work_available: Condvar::new(),
            slot_free: Condvar::new(),
            taken: Condvar::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn serving(&self) -> usize {
        self.state.lock().serving
    }

    pub fn is_closing(&self) -> bool {
        self.state.lock().closing
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        self.state.lock().slots.clone()
    }

    /// Called once by each worker after startup.
    pub fn worker_ready(&self, id: usize) {
        let mut st = self.state.lock();
        st.slots[id] = SlotState::Idle;
        st.ready += 1;
        if st.ready == self.size {
            self.pool_ready.notify_all();
        }
    }

    /// Block until every worker reported ready (or shutdown began).
    pub fn wait_until_ready(&self) {
        let mut st = self.state.lock();
        while st.ready < self.size && !st.closing {
            self.pool_ready.wait(&mut st);
        }
    }

    /// Hand `item` to exactly one idle worker. Blocks while every worker is
    /// busy, then until the item is claimed. Returns the claiming worker id,
    /// or gives the item back if shutdown started first.
    pub fn dispatch(&self, item: T) -> Result<usize, T> {
        let mut st = self.state.lock();
        while st.serving == self.size && !st.closing {
            self.slot_free.wait(&mut st);
        }
        if st.closing {
            return Err(item);
        }
        st.pending = Some(item);
        st.claimed_by = None;
        self.work_available.notify_one();
        loop {
            if let Some(id) = st.claimed_by.take() {
                return Ok(id);
            }
            if st.closing {
                if let Some(item) = st.pending.take() {
                    return Err(item);
                }
            }
            self.taken.wait(&mut st);
        }
    }

    /// Wait for the next handoff as worker `id`. `None` means shutdown.
    pub fn claim(&self, id: usize) -> Option<T> {
        let mut st = self.state.lock();
        debug_assert!(
            !matches!(st.slots[id], SlotState::Assigned | SlotState::Serving),
            "worker {} claimed again without releasing",
            id
        );
        st.slots[id] = SlotState::Idle;
        while st.pending.is_none() && !st.closing {
            self.work_available.wait(&mut st);
        }
        if st.closing {
            st.slots[id] = SlotState::Terminated;
            return None;
        }
        let item = st.pending.take();
        st.serving += 1;
        st.slots[id] = SlotState::Assigned;
        st.claimed_by = Some(id);
        self.taken.notify_all();
        item
    }

    pub fn begin_session(&self, id: usize) {
        self.state.lock().slots[id] = SlotState::Serving;
    }

    /// Worker `id` finished its session and is about to wait again.
    pub fn release(&self, id: usize) {
        let mut st = self.state.lock();
        st.serving = st.serving.saturating_sub(1);
        st.slots[id] = SlotState::Idle;
        self.slot_free.notify_one();
    }

    pub fn mark_terminated(&self, id: usize) {
        self.state.lock().slots[id] = SlotState::Terminated;
    }

    /// Honored only when no worker is busy and no handoff is in flight.
    pub fn request_shutdown(&self) -> ShutdownOutcome {
        let mut st = self.state.lock();
        if st.closing {
            return ShutdownOutcome::AlreadyClosing;
        }
        if st.serving > 0 || st.pending.is_some() {
            return ShutdownOutcome::Refused {
                serving: st.serving,
                pending: st.pending.is_some(),
            };
        }
        st.closing = true;
        self.work_available.notify_all();
        self.pool_ready.notify_all();
        self.slot_free.notify_all();
        self.taken.notify_all();
        ShutdownOutcome::Accepted
    }
}
