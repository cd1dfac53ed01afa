use std::collections::VecDeque;
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use signon_ipc::SignonError;

pub(crate) type ReadyCallback = Box<dyn FnOnce(Option<SignonError>) + Send + 'static>;

#[derive(Default)]
struct GateState {
    ready: bool,
    disposed: bool,
    last_error: Option<SignonError>,
    pending: VecDeque<ReadyCallback>,
    /// Thread currently running a drain, if any.
    draining: Option<ThreadId>,
}

/// Holds operations back until the owning object has a remote counterpart.
///
/// Callbacks queued before [`ReadyGate::mark_ready`] run in submission order
/// with the registration outcome. Once ready, new callbacks run immediately
/// with the latched error. Callbacks never run while the gate's lock is held,
/// so they may re-enter the gate.
pub struct ReadyGate {
    state: Mutex<GateState>,
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn call_when_ready<F>(&self, callback: F)
    where
        F: FnOnce(Option<SignonError>) + Send + 'static,
    {
        let mut state = self.lock();
        if state.disposed {
            drop(state);
            callback(Some(SignonError::Disposed));
            return;
        }
        // Another thread is still draining the backlog: queue behind it so
        // submission order holds. Re-entrant calls from the drain itself run
        // straight away.
        let behind_drain = state
            .draining
            .is_some_and(|owner| owner != thread::current().id());
        if state.ready && !behind_drain {
            let error = state.last_error.clone();
            drop(state);
            callback(error);
        } else {
            state.pending.push_back(Box::new(callback));
        }
    }

    /// Latches `error` (or success), then runs every queued callback once.
    pub fn mark_ready(&self, error: Option<SignonError>) {
        {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            state.ready = true;
            state.last_error = error;
            state.draining = Some(thread::current().id());
        }
        loop {
            let (batch, error) = {
                let mut state = self.lock();
                if state.pending.is_empty() || !state.ready {
                    state.draining = None;
                    return;
                }
                (mem::take(&mut state.pending), state.last_error.clone())
            };
            for callback in batch {
                callback(error.clone());
            }
        }
    }

    pub fn mark_not_ready(&self) {
        let mut state = self.lock();
        state.ready = false;
        state.last_error = None;
    }

    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    pub fn last_error(&self) -> Option<SignonError> {
        self.lock().last_error.clone()
    }

    /// Fails every queued callback with `Disposed`; later callers fail the same way.
    pub fn dispose(&self) {
        let pending = {
            let mut state = self.lock();
            state.disposed = true;
            state.ready = false;
            mem::take(&mut state.pending)
        };
        fail_disposed(pending);
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ReadyGate {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        fail_disposed(mem::take(&mut state.pending));
    }
}

fn fail_disposed(pending: VecDeque<ReadyCallback>) {
    if !pending.is_empty() {
        log::debug!("gate: failing {} queued call(s) on disposal", pending.len());
    }
    for callback in pending {
        callback(Some(SignonError::Disposed));
    }
}
