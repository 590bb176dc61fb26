//! One-shot completion cells
//!
//! A persistence round-trip hands the caller a [`Completion`] while the
//! channel (possibly on another thread) keeps the matching [`Completer`].
//! The caller polls with [`Completion::try_take`] or blocks with
//! [`Completion::wait`]; either way the result is consumed on the caller's
//! thread.
//!
//! Dropping a `Completer` without completing it resolves the cell with
//! [`HistoryError::ChannelClosed`], so a panicking worker never leaves a
//! waiter hanging.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use timeline_core::{HistoryError, Result};

enum State<T> {
    Waiting,
    Ready(Result<T>),
    Taken,
}

struct Slot<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn fill(&self, result: Result<T>) {
        let mut state = self.state.lock();
        if matches!(*state, State::Waiting) {
            *state = State::Ready(result);
            self.ready.notify_all();
        }
    }
}

/// Receiving side of a one-shot result
pub struct Completion<T> {
    slot: Arc<Slot<T>>,
}

/// Sending side of a one-shot result
pub struct Completer<T> {
    slot: Option<Arc<Slot<T>>>,
}

/// Create a connected completer/completion pair
pub fn completion<T>() -> (Completer<T>, Completion<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(State::Waiting),
        ready: Condvar::new(),
    });
    (
        Completer {
            slot: Some(Arc::clone(&slot)),
        },
        Completion { slot },
    )
}

impl<T> Completer<T> {
    /// Deliver the result
    pub fn complete(mut self, result: Result<T>) {
        if let Some(slot) = self.slot.take() {
            slot.fill(result);
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.fill(Err(HistoryError::ChannelClosed));
        }
    }
}

impl<T> Completion<T> {
    /// A completion that is already resolved
    pub fn ready(result: Result<T>) -> Self {
        let (completer, completion) = completion();
        completer.complete(result);
        completion
    }

    /// True once a result is waiting to be taken
    pub fn is_ready(&self) -> bool {
        matches!(*self.slot.state.lock(), State::Ready(_))
    }

    /// Take the result without blocking
    ///
    /// Returns `None` while the round-trip is outstanding, and again after
    /// the result has been taken once.
    pub fn try_take(&self) -> Option<Result<T>> {
        let mut state = self.slot.state.lock();
        match std::mem::replace(&mut *state, State::Taken) {
            State::Ready(result) => Some(result),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Block until the result arrives
    pub fn wait(self) -> Result<T> {
        let mut state = self.slot.state.lock();
        loop {
            match std::mem::replace(&mut *state, State::Taken) {
                State::Ready(result) => return result,
                State::Taken => return Err(HistoryError::ChannelClosed),
                State::Waiting => {
                    *state = State::Waiting;
                    self.slot.ready.wait(&mut state);
                }
            }
        }
    }

    /// Block until the result arrives or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        let mut state = self.slot.state.lock();
        if matches!(*state, State::Waiting) {
            let _ = self.slot.ready.wait_for(&mut state, timeout);
        }
        match std::mem::replace(&mut *state, State::Taken) {
            State::Ready(result) => Some(result),
            other => {
                *state = other;
                None
            }
        }
    }
}
