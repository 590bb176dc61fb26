//! Testing utilities for persistence
//!
//! [`ScriptedChannel`] holds every `store` until the test decides how it
//! ends: acknowledged, rejected, or acknowledged for the wrong command. This
//! makes the window between an edit being applied and it becoming durable
//! observable from a single thread.
//!
//! # Example
//!
//! ```ignore
//! let channel = Arc::new(ScriptedChannel::new());
//! engine.set_channel(channel.clone());
//! engine.execute(cmd)?;          // applied, round-trip outstanding
//! assert!(engine.is_locked());
//! channel.complete_next();       // ack delivered
//! engine.poll_durability();      // reconciled on the caller's thread
//! ```

use crate::channel::PersistenceChannel;
use crate::completion::{completion, Completer, Completion};
use crate::record::{Ack, PersistRecord};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use timeline_core::{CommandId, HistoryError};

/// Channel whose stores complete only when the test says so
///
/// Without auto-ack, complete (or fail) the outstanding store before calling
/// anything that settles implicitly: `execute`, `clear`, `go_to_state`,
/// `enable_serialization` and `from_json` wait on the outstanding
/// completion, and so does the flush of evicted entries. On a single test
/// thread that wait never returns.
#[derive(Default)]
pub struct ScriptedChannel {
    pending: Mutex<VecDeque<(PersistRecord, Completer<Ack>)>>,
    stored: Mutex<BTreeMap<CommandId, PersistRecord>>,
    history: Mutex<Vec<CommandId>>,
    fetches: Mutex<Vec<CommandId>>,
    auto_ack: AtomicBool,
    unavailable: AtomicBool,
}

impl ScriptedChannel {
    /// Channel that holds every store until completed manually
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel that acknowledges every store immediately
    pub fn auto_ack() -> Self {
        let channel = Self::default();
        channel.auto_ack.store(true, Ordering::Release);
        channel
    }

    /// Switch immediate acknowledgement on or off
    pub fn set_auto_ack(&self, enabled: bool) {
        self.auto_ack.store(enabled, Ordering::Release);
    }

    /// Toggle availability
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Release);
    }

    /// Number of stores awaiting a decision
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Command ids of every `store` call, in call order
    pub fn store_history(&self) -> Vec<CommandId> {
        self.history.lock().clone()
    }

    /// Command ids of every `fetch` call, in call order
    pub fn fetch_history(&self) -> Vec<CommandId> {
        self.fetches.lock().clone()
    }

    /// Copy of an acknowledged record
    pub fn stored(&self, command_id: CommandId) -> Option<PersistRecord> {
        self.stored.lock().get(&command_id).cloned()
    }

    /// Acknowledge the oldest pending store. Returns `false` if none was pending.
    pub fn complete_next(&self) -> bool {
        let Some((record, completer)) = self.pending.lock().pop_front() else {
            return false;
        };
        let ack = Ack::for_record(&record);
        self.stored.lock().insert(record.command_id, record);
        completer.complete(Ok(ack));
        true
    }

    /// Reject the oldest pending store
    pub fn fail_next(&self, reason: &str) -> bool {
        let Some((record, completer)) = self.pending.lock().pop_front() else {
            return false;
        };
        completer.complete(Err(HistoryError::durability(record.command_id, reason)));
        true
    }

    /// Acknowledge the oldest pending store with a caller-supplied ack
    pub fn ack_next_with(&self, ack: Ack) -> bool {
        let Some((record, completer)) = self.pending.lock().pop_front() else {
            return false;
        };
        self.stored.lock().insert(record.command_id, record);
        completer.complete(Ok(ack));
        true
    }
}

impl PersistenceChannel for ScriptedChannel {
    fn store(&self, record: PersistRecord) -> Completion<Ack> {
        self.history.lock().push(record.command_id);
        if self.auto_ack.load(Ordering::Acquire) {
            let ack = Ack::for_record(&record);
            self.stored.lock().insert(record.command_id, record);
            return Completion::ready(Ok(ack));
        }
        let (completer, completion) = completion();
        self.pending.lock().push_back((record, completer));
        completion
    }

    fn fetch(&self, command_id: CommandId) -> Completion<PersistRecord> {
        self.fetches.lock().push(command_id);
        let found = self.stored.lock().get(&command_id).cloned();
        Completion::ready(found.ok_or_else(|| {
            HistoryError::invalid(format!("no record stored for command {}", command_id))
        }))
    }

    fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::Acquire)
    }

    fn mode_name(&self) -> &'static str {
        "Scripted"
    }
}
