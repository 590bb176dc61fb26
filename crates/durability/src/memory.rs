//! In-memory persistence channel
//!
//! Keeps records in a map and completes every call immediately. Nothing
//! survives the process; intended for tests, previews and sessions where
//! history persistence is administratively disabled.

use crate::channel::PersistenceChannel;
use crate::completion::Completion;
use crate::record::{Ack, PersistRecord};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use timeline_core::{CommandId, HistoryError};

/// Channel backed by an in-process map
#[derive(Debug)]
pub struct MemoryChannel {
    records: Mutex<BTreeMap<CommandId, PersistRecord>>,
    available: AtomicBool,
    store_calls: AtomicU64,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    /// Empty, available channel
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            store_calls: AtomicU64::new(0),
        }
    }

    /// Toggle availability
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Number of distinct commands stored
    pub fn stored_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Total `store` calls, including overwrites
    pub fn store_calls(&self) -> u64 {
        self.store_calls.load(Ordering::Relaxed)
    }

    /// Whether a record exists for a command
    pub fn contains(&self, command_id: CommandId) -> bool {
        self.records.lock().contains_key(&command_id)
    }

    /// Copy of a stored record
    pub fn get(&self, command_id: CommandId) -> Option<PersistRecord> {
        self.records.lock().get(&command_id).cloned()
    }
}

impl PersistenceChannel for MemoryChannel {
    fn store(&self, record: PersistRecord) -> Completion<Ack> {
        self.store_calls.fetch_add(1, Ordering::Relaxed);
        let ack = Ack::for_record(&record);
        self.records.lock().insert(record.command_id, record);
        Completion::ready(Ok(ack))
    }

    fn fetch(&self, command_id: CommandId) -> Completion<PersistRecord> {
        let found = self.records.lock().get(&command_id).cloned();
        Completion::ready(found.ok_or_else(|| {
            HistoryError::invalid(format!("no record stored for command {}", command_id))
        }))
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn mode_name(&self) -> &'static str {
        "InMemory"
    }
}
