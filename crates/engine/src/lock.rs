//! Durability lock
//!
//! While a command's persistence round-trip is outstanding the engine holds
//! the lock. Undo and redo requests that arrive during that window are
//! dropped; a new `execute` first settles the outstanding round-trip. The
//! lock is owned by the engine and only the engine releases it.

use std::time::Instant;
use timeline_core::{CommandId, CommandKind, HistoryError, Result};
use tracing::trace;

/// How a command reached `execute`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteOrigin {
    /// A new edit from the caller; clears the redo stack once settled
    Fresh,
    /// Re-application of an undone command; the redo stack is kept
    Redo,
}

/// State of the durability lock
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LockState {
    /// No round-trip outstanding
    #[default]
    Idle,
    /// A command was applied and its record handed to the channel
    PersistInFlight {
        /// Command awaiting acknowledgement
        command_id: CommandId,
        /// Its kind
        kind: CommandKind,
        /// Whether it came from the caller or from redo
        origin: ExecuteOrigin,
        /// When the record was handed off
        since: Instant,
    },
}

impl LockState {
    /// True while a round-trip is outstanding
    pub fn is_held(&self) -> bool {
        matches!(self, LockState::PersistInFlight { .. })
    }

    /// Command awaiting acknowledgement, if any
    pub fn command_id(&self) -> Option<CommandId> {
        match self {
            LockState::PersistInFlight { command_id, .. } => Some(*command_id),
            LockState::Idle => None,
        }
    }
}

/// Engine-owned lock state machine
#[derive(Debug, Default)]
pub struct DurabilityLock {
    state: LockState,
}

impl DurabilityLock {
    /// Unlocked
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> &LockState {
        &self.state
    }

    /// True while a round-trip is outstanding
    pub fn is_held(&self) -> bool {
        self.state.is_held()
    }

    /// Move to `PersistInFlight`
    ///
    /// # Errors
    ///
    /// Returns an error if a round-trip is already outstanding.
    pub fn acquire(
        &mut self,
        command_id: CommandId,
        kind: CommandKind,
        origin: ExecuteOrigin,
        since: Instant,
    ) -> Result<()> {
        if let Some(current) = self.state.command_id() {
            return Err(HistoryError::invalid(format!(
                "persistence of command {} is still in flight",
                current
            )));
        }
        trace!(target: "timeline::lock", id = %command_id, kind = %kind, "lock acquired");
        self.state = LockState::PersistInFlight {
            command_id,
            kind,
            origin,
            since,
        };
        Ok(())
    }

    /// Return to `Idle`, yielding the previous state
    pub fn release(&mut self) -> LockState {
        let previous = std::mem::take(&mut self.state);
        if let Some(id) = previous.command_id() {
            trace!(target: "timeline::lock", id = %id, "lock released");
        }
        previous
    }
}
