//! Persistence channel abstraction
//!
//! The engine evicts and rehydrates command payloads through this trait.
//! Implementations may complete immediately (in-memory) or off-thread
//! (worker pool); either way results come back as [`Completion`]s that the
//! engine consumes on its own thread.
//!
//! # Contract
//!
//! - `store` resolves with an [`Ack`] naming the command actually stored.
//!   An ack for a different command is a durability failure.
//! - `fetch` resolves with the most recent record stored for a command.
//! - Neither call can be cancelled once issued.

use crate::completion::Completion;
use crate::record::{Ack, PersistRecord};
use timeline_core::{CommandId, Result};

/// Asynchronous key/value store for command snapshots
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; completions may be resolved from
/// any thread.
pub trait PersistenceChannel: Send + Sync {
    /// Store one record
    fn store(&self, record: PersistRecord) -> Completion<Ack>;

    /// Fetch the record previously stored for a command
    fn fetch(&self, command_id: CommandId) -> Completion<PersistRecord>;

    /// Whether the channel currently accepts work
    ///
    /// When `false` the engine treats every command as memory-only.
    fn is_available(&self) -> bool {
        true
    }

    /// Human-readable name for logging
    fn mode_name(&self) -> &'static str;

    /// Finish outstanding work and stop accepting more
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
