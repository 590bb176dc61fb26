//! Timeline - command-sourcing history for document editors
//!
//! Every edit is a reversible command. The engine keeps undo/redo stacks,
//! folds rapid edits into one entry, moves linked commands as a unit, and
//! keeps memory bounded by evicting old entries to a persistence channel.
//!
//! # Quick Start
//!
//! ```ignore
//! use timeline::{Command, CommandKind, HistoryConfig, HistoryEngine};
//!
//! let mut engine = HistoryEngine::new(HistoryConfig::default())?;
//! engine.register_handler(CommandKind::SetValue, || Box::new(SetValueHandler))?;
//! engine.set_channel(Arc::new(MemoryChannel::new()));
//!
//! engine.execute(Command::new(CommandKind::SetValue, &node).with_payload(payload))?;
//! engine.undo()?;
//! ```
//!
//! # Architecture
//!
//! - `timeline-core`: commands, targets, events, errors
//! - `timeline-durability`: persistence channels, record codec, fallback spool
//! - `timeline-engine`: the history engine and its configuration

pub use timeline_core::*;
pub use timeline_engine::*;

/// Persistence channels, backends and fallback stores
pub mod durability {
    pub use timeline_durability::*;
}
