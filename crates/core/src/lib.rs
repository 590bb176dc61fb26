//! Core types and traits for the history engine
//!
//! This crate defines the foundational types used throughout the system:
//! - CommandId: Monotonic identifier assigned to committed commands
//! - TargetId: Stable identity of a document entity a command mutates
//! - CommandKind: Closed set of command kinds, one handler per kind
//! - Link: Prev/Next tags chaining commands into one undo/redo unit
//! - StorageClass / StoragePolicy: Durable vs memory-only classification
//! - Target: Contract every mutated document entity implements
//! - Command: One recorded, reversible edit
//! - HistoryEvent / HistoryObserver: Change notifications
//! - HistoryError: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod error;
pub mod event;
pub mod target;
pub mod types;

pub use command::{Command, DurabilityState, TargetRef};
pub use error::{HistoryError, Result};
pub use event::{CommandSummary, EventRecorder, HistoryEvent, HistoryObserver, Phase};
pub use target::{StoragePolicy, Target, TargetHandle};
pub use types::{CommandId, CommandKind, Document, Link, StorageClass, TargetId};
