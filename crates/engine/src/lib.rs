//! History engine
//!
//! This crate drives commands through their lifecycle:
//! - HistoryEngine: undo/redo stacks, merge window, link chains, eviction
//! - CommandHandler / HandlerRegistry: one bound handler per command kind
//! - TargetTable: identity-to-live-handle indirection
//! - DurabilityLock: blocks undo/redo while a persistence round-trip is out
//! - HistoryDocument: snapshot export/import
//! - HistoryConfig: `history.toml`
//!
//! The engine is the only component that knows about:
//! - When a command becomes durable
//! - Which live instance a stored command refers to
//! - Which entries can leave memory

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
mod effects;
pub mod handler;
pub mod history;
pub mod lock;
mod navigation;
mod notify;
pub mod registry;
pub mod serialization;
pub mod targets;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{HistoryConfig, CONFIG_FILE_NAME};
pub use handler::{target_of, CommandHandler};
pub use history::{ExecuteReceipt, HistoryEngine, HistoryStats, Persistence};
pub use lock::{DurabilityLock, ExecuteOrigin, LockState};
pub use registry::{HandlerFactory, HandlerRegistry};
pub use serialization::{CommandRecord, HistoryDocument, DOCUMENT_FORMAT_VERSION};
pub use targets::TargetTable;
