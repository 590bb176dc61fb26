//! Persistence layer for the history engine
//!
//! This crate handles everything that leaves the engine's memory:
//!
//! - Completion cells: one-shot results delivered back to the caller's thread
//! - Persist records and their checksummed binary codec
//! - The persistence channel contract (store / fetch)
//! - Channel implementations: in-memory, worker-thread over a key/value backend
//! - Backends: in-memory map, one-file-per-record directory
//! - Fallback spool for best-effort local flushes after a durability failure
//! - Scripted channel for deterministic tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod channel;
pub mod codec;
pub mod completion;
pub mod memory;
pub mod record;
pub mod spool;
pub mod testing;
pub mod worker;

pub use backend::{Backend, DirectoryBackend, MemoryBackend};
pub use channel::PersistenceChannel;
pub use codec::{decode_record, encode_record};
pub use completion::{completion, Completer, Completion};
pub use memory::MemoryChannel;
pub use record::{Ack, PersistRecord, FORMAT_VERSION};
pub use spool::{FallbackStore, FileSpool, MemorySpool, SpoolEntry};
pub use worker::{WorkerChannel, WorkerStats};
