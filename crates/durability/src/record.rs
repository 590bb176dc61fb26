//! Persist records and acknowledgements
//!
//! A [`PersistRecord`] is what the engine hands to the persistence channel:
//! one command's serialized snapshot plus enough metadata to route it back.
//! The `format_version` tag is carried through untouched; no migration is
//! performed on read.

use serde::{Deserialize, Serialize};
use timeline_core::{CommandId, CommandKind, Document, TargetId};

/// Version tag stamped on records written by this build
pub const FORMAT_VERSION: u32 = 1;

/// One command's persisted form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistRecord {
    /// Command this record belongs to
    pub command_id: CommandId,
    /// Command kind
    pub kind: CommandKind,
    /// Identity of the mutated entity, if any
    pub identity: Option<TargetId>,
    /// Opaque version tag
    pub format_version: u32,
    /// Handler-owned snapshot document
    pub document: Document,
}

impl PersistRecord {
    /// New record stamped with the current format version
    pub fn new(
        command_id: CommandId,
        kind: CommandKind,
        identity: Option<TargetId>,
        document: Document,
    ) -> Self {
        Self {
            command_id,
            kind,
            identity,
            format_version: FORMAT_VERSION,
            document,
        }
    }

    /// Backend key under which this record is stored
    pub fn key(&self) -> String {
        record_key(self.command_id)
    }
}

/// Backend key for a command id
///
/// Zero-padded so lexical order matches id order.
pub fn record_key(id: CommandId) -> String {
    format!("cmd-{:020}", id.get())
}

/// Channel acknowledgement of a stored record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Command the channel actually stored
    pub command_id: CommandId,
    /// Identity the entity was materialized under
    pub identity: Option<TargetId>,
}

impl Ack {
    /// Acknowledge a record exactly as submitted
    pub fn for_record(record: &PersistRecord) -> Self {
        Self {
            command_id: record.command_id,
            identity: record.identity.clone(),
        }
    }
}
