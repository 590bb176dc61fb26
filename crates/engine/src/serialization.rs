//! History document export and import
//!
//! `to_json` writes every entry that carries a snapshot; `from_json` rebuilds
//! the stacks as detached placeholders that rehydrate from those snapshots
//! when undone or redone. Live targets are not part of the document; the
//! caller installs them before navigating.

use crate::history::HistoryEngine;
use serde::{Deserialize, Serialize};
use timeline_core::{
    Command, CommandId, CommandKind, CommandSummary, Document, DurabilityState, HistoryError,
    HistoryEvent, Link, Result, TargetId, TargetRef,
};
use tracing::info;

/// Current history document layout
pub const DOCUMENT_FORMAT_VERSION: u32 = 1;

/// Serialized undo/redo stacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryDocument {
    /// Layout version
    pub format_version: u32,
    /// Undo entries, oldest first
    pub undos: Vec<CommandRecord>,
    /// Redo entries, oldest-undone last
    pub redos: Vec<CommandRecord>,
}

impl Default for HistoryDocument {
    fn default() -> Self {
        Self {
            format_version: DOCUMENT_FORMAT_VERSION,
            undos: Vec::new(),
            redos: Vec::new(),
        }
    }
}

impl HistoryDocument {
    /// Empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// True if neither stack has entries
    pub fn is_empty(&self) -> bool {
        self.undos.is_empty() && self.redos.is_empty()
    }

    /// Pretty JSON text
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse JSON text
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    fn highest_id(&self) -> u64 {
        self.undos
            .iter()
            .chain(self.redos.iter())
            .filter_map(|r| r.id)
            .map(CommandId::get)
            .max()
            .unwrap_or(0)
    }
}

/// One serialized command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Engine-assigned id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CommandId>,
    /// Kind tag
    pub kind: CommandKind,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Identity of the mutated entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetId>,
    /// Merge flag
    #[serde(default)]
    pub mergeable: bool,
    /// Chain tag
    #[serde(default)]
    pub link: Link,
    /// Memory-only classification at append time
    #[serde(default)]
    pub memory_only: bool,
    /// Handler payload
    #[serde(default, skip_serializing_if = "Document::is_null")]
    pub payload: Document,
    /// Serialized command and target state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Document>,
    /// Sub-commands of a composite
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_commands: Vec<CommandRecord>,
}

impl From<&Command> for CommandRecord {
    fn from(command: &Command) -> Self {
        Self {
            id: command.id,
            kind: command.kind,
            name: command.name.clone(),
            target: command.target_id(),
            mergeable: command.mergeable,
            link: command.link,
            memory_only: command.memory_only,
            payload: command.payload.clone(),
            snapshot: command.snapshot.clone(),
            sub_commands: command.sub_commands.iter().map(CommandRecord::from).collect(),
        }
    }
}

impl CommandRecord {
    /// Detached placeholder command
    pub fn into_command(self) -> Command {
        Command {
            id: self.id,
            kind: self.kind,
            name: self.name,
            target: self.target.map(TargetRef::Detached),
            sub_commands: self
                .sub_commands
                .into_iter()
                .map(CommandRecord::into_command)
                .collect(),
            mergeable: self.mergeable,
            link: self.link,
            memory_only: self.memory_only,
            payload: self.payload,
            snapshot: self.snapshot,
            durability: if self.memory_only {
                DurabilityState::MemoryOnly
            } else {
                DurabilityState::Pending
            },
        }
    }

    fn check_kinds(&self, known: &dyn Fn(CommandKind) -> bool) -> Result<()> {
        if self.kind.is_composite() || !self.sub_commands.is_empty() {
            for sub in &self.sub_commands {
                sub.check_kinds(known)?;
            }
            return Ok(());
        }
        if known(self.kind) {
            Ok(())
        } else {
            Err(HistoryError::HandlerNotRegistered(self.kind))
        }
    }
}

impl HistoryEngine {
    /// Export every entry that has a snapshot
    ///
    /// Returns an empty document while persistence is disabled.
    pub fn to_json(&self) -> HistoryDocument {
        let mut document = HistoryDocument::new();
        if !self.config.persistence_enabled {
            return document;
        }
        let snapshotted = |c: &&Command| c.snapshot.is_some();
        document.undos = self.undos.iter().filter(snapshotted).map(CommandRecord::from).collect();
        document.redos = self.redos.iter().filter(snapshotted).map(CommandRecord::from).collect();
        document
    }

    /// Replace both stacks with the document's entries
    ///
    /// Every leaf kind must have a registered handler. The id counter resumes
    /// after the highest id in the document. Emits one history-changed.
    pub fn from_json(&mut self, document: HistoryDocument) -> Result<()> {
        if document.format_version != DOCUMENT_FORMAT_VERSION {
            return Err(HistoryError::Serialization(format!(
                "unsupported history format version {} (expected {})",
                document.format_version, DOCUMENT_FORMAT_VERSION
            )));
        }
        let known = |kind: CommandKind| self.registry.contains(kind);
        for record in document.undos.iter().chain(document.redos.iter()) {
            record.check_kinds(&known)?;
        }

        self.settle_quietly();
        self.id_counter = document.highest_id();
        self.last_edit = None;
        self.undos = document.undos.into_iter().map(CommandRecord::into_command).collect();
        self.redos = document.redos.into_iter().map(CommandRecord::into_command).collect();
        info!(
            target: "timeline::engine",
            undos = self.undos.len(),
            redos = self.redos.len(),
            id_counter = self.id_counter,
            "history loaded"
        );

        let summary = self.undos.last().map(CommandSummary::from);
        self.notifier.emit(HistoryEvent::HistoryChanged(summary));
        Ok(())
    }
}
