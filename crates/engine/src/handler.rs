//! Command handlers
//!
//! A [`CommandHandler`] owns the behavior of one [`CommandKind`]: applying
//! and inverting the effect, folding a mergeable edit into its predecessor,
//! and converting a command and its target to and from a snapshot document.
//!
//! Handlers are bound to one command at a time (see
//! [`HandlerRegistry`](crate::HandlerRegistry)). The engine binds the
//! handler before `apply` and keeps it bound until the command's persistence
//! round-trip settles, then calls [`CommandHandler::release`].
//!
//! Composite commands have no handler; the engine walks their sub-commands.

use crate::targets::TargetTable;
use serde_json::json;
use timeline_core::{Command, CommandKind, Document, HistoryError, Result, TargetHandle};
use timeline_durability::{Ack, Completion, PersistRecord, PersistenceChannel};

/// Behavior of one command kind
pub trait CommandHandler: Send {
    /// Kind this handler serves
    fn kind(&self) -> CommandKind;

    /// Perform the effect
    fn apply(&mut self, command: &mut Command, targets: &TargetTable) -> Result<()>;

    /// Reverse the effect
    fn invert(&mut self, command: &mut Command, targets: &TargetTable) -> Result<()>;

    /// Fold `incoming` into `previous`
    ///
    /// Called only when both commands are mergeable, share a kind and target,
    /// and arrived inside the merge window. `previous` keeps its id. The
    /// engine applies `previous` afterwards, so the merged payload must
    /// describe the combined effect.
    fn merge_into(&mut self, previous: &mut Command, incoming: &Command) -> Result<()> {
        let _ = incoming;
        Err(HistoryError::invalid(format!(
            "{} commands cannot be merged",
            previous.kind
        )))
    }

    /// Hand a record to the persistence channel
    fn persist(&mut self, record: PersistRecord, channel: &dyn PersistenceChannel) -> Completion<Ack> {
        channel.store(record)
    }

    /// Snapshot document for a command and its target
    ///
    /// The default captures the payload and the live target's state.
    fn serialize(&self, command: &Command, targets: &TargetTable) -> Result<Document> {
        let target = match command.target_id() {
            Some(id) => targets.resolve(&id)?.serialize()?,
            None => Document::Null,
        };
        Ok(json!({
            "kind": command.kind,
            "payload": command.payload,
            "target": target,
        }))
    }

    /// Restore a command from a snapshot document
    ///
    /// Returns the live handles rematerialized from the document; the engine
    /// installs them in its target table. The default restores the payload
    /// and, when the target is live, replaces it with a fresh instance built
    /// by [`Target::deserialize`](timeline_core::Target::deserialize).
    fn deserialize(
        &mut self,
        command: &mut Command,
        doc: &Document,
        targets: &TargetTable,
    ) -> Result<Vec<TargetHandle>> {
        if let Some(payload) = doc.get("payload") {
            command.payload = payload.clone();
        }
        let state = match doc.get("target") {
            Some(state) if !state.is_null() => state,
            _ => return Ok(Vec::new()),
        };
        let Some(live) = command.target_id().and_then(|id| targets.get(&id)) else {
            return Ok(Vec::new());
        };
        Ok(vec![live.deserialize(state)?])
    }

    /// Drop any per-command state after the handler is unbound
    fn release(&mut self) {}
}

/// Resolve the target of a leaf command or fail with `UnknownTarget`
pub fn target_of(command: &Command, targets: &TargetTable) -> Result<TargetHandle> {
    match command.target_id() {
        Some(id) => targets.resolve(&id),
        None => Err(HistoryError::apply(command.kind, "command has no target")),
    }
}
