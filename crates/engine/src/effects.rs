//! Command-tree traversal
//!
//! Leaf commands go through their kind's handler. Composites are walked
//! structurally: sub-commands apply in order, invert in reverse, and
//! serialize as an ordered `sub_commands` list.

use crate::registry::HandlerRegistry;
use crate::targets::TargetTable;
use serde_json::json;
use timeline_core::{
    Command, Document, HistoryError, Result, StorageClass, StoragePolicy,
};

/// Direction of a traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Effect {
    Apply,
    Invert,
}

/// When to rebuild live targets from a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rehydrate {
    /// Always replace the live instance (undo)
    Always,
    /// Only rebuild identities with no live handle (redo)
    IfDetached,
}

pub(crate) fn run_effect(
    registry: &mut HandlerRegistry,
    targets: &TargetTable,
    command: &mut Command,
    effect: Effect,
) -> Result<()> {
    if command.is_composite() {
        match effect {
            Effect::Apply => {
                for sub in command.sub_commands.iter_mut() {
                    run_effect(registry, targets, sub, effect)?;
                }
            }
            Effect::Invert => {
                for sub in command.sub_commands.iter_mut().rev() {
                    run_effect(registry, targets, sub, effect)?;
                }
            }
        }
        return Ok(());
    }

    let (kind, owner) = (command.kind, command.id);
    registry.with_handler(kind, owner, |handler| match effect {
        Effect::Apply => handler.apply(command, targets),
        Effect::Invert => handler.invert(command, targets),
    })
}

pub(crate) fn serialize_tree(
    registry: &mut HandlerRegistry,
    targets: &TargetTable,
    command: &Command,
) -> Result<Document> {
    if command.is_composite() {
        let mut subs = Vec::with_capacity(command.sub_commands.len());
        for sub in &command.sub_commands {
            subs.push(serialize_tree(registry, targets, sub)?);
        }
        return Ok(json!({
            "kind": command.kind,
            "name": command.name,
            "sub_commands": subs,
        }));
    }
    registry.with_handler(command.kind, command.id, |handler| {
        handler.serialize(command, targets)
    })
}

/// Returns the number of live handles installed
pub(crate) fn rehydrate_tree(
    registry: &mut HandlerRegistry,
    targets: &mut TargetTable,
    command: &mut Command,
    doc: &Document,
    mode: Rehydrate,
) -> Result<usize> {
    if command.is_composite() {
        let Some(docs) = doc.get("sub_commands").and_then(Document::as_array) else {
            return Ok(0);
        };
        let mut installed = 0;
        for (sub, sub_doc) in command.sub_commands.iter_mut().zip(docs) {
            installed += rehydrate_tree(registry, targets, sub, sub_doc, mode)?;
        }
        return Ok(installed);
    }

    if mode == Rehydrate::IfDetached {
        if let Some(id) = command.target_id() {
            if targets.contains(&id) {
                return Ok(0);
            }
        }
    }

    let handles = {
        let table: &TargetTable = targets;
        registry.with_handler(command.kind, command.id, |handler| {
            handler.deserialize(command, doc, table)
        })?
    };
    let installed = handles.len();
    for handle in handles {
        targets.install(handle);
    }
    Ok(installed)
}

/// Memory-only if any target in the tree is
pub(crate) fn classify(
    targets: &TargetTable,
    policy: &StoragePolicy,
    command: &Command,
) -> Result<StorageClass> {
    if command.is_composite() {
        let mut class = StorageClass::Durable;
        for sub in &command.sub_commands {
            class = class.combine(classify(targets, policy, sub)?);
        }
        return Ok(class);
    }
    match command.target_id() {
        Some(id) => Ok(targets.resolve(&id)?.classify_storage(policy)),
        None => Ok(StorageClass::Durable),
    }
}

/// Every leaf kind in the tree must have a registered handler
pub(crate) fn ensure_registered(registry: &HandlerRegistry, command: &Command) -> Result<()> {
    if command.is_composite() {
        for sub in &command.sub_commands {
            ensure_registered(registry, sub)?;
        }
        return Ok(());
    }
    if registry.contains(command.kind) {
        Ok(())
    } else {
        Err(HistoryError::HandlerNotRegistered(command.kind))
    }
}
