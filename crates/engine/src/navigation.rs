//! Undo, redo and position travel
//!
//! Undo and redo are dropped (not queued) while a persistence round-trip is
//! outstanding. Linked entries move between the stacks as one unit and
//! produce a single history notification.
//!
//! Undo always rebuilds the targets of a durable entry from its snapshot
//! before inverting it, so the inverse runs against a fresh instance. Redo
//! rebuilds only identities that have no live handle, then re-enters
//! `execute` with the entry's original id.

use crate::effects::{rehydrate_tree, run_effect, serialize_tree, Effect, Rehydrate};
use crate::history::HistoryEngine;
use crate::lock::ExecuteOrigin;
use timeline_core::{
    Command, CommandId, CommandSummary, Document, HistoryError, HistoryEvent, Link, Phase,
    Result,
};
use tracing::{debug, info, warn};

impl HistoryEngine {
    /// Invert the top entry (and everything linked to it)
    ///
    /// Returns `Ok(false)` without doing anything if the undo stack is empty
    /// or a persistence round-trip is outstanding.
    pub fn undo(&mut self) -> Result<bool> {
        if self.lock.is_held() {
            debug!(target: "timeline::engine", "undo dropped while persistence is in flight");
            return Ok(false);
        }
        if self.undos.is_empty() {
            return Ok(false);
        }

        self.notifier.emit(HistoryEvent::UndoStatus(Phase::Start));
        let result = self.undo_chain();
        self.notifier.emit(HistoryEvent::UndoStatus(Phase::End));
        let summary = result?;
        // Only a fresh execute may merge into what is now the top entry.
        self.last_edit = None;
        self.notifier.changed(summary);
        Ok(true)
    }

    fn undo_chain(&mut self) -> Result<Option<CommandSummary>> {
        let mut last = None;
        while let Some(mut command) = self.undos.pop() {
            if let Err(e) = self.undo_one(&mut command) {
                self.undos.push(command);
                return Err(e);
            }
            let link = command.link;
            last = Some(CommandSummary::from(&command));
            self.redos.push(command);
            self.stats.undone += 1;

            let chained = link == Link::Prev
                || self.undos.last().map_or(false, |top| top.link == Link::Next);
            if !chained {
                break;
            }
        }
        Ok(last)
    }

    fn undo_one(&mut self, command: &mut Command) -> Result<()> {
        if !command.memory_only {
            if let Some(snapshot) = self.snapshot_of(command)? {
                rehydrate_tree(
                    &mut self.registry,
                    &mut self.targets,
                    command,
                    &snapshot,
                    Rehydrate::Always,
                )?;
            }
        }
        run_effect(&mut self.registry, &self.targets, command, Effect::Invert)
    }

    /// Cached snapshot, or the stored record for an acknowledged entry
    fn snapshot_of(&self, command: &Command) -> Result<Option<Document>> {
        if let Some(snapshot) = &command.snapshot {
            return Ok(Some(snapshot.clone()));
        }
        if !command.is_durable() {
            return Ok(None);
        }
        let (Some(id), Some(channel)) = (command.id, self.channel.as_ref()) else {
            return Ok(None);
        };
        debug!(target: "timeline::durability", id = %id, "fetching snapshot");
        let record = channel.fetch(id).wait()?;
        Ok(Some(record.document))
    }

    /// Re-apply the most recently undone entry (and everything linked to it)
    ///
    /// Returns `Ok(false)` without doing anything if the redo stack is empty
    /// or a persistence round-trip is outstanding.
    ///
    /// # Errors
    ///
    /// An apply failure stops the chain where it happened. A durability
    /// failure does not: the rest of the chain is redone, the single history
    /// notification fires, and the first such failure is returned afterwards.
    pub fn redo(&mut self) -> Result<bool> {
        if self.lock.is_held() {
            debug!(target: "timeline::engine", "redo dropped while persistence is in flight");
            return Ok(false);
        }
        if self.redos.is_empty() {
            return Ok(false);
        }

        self.notifier.emit(HistoryEvent::RedoStatus(Phase::Start));
        let mut durability = None;
        let result = self.redo_chain(&mut durability);
        self.notifier.emit(HistoryEvent::RedoStatus(Phase::End));
        let summary = result?;
        self.notifier.changed(summary);
        match durability {
            Some(e) => Err(e),
            None => Ok(true),
        }
    }

    fn redo_chain(
        &mut self,
        durability: &mut Option<HistoryError>,
    ) -> Result<Option<CommandSummary>> {
        let mut last = None;
        while let Some(mut command) = self.redos.pop() {
            if let Err(e) = self.prepare_redo(&mut command) {
                self.redos.push(command);
                return Err(e);
            }
            let link = command.link;
            let summary = CommandSummary::from(&command);
            match self.execute_with_origin(command, ExecuteOrigin::Redo) {
                Ok(_) => {}
                Err(e) if e.is_durability_failure() => {
                    warn!(target: "timeline::durability", id = ?summary.id, error = %e, "redo persisted with failure");
                    durability.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
            self.stats.redone += 1;
            last = Some(summary);

            let chained = link == Link::Next
                || self.redos.last().map_or(false, |top| top.link == Link::Prev);
            if !chained {
                break;
            }
        }
        Ok(last)
    }

    /// One redo step inside travel
    ///
    /// A durability failure still counts as a step; the first one is kept in
    /// `durability` and the walk goes on.
    fn travel_redo(&mut self, durability: &mut Option<HistoryError>) -> Result<bool> {
        match self.redo() {
            Err(e) if e.is_durability_failure() => {
                durability.get_or_insert(e);
                Ok(true)
            }
            other => other,
        }
    }

    fn prepare_redo(&mut self, command: &mut Command) -> Result<()> {
        if command.memory_only {
            return Ok(());
        }
        let detached = command
            .referenced_targets()
            .iter()
            .any(|id| !self.targets.contains(id));
        if !detached {
            return Ok(());
        }
        if let Some(snapshot) = self.snapshot_of(command)? {
            rehydrate_tree(
                &mut self.registry,
                &mut self.targets,
                command,
                &snapshot,
                Rehydrate::IfDetached,
            )?;
        }
        Ok(())
    }

    /// Undo or redo until the top entry is `target` (`None` = start of history)
    ///
    /// Notifications are suppressed while stepping; one history-changed and
    /// one scene-changed follow if anything moved. Returns the number of
    /// undo/redo steps taken.
    pub fn go_to_state(&mut self, target: Option<CommandId>) -> Result<usize> {
        self.settle_quietly();
        if self.current_id() == target {
            return Ok(0);
        }

        self.notifier.mute();
        let result = self.travel(target);
        self.notifier.unmute();

        let summary = self.undos.last().map(CommandSummary::from);
        self.notifier.changed(summary);
        let steps = result?;
        debug!(target: "timeline::engine", steps, current = ?self.current_id(), "travelled");
        Ok(steps)
    }

    pub(crate) fn travel(&mut self, target: Option<CommandId>) -> Result<usize> {
        let mut steps = 0;
        let mut durability = None;
        if target > self.current_id() {
            while self.current_id() < target {
                self.settle_quietly();
                if !self.travel_redo(&mut durability)? {
                    break;
                }
                steps += 1;
            }
        } else {
            while self.current_id() > target {
                self.settle_quietly();
                if !self.undo()? {
                    break;
                }
                steps += 1;
            }
        }
        self.settle_quietly();
        match durability {
            Some(e) => Err(e),
            None => Ok(steps),
        }
    }

    /// Backfill snapshots for entries that never got one
    ///
    /// Entries executed while persistence was disabled have no snapshot and
    /// are left out of [`to_json`](Self::to_json). This rewinds to the start,
    /// redoes one step at a time, serializes every entry that lands on the
    /// undo stack without a snapshot, then travels to `target`. Returns the
    /// number of snapshots created.
    pub fn enable_serialization(&mut self, target: Option<CommandId>) -> Result<usize> {
        self.settle_quietly();
        self.notifier.mute();
        let result = self.repair_snapshots(target);
        self.notifier.unmute();

        let summary = self.undos.last().map(CommandSummary::from);
        self.notifier.changed(summary);
        let repaired = result?;
        info!(target: "timeline::engine", repaired, "snapshots backfilled");
        Ok(repaired)
    }

    fn repair_snapshots(&mut self, target: Option<CommandId>) -> Result<usize> {
        self.travel(None)?;
        let mut repaired = 0;
        let mut durability = None;
        loop {
            let before = self.undos.len();
            if !self.travel_redo(&mut durability)? {
                break;
            }
            self.settle_quietly();
            for index in before.min(self.undos.len())..self.undos.len() {
                if self.undos[index].snapshot.is_some() {
                    continue;
                }
                let snapshot = serialize_tree(&mut self.registry, &self.targets, &self.undos[index])?;
                self.undos[index].snapshot = Some(snapshot);
                repaired += 1;
            }
        }
        self.travel(target)?;
        match durability {
            Some(e) => Err(e),
            None => Ok(repaired),
        }
    }
}
