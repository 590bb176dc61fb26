//! Change notifications emitted by the history engine
//!
//! Events are delivered synchronously to a single registered observer (the
//! document context). The only payload is a summary of the affected command.

use crate::command::Command;
use crate::types::{CommandId, CommandKind, TargetId};
use parking_lot::Mutex;
use std::sync::Arc;

/// Start/end marker for undo and redo status events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Operation began
    Start,
    /// Operation finished
    End,
}

/// Lightweight description of the command an event refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSummary {
    /// Command id, if assigned
    pub id: Option<CommandId>,
    /// Command kind
    pub kind: CommandKind,
    /// Display name
    pub name: String,
    /// Mutated entity, if any
    pub target: Option<TargetId>,
}

impl From<&Command> for CommandSummary {
    fn from(command: &Command) -> Self {
        Self {
            id: command.id,
            kind: command.kind,
            name: command.display_name().to_string(),
            target: command.target_id(),
        }
    }
}

/// A discrete notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    /// `execute` started
    ExecuteStart,
    /// `execute` finished (durability settled, or failed)
    ExecuteEnd,
    /// The stacks changed; carries the affected command (none on `clear`)
    HistoryChanged(Option<CommandSummary>),
    /// The document changed and should be redrawn
    SceneChanged,
    /// Undo status
    UndoStatus(Phase),
    /// Redo status
    RedoStatus(Phase),
}

/// Receiver of history notifications
pub trait HistoryObserver: Send {
    /// Handle one event
    fn on_event(&mut self, event: &HistoryEvent);
}

impl<F> HistoryObserver for F
where
    F: FnMut(&HistoryEvent) + Send,
{
    fn on_event(&mut self, event: &HistoryEvent) {
        self(event)
    }
}

/// Observer that records every event it sees
///
/// Cloning shares the underlying log, so one clone can be handed to the
/// engine while another is inspected.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<HistoryEvent>>>,
}

impl EventRecorder {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the recorded events
    pub fn events(&self) -> Vec<HistoryEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events matching `pred`
    pub fn count(&self, pred: impl Fn(&HistoryEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    /// Number of `HistoryChanged` events
    pub fn history_changes(&self) -> usize {
        self.count(|e| matches!(e, HistoryEvent::HistoryChanged(_)))
    }

    /// Number of `SceneChanged` events
    pub fn scene_changes(&self) -> usize {
        self.count(|e| matches!(e, HistoryEvent::SceneChanged))
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl HistoryObserver for EventRecorder {
    fn on_event(&mut self, event: &HistoryEvent) {
        self.events.lock().push(event.clone());
    }
}
