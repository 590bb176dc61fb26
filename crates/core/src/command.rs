//! Command: one recorded, reversible edit
//!
//! Commands are immutable by convention once the engine has appended them.
//! The engine fills in `id`, `memory_only`, `durability` and `snapshot`;
//! handlers may rewrite `payload` when merging. The target reference is held
//! as a live handle only until the engine installs it in its indirection
//! table, after which the command keeps the identity alone.

use crate::target::TargetHandle;
use crate::types::{CommandId, CommandKind, Document, Link, TargetId};
use std::fmt;

/// Reference from a command to the entity it mutates
#[derive(Clone)]
pub enum TargetRef {
    /// Live handle supplied by the caller, not yet installed by the engine
    Live(TargetHandle),
    /// Identity only; resolved through the engine's target table
    Detached(TargetId),
}

impl TargetRef {
    /// Identity of the referenced entity
    pub fn identity(&self) -> TargetId {
        match self {
            TargetRef::Live(handle) => handle.identity(),
            TargetRef::Detached(id) => id.clone(),
        }
    }

    /// The live handle, if this reference still carries one
    pub fn live(&self) -> Option<&TargetHandle> {
        match self {
            TargetRef::Live(handle) => Some(handle),
            TargetRef::Detached(_) => None,
        }
    }
}

impl fmt::Debug for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRef::Live(handle) => write!(f, "Live({})", handle.identity()),
            TargetRef::Detached(id) => write!(f, "Detached({})", id),
        }
    }
}

/// Durability progress of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityState {
    /// Applied in memory, not yet acknowledged by the channel
    #[default]
    Pending,
    /// Acknowledged by the persistence channel
    Durable,
    /// Exempt from persistence
    MemoryOnly,
}

/// One reversible edit
#[derive(Debug, Clone)]
pub struct Command {
    /// Assigned on first append; `None` until then
    pub id: Option<CommandId>,
    /// Selects the handler
    pub kind: CommandKind,
    /// Optional display name
    pub name: Option<String>,
    /// Entity mutated; `None` for composites
    pub target: Option<TargetRef>,
    /// Ordered sub-commands (composites only)
    pub sub_commands: Vec<Command>,
    /// Whether same-kind, same-target edits inside the merge window collapse into this one
    pub mergeable: bool,
    /// Chain tag
    pub link: Link,
    /// Computed by the engine at append time
    pub memory_only: bool,
    /// Effect parameters, interpreted by the handler only
    pub payload: Document,
    /// Cached serialized form
    pub snapshot: Option<Document>,
    /// Durability progress
    pub durability: DurabilityState,
}

impl Command {
    /// New command against a live target
    pub fn new(kind: CommandKind, target: &TargetHandle) -> Self {
        Self::with_target(kind, Some(TargetRef::Live(target.clone())))
    }

    /// New command against a target known only by identity
    pub fn detached(kind: CommandKind, target: TargetId) -> Self {
        Self::with_target(kind, Some(TargetRef::Detached(target)))
    }

    /// Composite command applying `sub_commands` in order
    pub fn composite(sub_commands: Vec<Command>) -> Self {
        let mut command = Self::with_target(CommandKind::Multi, None);
        command.sub_commands = sub_commands;
        command
    }

    fn with_target(kind: CommandKind, target: Option<TargetRef>) -> Self {
        Self {
            id: None,
            kind,
            name: None,
            target,
            sub_commands: Vec::new(),
            mergeable: false,
            link: Link::None,
            memory_only: false,
            payload: Document::Null,
            snapshot: None,
            durability: DurabilityState::Pending,
        }
    }

    /// Set the effect parameters
    pub fn with_payload(mut self, payload: Document) -> Self {
        self.payload = payload;
        self
    }

    /// Mark as mergeable with a same-kind, same-target predecessor
    pub fn mergeable(mut self) -> Self {
        self.mergeable = true;
        self
    }

    /// Set a display name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the chain tag
    pub fn linked(mut self, link: Link) -> Self {
        self.link = link;
        self
    }

    /// Preassign an id; explicit ids bypass the merge test
    pub fn with_id(mut self, id: CommandId) -> Self {
        self.id = Some(id);
        self
    }

    /// Identity of the mutated entity
    pub fn target_id(&self) -> Option<TargetId> {
        self.target.as_ref().map(TargetRef::identity)
    }

    /// True if this command carries sub-commands
    pub fn is_composite(&self) -> bool {
        !self.sub_commands.is_empty() || self.kind.is_composite()
    }

    /// Display name, falling back to the kind tag
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.kind.as_str())
    }

    /// Visit this command and every nested sub-command, depth first
    pub fn walk(&self, f: &mut dyn FnMut(&Command)) {
        f(self);
        for sub in &self.sub_commands {
            sub.walk(f);
        }
    }

    /// Mutable variant of [`walk`](Self::walk)
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Command)) {
        f(self);
        for sub in &mut self.sub_commands {
            sub.walk_mut(f);
        }
    }

    /// Identities referenced anywhere in this command tree
    pub fn referenced_targets(&self) -> Vec<TargetId> {
        let mut ids = Vec::new();
        self.walk(&mut |cmd| {
            if let Some(id) = cmd.target_id() {
                ids.push(id);
            }
        });
        ids
    }

    /// True once the channel acknowledged this command
    pub fn is_durable(&self) -> bool {
        self.durability == DurabilityState::Durable
    }
}
