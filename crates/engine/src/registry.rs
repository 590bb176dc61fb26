//! Handler registry
//!
//! Maps each [`CommandKind`] to a factory and, once first needed, the single
//! live handler instance for that kind. A handler is bound to at most one
//! command at a time; binding an already-bound handler fails with
//! `HandlerInUse` instead of silently sharing state between commands.

use crate::handler::CommandHandler;
use std::collections::HashMap;
use std::fmt;
use timeline_core::{CommandId, CommandKind, HistoryError, Result};
use tracing::{debug, trace};

/// Builds a handler the first time its kind is needed
pub type HandlerFactory = Box<dyn Fn() -> Box<dyn CommandHandler> + Send + Sync>;

struct HandlerSlot {
    factory: HandlerFactory,
    instance: Option<Box<dyn CommandHandler>>,
    /// `Some(owner)` while bound; the owner is `None` for sub-commands
    binding: Option<Option<CommandId>>,
    constructed: usize,
}

impl HandlerSlot {
    fn instance(&mut self) -> &mut dyn CommandHandler {
        if self.instance.is_none() {
            self.constructed += 1;
        }
        let factory = &self.factory;
        self.instance.get_or_insert_with(|| factory()).as_mut()
    }
}

/// Kind-to-handler table with one live instance per kind
#[derive(Default)]
pub struct HandlerRegistry {
    slots: HashMap<CommandKind, HandlerSlot>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.slots.keys().map(CommandKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerRegistry").field("kinds", &kinds).finish()
    }
}

impl HandlerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a kind
    ///
    /// Re-registering replaces the factory and drops any idle instance.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for the composite kind, `HandlerInUse` if the
    /// current handler for the kind is bound.
    pub fn register<F>(&mut self, kind: CommandKind, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn CommandHandler> + Send + Sync + 'static,
    {
        if kind.is_composite() {
            return Err(HistoryError::invalid(
                "composite commands are walked by the engine and take no handler",
            ));
        }
        if self.is_bound(kind) {
            return Err(HistoryError::HandlerInUse(kind));
        }
        debug!(target: "timeline::registry", kind = %kind, "handler registered");
        self.slots.insert(
            kind,
            HandlerSlot {
                factory: Box::new(factory),
                instance: None,
                binding: None,
                constructed: 0,
            },
        );
        Ok(())
    }

    /// True if a factory is registered for the kind
    pub fn contains(&self, kind: CommandKind) -> bool {
        self.slots.contains_key(&kind)
    }

    /// Registered kinds
    pub fn kinds(&self) -> impl Iterator<Item = CommandKind> + '_ {
        self.slots.keys().copied()
    }

    /// The live handler for a kind, constructing it on first use
    pub fn resolve(&mut self, kind: CommandKind) -> Result<&mut dyn CommandHandler> {
        let slot = self
            .slots
            .get_mut(&kind)
            .ok_or(HistoryError::HandlerNotRegistered(kind))?;
        Ok(slot.instance())
    }

    /// Bind the handler for a kind to `owner`
    ///
    /// # Errors
    ///
    /// `HandlerInUse` if already bound, `HandlerNotRegistered` if unknown.
    pub fn bind(
        &mut self,
        kind: CommandKind,
        owner: Option<CommandId>,
    ) -> Result<&mut dyn CommandHandler> {
        let slot = self
            .slots
            .get_mut(&kind)
            .ok_or(HistoryError::HandlerNotRegistered(kind))?;
        if slot.binding.is_some() {
            return Err(HistoryError::HandlerInUse(kind));
        }
        slot.binding = Some(owner);
        trace!(target: "timeline::registry", kind = %kind, "handler bound");
        Ok(slot.instance())
    }

    /// Owner of the current binding, if bound
    pub fn bound_to(&self, kind: CommandKind) -> Option<Option<CommandId>> {
        self.slots.get(&kind).and_then(|slot| slot.binding)
    }

    /// True if the handler for a kind is bound
    pub fn is_bound(&self, kind: CommandKind) -> bool {
        self.bound_to(kind).is_some()
    }

    /// Unbind the handler for a kind and let it drop per-command state
    pub fn release(&mut self, kind: CommandKind) {
        if let Some(slot) = self.slots.get_mut(&kind) {
            if slot.binding.take().is_some() {
                if let Some(handler) = slot.instance.as_mut() {
                    handler.release();
                }
                trace!(target: "timeline::registry", kind = %kind, "handler released");
            }
        }
    }

    /// Unbind every handler
    pub fn release_all(&mut self) {
        let kinds: Vec<_> = self.slots.keys().copied().collect();
        for kind in kinds {
            self.release(kind);
        }
    }

    /// How many times the factory for a kind has built an instance
    pub fn constructed(&self, kind: CommandKind) -> usize {
        self.slots.get(&kind).map_or(0, |slot| slot.constructed)
    }

    /// Run `f` with the handler for `kind`, bound to `owner` for the call
    ///
    /// If the handler is already bound to the same committed command, it is
    /// used as-is and stays bound afterwards.
    pub fn with_handler<R>(
        &mut self,
        kind: CommandKind,
        owner: Option<CommandId>,
        f: impl FnOnce(&mut dyn CommandHandler) -> Result<R>,
    ) -> Result<R> {
        if owner.is_some() && self.bound_to(kind) == Some(owner) {
            return f(self.resolve(kind)?);
        }
        let result = f(self.bind(kind, owner)?);
        self.release(kind);
        result
    }
}
