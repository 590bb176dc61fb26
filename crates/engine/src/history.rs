//! The history engine
//!
//! Owns the undo and redo stacks and drives every command through its
//! handler. A command whose targets are durable is applied, serialized and
//! handed to the persistence channel; until the channel acknowledges it the
//! engine holds the [`DurabilityLock`], undo/redo requests are dropped, and
//! the redo stack is left alone. Memory-only commands skip the channel and
//! complete synchronously.
//!
//! All reconciliation happens on the caller's thread: [`HistoryEngine::poll_durability`]
//! checks without blocking, [`HistoryEngine::settle`] blocks until the
//! outstanding round-trip ends.
//!
//! Undo/redo and position travel live in `navigation`; document
//! export/import lives in `serialization`.

use crate::clock::{Clock, SystemClock};
use crate::config::HistoryConfig;
use crate::effects::{classify, ensure_registered, run_effect, serialize_tree, Effect};
use crate::handler::CommandHandler;
use crate::lock::{DurabilityLock, ExecuteOrigin, LockState};
use crate::notify::Notifier;
use crate::registry::HandlerRegistry;
use crate::targets::TargetTable;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use timeline_core::{
    Command, CommandId, CommandKind, CommandSummary, DurabilityState, HistoryError, HistoryEvent,
    HistoryObserver, Result, StoragePolicy, TargetHandle, TargetId, TargetRef,
};
use timeline_durability::{
    Ack, Completion, FallbackStore, FileSpool, PersistRecord, PersistenceChannel,
};
use tracing::{debug, error, info, warn};

/// How a command's persistence ended up when `execute` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Not handed to the channel: memory-only, persistence disabled, or no
    /// channel available
    Skipped,
    /// Record handed off; the lock is held until the round-trip settles
    InFlight,
    /// Acknowledged before `execute` returned
    Durable,
}

/// Result of a successful `execute`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteReceipt {
    /// Id of the stack entry that now holds the edit
    pub id: CommandId,
    /// True if the edit was folded into the previous entry
    pub merged: bool,
    /// Persistence progress at return time
    pub persistence: Persistence,
}

/// Running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryStats {
    /// Commands applied through `execute` (including redo re-entries)
    pub executed: u64,
    /// Edits folded into a previous entry
    pub merged: u64,
    /// Commands inverted by undo
    pub undone: u64,
    /// Commands re-applied by redo
    pub redone: u64,
    /// Undo entries removed by eviction
    pub evicted: u64,
    /// Round-trips acknowledged by the channel
    pub persisted: u64,
    /// Round-trips that failed
    pub durability_failures: u64,
    /// Records written to the fallback store
    pub spooled: u64,
}

pub(crate) struct InFlight {
    pub(crate) record: PersistRecord,
    pub(crate) bound: Option<CommandKind>,
    pub(crate) origin: ExecuteOrigin,
    pub(crate) summary: CommandSummary,
}

pub(crate) struct Pending {
    pub(crate) flight: InFlight,
    pub(crate) completion: Completion<Ack>,
}

/// Command-sourcing history: undo/redo stacks over reversible commands
pub struct HistoryEngine {
    pub(crate) config: HistoryConfig,
    pub(crate) policy: StoragePolicy,
    pub(crate) undos: Vec<Command>,
    pub(crate) redos: Vec<Command>,
    pub(crate) id_counter: u64,
    pub(crate) registry: HandlerRegistry,
    pub(crate) targets: TargetTable,
    pub(crate) lock: DurabilityLock,
    pub(crate) pending: Option<Pending>,
    pub(crate) channel: Option<Arc<dyn PersistenceChannel>>,
    pub(crate) fallback: Option<Arc<dyn FallbackStore>>,
    pub(crate) notifier: Notifier,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) last_edit: Option<Instant>,
    pub(crate) stats: HistoryStats,
    pub(crate) durability_error: Option<HistoryError>,
}

impl std::fmt::Debug for HistoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryEngine")
            .field("undos", &self.undos.len())
            .field("redos", &self.redos.len())
            .field("id_counter", &self.id_counter)
            .field("lock", self.lock.state())
            .field("stats", &self.stats)
            .finish()
    }
}

impl HistoryEngine {
    /// Engine with the given configuration and no persistence channel
    ///
    /// Opens the fallback spool when `spool_dir` is set.
    pub fn new(config: HistoryConfig) -> Result<Self> {
        config.validate()?;
        let fallback: Option<Arc<dyn FallbackStore>> = match &config.spool_dir {
            Some(dir) => Some(Arc::new(FileSpool::open_dir(dir)?)),
            None => None,
        };
        info!(
            target: "timeline::engine",
            capacity = config.capacity,
            merge_window_ms = config.merge_window_ms,
            persistence = config.persistence_enabled,
            "history engine created"
        );
        Ok(Self {
            policy: config.storage_policy(),
            config,
            undos: Vec::new(),
            redos: Vec::new(),
            id_counter: 0,
            registry: HandlerRegistry::new(),
            targets: TargetTable::new(),
            lock: DurabilityLock::new(),
            pending: None,
            channel: None,
            fallback,
            notifier: Notifier::default(),
            clock: Arc::new(SystemClock),
            last_edit: None,
            stats: HistoryStats::default(),
            durability_error: None,
        })
    }

    /// Engine configured from a `history.toml` file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Self::new(HistoryConfig::from_file(path)?)
    }

    // ========================================================================
    // Wiring
    // ========================================================================

    /// Route durable commands through `channel`
    pub fn set_channel(&mut self, channel: Arc<dyn PersistenceChannel>) {
        info!(target: "timeline::engine", mode = channel.mode_name(), "persistence channel attached");
        self.channel = Some(channel);
    }

    /// Where records go when the channel fails
    pub fn set_fallback(&mut self, store: Arc<dyn FallbackStore>) {
        self.fallback = Some(store);
    }

    /// Replace the merge-window time source
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// Receive history notifications
    pub fn set_observer(&mut self, observer: impl HistoryObserver + 'static) {
        self.notifier.set_observer(Box::new(observer));
    }

    /// Stop receiving notifications, returning the observer
    pub fn take_observer(&mut self) -> Option<Box<dyn HistoryObserver>> {
        self.notifier.take_observer()
    }

    /// Register the handler factory for a kind
    pub fn register_handler<F>(&mut self, kind: CommandKind, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn CommandHandler> + Send + Sync + 'static,
    {
        self.registry.register(kind, factory)
    }

    /// Make a live entity known to the engine, replacing any instance with
    /// the same identity
    ///
    /// The identity stays resolvable until [`clear`](Self::clear), even after
    /// every entry that mentions it has been evicted.
    pub fn install_target(&mut self, handle: TargetHandle) -> Option<TargetHandle> {
        self.targets.install_pinned(handle)
    }

    /// Current live instance for an identity
    ///
    /// Undo may replace an instance with a freshly rehydrated one, so callers
    /// should look targets up here rather than hold on to old handles.
    pub fn target(&self, id: &TargetId) -> Option<TargetHandle> {
        self.targets.get(id)
    }

    /// The target indirection table
    pub fn targets(&self) -> &TargetTable {
        &self.targets
    }

    /// The handler registry
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Active configuration
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Turn persistence and snapshotting on or off
    ///
    /// Commands executed while disabled never get a snapshot; see
    /// [`enable_serialization`](Self::enable_serialization).
    pub fn set_persistence_enabled(&mut self, enabled: bool) {
        self.config.persistence_enabled = enabled;
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Undo stack, oldest first
    pub fn undo_stack(&self) -> &[Command] {
        &self.undos
    }

    /// Redo stack, oldest-undone last
    pub fn redo_stack(&self) -> &[Command] {
        &self.redos
    }

    /// Number of undo entries in memory
    pub fn undo_len(&self) -> usize {
        self.undos.len()
    }

    /// Number of redo entries
    pub fn redo_len(&self) -> usize {
        self.redos.len()
    }

    /// True if there is something to undo
    pub fn can_undo(&self) -> bool {
        !self.undos.is_empty()
    }

    /// True if there is something to redo
    pub fn can_redo(&self) -> bool {
        !self.redos.is_empty()
    }

    /// Id of the top undo entry; `None` at the start of history
    pub fn current_id(&self) -> Option<CommandId> {
        self.undos.last().and_then(|c| c.id)
    }

    /// Most recent id handed out
    pub fn id_counter(&self) -> u64 {
        self.id_counter
    }

    /// Top undo entry
    pub fn last_command(&self) -> Option<&Command> {
        self.undos.last()
    }

    /// Summaries of the undo stack, oldest first
    pub fn undo_entries(&self) -> Vec<CommandSummary> {
        self.undos.iter().map(CommandSummary::from).collect()
    }

    /// Summaries of the redo stack, oldest-undone last
    pub fn redo_entries(&self) -> Vec<CommandSummary> {
        self.redos.iter().map(CommandSummary::from).collect()
    }

    /// Durability lock state
    pub fn lock_state(&self) -> &LockState {
        self.lock.state()
    }

    /// True while a persistence round-trip is outstanding
    pub fn is_locked(&self) -> bool {
        self.lock.is_held()
    }

    /// Undo entries removed by eviction so far
    pub fn evicted_count(&self) -> u64 {
        self.stats.evicted
    }

    /// Running counters
    pub fn stats(&self) -> HistoryStats {
        self.stats
    }

    // ========================================================================
    // Execute
    // ========================================================================

    /// Apply a new edit and record it
    ///
    /// Settles any outstanding round-trip first. A mergeable edit of the same
    /// kind on the same target arriving within the merge window is folded
    /// into the top entry instead of appended. Durable edits are handed to the
    /// persistence channel; the redo stack is cleared once that settles.
    ///
    /// # Errors
    ///
    /// Handler lookup and apply failures, and durability failures when the
    /// channel completes before this call returns. An applied edit stays on
    /// the undo stack even if its persistence failed.
    pub fn execute(&mut self, command: Command) -> Result<ExecuteReceipt> {
        self.execute_with_origin(command, ExecuteOrigin::Fresh)
    }

    pub(crate) fn execute_with_origin(
        &mut self,
        mut command: Command,
        origin: ExecuteOrigin,
    ) -> Result<ExecuteReceipt> {
        self.settle_quietly();
        let fresh = origin == ExecuteOrigin::Fresh;
        if fresh {
            self.notifier.emit(HistoryEvent::ExecuteStart);
        }

        if let Err(e) = ensure_registered(&self.registry, &command) {
            return self.abandon(None, origin, e);
        }
        self.attach_targets(&mut command);
        let memory_only = match classify(&self.targets, &self.policy, &command) {
            Ok(class) => class.is_memory_only(),
            Err(e) => return self.abandon(None, origin, e),
        };

        let now = self.clock.now();
        let merged = self.should_merge(&command, now);
        self.last_edit = Some(now);

        let id = if merged {
            match self.merge_into_top(&command) {
                Ok(id) => id,
                Err(e) => return self.abandon(None, origin, e),
            }
        } else {
            self.append(command, memory_only)
        };
        let index = self.undos.len() - 1;

        let channel = if memory_only {
            None
        } else {
            self.persisting_channel()
        };
        let Some(channel) = channel else {
            return self.execute_in_memory(index, id, merged, origin);
        };

        // Durable path: the lock and the handler binding are held until the
        // round-trip settles.
        let kind = self.undos[index].kind;
        if let Err(e) = self.lock.acquire(id, kind, origin, now) {
            return self.abandon(None, origin, e);
        }
        let bound = if self.undos[index].is_composite() {
            None
        } else {
            if let Err(e) = self.registry.bind(kind, Some(id)) {
                return self.abandon(None, origin, e);
            }
            Some(kind)
        };

        if let Err(e) = run_effect(
            &mut self.registry,
            &self.targets,
            &mut self.undos[index],
            Effect::Apply,
        ) {
            warn!(target: "timeline::engine", id = %id, kind = %kind, error = %e, "apply failed");
            return self.abandon(bound, origin, e);
        }
        self.stats.executed += 1;

        let document = match serialize_tree(&mut self.registry, &self.targets, &self.undos[index]) {
            Ok(document) => document,
            Err(e) => return self.abandon(bound, origin, e),
        };
        let record = PersistRecord::new(id, kind, self.undos[index].target_id(), document);
        let completion = match self.store_through_handler(bound, id, record.clone(), channel.as_ref())
        {
            Ok(completion) => completion,
            Err(e) => return self.abandon(bound, origin, e),
        };
        debug!(
            target: "timeline::engine",
            id = %id,
            kind = %kind,
            merged,
            mode = channel.mode_name(),
            "record handed to persistence"
        );

        let summary = CommandSummary::from(&self.undos[index]);
        self.pending = Some(Pending {
            flight: InFlight {
                record,
                bound,
                origin,
                summary,
            },
            completion,
        });

        // Channels that complete inline are reconciled before returning.
        match self.poll_durability() {
            Some(result) => result.map(|id| ExecuteReceipt {
                id,
                merged,
                persistence: Persistence::Durable,
            }),
            None => Ok(ExecuteReceipt {
                id,
                merged,
                persistence: Persistence::InFlight,
            }),
        }
    }

    fn execute_in_memory(
        &mut self,
        index: usize,
        id: CommandId,
        merged: bool,
        origin: ExecuteOrigin,
    ) -> Result<ExecuteReceipt> {
        let kind = self.undos[index].kind;
        if let Err(e) = run_effect(
            &mut self.registry,
            &self.targets,
            &mut self.undos[index],
            Effect::Apply,
        ) {
            warn!(target: "timeline::engine", id = %id, kind = %kind, error = %e, "apply failed");
            return self.abandon(None, origin, e);
        }
        self.stats.executed += 1;
        debug!(target: "timeline::engine", id = %id, kind = %kind, merged, "command applied without persistence");

        let summary = CommandSummary::from(&self.undos[index]);
        if origin == ExecuteOrigin::Fresh {
            self.redos.clear();
        }
        self.enforce_capacity();
        if origin == ExecuteOrigin::Fresh {
            self.notifier.changed(Some(summary));
            self.notifier.emit(HistoryEvent::ExecuteEnd);
        }
        Ok(ExecuteReceipt {
            id,
            merged,
            persistence: Persistence::Skipped,
        })
    }

    /// Release whatever `execute` holds and report `error`
    fn abandon(
        &mut self,
        bound: Option<CommandKind>,
        origin: ExecuteOrigin,
        error: HistoryError,
    ) -> Result<ExecuteReceipt> {
        if let Some(kind) = bound {
            self.registry.release(kind);
        }
        self.lock.release();
        if origin == ExecuteOrigin::Fresh {
            self.notifier.emit(HistoryEvent::ExecuteEnd);
        }
        Err(error)
    }

    /// Install live handles carried by the command and detach it from them
    ///
    /// An identity already in the table keeps its current instance.
    fn attach_targets(&mut self, command: &mut Command) {
        let targets = &mut self.targets;
        command.walk_mut(&mut |cmd| {
            let live = match &cmd.target {
                Some(TargetRef::Live(handle)) => Some(handle.clone()),
                _ => None,
            };
            if let Some(handle) = live {
                let id = handle.identity();
                targets.install_if_absent(handle);
                cmd.target = Some(TargetRef::Detached(id));
            }
        });
    }

    fn should_merge(&self, command: &Command, now: Instant) -> bool {
        if command.id.is_some() || !command.mergeable || command.is_composite() {
            return false;
        }
        let (Some(top), Some(last_edit)) = (self.undos.last(), self.last_edit) else {
            return false;
        };
        let same_target = match (top.target_id(), command.target_id()) {
            (Some(a), Some(b)) => self.targets.canonical(&a) == self.targets.canonical(&b),
            _ => false,
        };
        top.mergeable
            && !top.is_composite()
            && top.kind == command.kind
            && same_target
            && now.saturating_duration_since(last_edit) < self.config.merge_window()
    }

    fn merge_into_top(&mut self, incoming: &Command) -> Result<CommandId> {
        let Some(top) = self.undos.last_mut() else {
            return Err(HistoryError::invalid("no entry to merge into"));
        };
        let id = top
            .id
            .ok_or_else(|| HistoryError::invalid("merge target has no id"))?;
        self.registry
            .with_handler(incoming.kind, Some(id), |handler| handler.merge_into(top, incoming))?;
        if incoming.link.is_linked() {
            top.link = incoming.link;
        }
        top.snapshot = None;
        top.durability = if top.memory_only {
            DurabilityState::MemoryOnly
        } else {
            DurabilityState::Pending
        };
        self.stats.merged += 1;
        debug!(target: "timeline::engine", id = %id, kind = %incoming.kind, "edit merged into previous entry");
        Ok(id)
    }

    fn append(&mut self, mut command: Command, memory_only: bool) -> CommandId {
        let id = match command.id {
            Some(id) => {
                self.id_counter = self.id_counter.max(id.get());
                id
            }
            None => {
                self.id_counter += 1;
                CommandId::new(self.id_counter)
            }
        };
        command.id = Some(id);
        command.memory_only = memory_only;
        command.durability = if memory_only {
            DurabilityState::MemoryOnly
        } else {
            DurabilityState::Pending
        };
        self.undos.push(command);
        id
    }

    pub(crate) fn persisting_channel(&self) -> Option<Arc<dyn PersistenceChannel>> {
        if !self.config.persistence_enabled {
            return None;
        }
        self.channel
            .as_ref()
            .filter(|channel| channel.is_available())
            .cloned()
    }

    fn store_through_handler(
        &mut self,
        handler: Option<CommandKind>,
        owner: CommandId,
        record: PersistRecord,
        channel: &dyn PersistenceChannel,
    ) -> Result<Completion<Ack>> {
        match handler {
            Some(kind) => self
                .registry
                .with_handler(kind, Some(owner), |h| Ok(h.persist(record, channel))),
            None => Ok(channel.store(record)),
        }
    }

    // ========================================================================
    // Durability reconciliation
    // ========================================================================

    /// Reconcile the outstanding round-trip if its result has arrived
    ///
    /// Returns `None` when nothing is outstanding or the channel has not
    /// answered yet.
    pub fn poll_durability(&mut self) -> Option<Result<CommandId>> {
        let result = self.pending.as_ref()?.completion.try_take()?;
        let pending = self.pending.take()?;
        Some(self.finish_round_trip(pending.flight, result))
    }

    /// Block until the outstanding round-trip ends and reconcile it
    ///
    /// Returns the acknowledged command id, or `None` if nothing was
    /// outstanding.
    pub fn settle(&mut self) -> Result<Option<CommandId>> {
        let Some(Pending { flight, completion }) = self.pending.take() else {
            return Ok(None);
        };
        let result = completion.wait();
        self.finish_round_trip(flight, result).map(Some)
    }

    /// Settle, keeping a failure for [`take_durability_error`](Self::take_durability_error)
    ///
    /// Only the oldest untaken failure is kept; later ones are logged.
    pub(crate) fn settle_quietly(&mut self) {
        let Err(e) = self.settle() else {
            return;
        };
        warn!(target: "timeline::durability", error = %e, "outstanding persistence failed while settling");
        if self.durability_error.is_none() {
            self.durability_error = Some(e);
        }
    }

    /// Durability failure picked up by an implicit settle
    ///
    /// `execute`, `go_to_state`, `enable_serialization`, `clear` and
    /// `from_json` settle the outstanding round-trip before doing their own
    /// work and cannot return its failure. The first such failure is kept
    /// here until taken.
    pub fn take_durability_error(&mut self) -> Option<HistoryError> {
        self.durability_error.take()
    }

    fn finish_round_trip(&mut self, flight: InFlight, result: Result<Ack>) -> Result<CommandId> {
        let id = flight.record.command_id;
        let outcome = match result {
            Ok(ack) if ack.command_id != id => Err(HistoryError::IdentityMismatch {
                expected: id,
                actual: ack.command_id,
            }),
            Ok(ack) => {
                if let (Some(sent), Some(acked)) = (&flight.record.identity, &ack.identity) {
                    if sent != acked {
                        info!(target: "timeline::durability", id = %id, from = %sent, to = %acked, "target identity reassigned by channel");
                        self.targets.alias(sent, acked);
                    }
                }
                Ok(id)
            }
            Err(e) if e.is_durability_failure() => Err(e),
            Err(e) => Err(HistoryError::durability(id, e.to_string())),
        };

        if let Some(command) = self.undos.iter_mut().rev().find(|c| c.id == Some(id)) {
            command.snapshot = Some(flight.record.document.clone());
            if outcome.is_ok() {
                command.durability = DurabilityState::Durable;
            }
        }
        match &outcome {
            Ok(_) => {
                self.stats.persisted += 1;
                debug!(target: "timeline::durability", id = %id, "command durable");
            }
            Err(e) => {
                self.stats.durability_failures += 1;
                warn!(target: "timeline::durability", id = %id, error = %e, "persistence failed");
                self.spill(&flight.record);
            }
        }

        if let Some(kind) = flight.bound {
            self.registry.release(kind);
        }
        self.lock.release();

        let fresh = flight.origin == ExecuteOrigin::Fresh;
        if fresh {
            self.redos.clear();
        }
        self.enforce_capacity();
        if fresh {
            self.notifier.changed(Some(flight.summary));
            self.notifier.emit(HistoryEvent::ExecuteEnd);
        }
        outcome
    }

    /// Best-effort write to the fallback store
    pub(crate) fn spill(&mut self, record: &PersistRecord) {
        let Some(store) = self.fallback.as_ref() else {
            warn!(target: "timeline::durability", id = %record.command_id, "no fallback store; record kept in memory only");
            return;
        };
        match store.flush(record) {
            Ok(()) => {
                self.stats.spooled += 1;
                info!(target: "timeline::durability", id = %record.command_id, store = store.name(), "record spooled");
            }
            Err(e) => {
                error!(target: "timeline::durability", id = %record.command_id, store = store.name(), error = %e, "fallback flush failed");
            }
        }
    }

    // ========================================================================
    // Eviction and flushing
    // ========================================================================

    /// Flush and drop the oldest durable entries once over capacity
    ///
    /// Removes up to `capacity` of the oldest entries that are not
    /// memory-only. The newest entry always stays.
    pub(crate) fn enforce_capacity(&mut self) {
        let capacity = self.config.capacity;
        if self.undos.len() <= capacity {
            return;
        }
        let newest = self.undos.len() - 1;
        let mut victims = Vec::new();
        let mut kept = Vec::with_capacity(self.undos.len());
        for (index, command) in std::mem::take(&mut self.undos).into_iter().enumerate() {
            if victims.len() < capacity && index < newest && !command.memory_only {
                victims.push(command);
            } else {
                kept.push(command);
            }
        }
        self.undos = kept;
        if victims.is_empty() {
            return;
        }

        let flushed = self.flush_commands(&victims);
        self.stats.evicted += victims.len() as u64;
        info!(
            target: "timeline::eviction",
            evicted = victims.len(),
            flushed,
            remaining = self.undos.len(),
            "undo entries evicted"
        );
        self.release_unreferenced_targets();
    }

    /// Store every durable command not yet acknowledged, blocking on each
    ///
    /// Returns how many records the channel acknowledged. Failures are
    /// spooled and logged.
    pub(crate) fn flush_commands(&mut self, commands: &[Command]) -> usize {
        let Some(channel) = self.persisting_channel() else {
            return 0;
        };
        let mut flushed = 0;
        for command in commands
            .iter()
            .filter(|c| !c.memory_only && !c.is_durable())
        {
            let Some(id) = command.id else {
                continue;
            };
            let document = match &command.snapshot {
                Some(document) => document.clone(),
                None => match serialize_tree(&mut self.registry, &self.targets, command) {
                    Ok(document) => document,
                    Err(e) => {
                        warn!(target: "timeline::eviction", id = %id, error = %e, "cannot serialize command for flush");
                        continue;
                    }
                },
            };
            let record = PersistRecord::new(id, command.kind, command.target_id(), document);
            let handler = (!command.is_composite()).then_some(command.kind);
            let completion =
                match self.store_through_handler(handler, id, record.clone(), channel.as_ref()) {
                    Ok(completion) => completion,
                    Err(e) => {
                        warn!(target: "timeline::eviction", id = %id, error = %e, "flush failed");
                        self.spill(&record);
                        continue;
                    }
                };
            match completion.wait() {
                Ok(ack) if ack.command_id == id => flushed += 1,
                Ok(ack) => {
                    warn!(target: "timeline::eviction", id = %id, acked = %ack.command_id, "flush acknowledged the wrong command");
                    self.spill(&record);
                }
                Err(e) => {
                    warn!(target: "timeline::eviction", id = %id, error = %e, "flush failed");
                    self.spill(&record);
                }
            }
        }
        flushed
    }

    pub(crate) fn release_unreferenced_targets(&mut self) {
        let referenced: HashSet<TargetId> = self
            .undos
            .iter()
            .chain(self.redos.iter())
            .flat_map(Command::referenced_targets)
            .collect();
        self.targets.retain_referenced(&referenced);
    }

    /// Drop cached snapshots of acknowledged entries
    ///
    /// The channel still holds them; undo fetches a snapshot back when it
    /// needs one. Returns how many snapshots were dropped.
    pub fn drop_durable_snapshots(&mut self) -> usize {
        let mut dropped = 0;
        for command in self.undos.iter_mut().chain(self.redos.iter_mut()) {
            if command.is_durable() && command.snapshot.take().is_some() {
                dropped += 1;
            }
        }
        debug!(target: "timeline::engine", dropped, "durable snapshots dropped");
        dropped
    }

    // ========================================================================
    // Clear
    // ========================================================================

    /// Flush everything durable, then empty both stacks
    ///
    /// Resets the id counter and releases every live handle the engine held.
    pub fn clear(&mut self) {
        self.settle_quietly();
        let mut entries = std::mem::take(&mut self.undos);
        entries.append(&mut self.redos);
        let flushed = self.flush_commands(&entries);

        self.id_counter = 0;
        self.last_edit = None;
        self.registry.release_all();
        self.targets.clear();
        info!(target: "timeline::engine", dropped = entries.len(), flushed, "history cleared");
        self.notifier.emit(HistoryEvent::HistoryChanged(None));
    }
}
