//! Target indirection table
//!
//! Stored commands never hold live handles. They hold a [`TargetId`], and the
//! table maps that identity to the current live instance. Rehydration after
//! undo installs a fresh instance under the same identity, so every stored
//! command that mentions it sees the new object without being rewritten.
//!
//! When the persistence channel acknowledges a record under a different
//! identity than the one sent, the old identity becomes an alias of the new
//! one.
//!
//! Handles the caller installs are pinned: eviction only releases handles the
//! engine installed itself while attaching or rehydrating targets.

use std::collections::{HashMap, HashSet};
use timeline_core::{HistoryError, Result, TargetHandle, TargetId};
use tracing::trace;

/// Identity-to-live-handle map with alias resolution
#[derive(Debug, Default)]
pub struct TargetTable {
    live: HashMap<TargetId, TargetHandle>,
    aliases: HashMap<TargetId, TargetId>,
    pinned: HashSet<TargetId>,
}

impl TargetTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow aliases to the identity the table stores handles under
    pub fn canonical(&self, id: &TargetId) -> TargetId {
        let mut current = id;
        // `alias` only links canonical identities, so chains cannot loop.
        while let Some(next) = self.aliases.get(current) {
            current = next;
        }
        current.clone()
    }

    /// Install (or replace) the live handle for the handle's identity
    ///
    /// Returns the handle previously installed under that identity.
    pub fn install(&mut self, handle: TargetHandle) -> Option<TargetHandle> {
        let id = self.canonical(&handle.identity());
        trace!(target: "timeline::targets", id = %id, "target installed");
        self.live.insert(id, handle)
    }

    /// Install the handle and keep it live until [`clear`](Self::clear)
    pub fn install_pinned(&mut self, handle: TargetHandle) -> Option<TargetHandle> {
        let id = self.canonical(&handle.identity());
        self.pinned.insert(id);
        self.install(handle)
    }

    /// True if the identity was installed with [`install_pinned`](Self::install_pinned)
    pub fn is_pinned(&self, id: &TargetId) -> bool {
        self.pinned.contains(&self.canonical(id))
    }

    /// Install only if nothing is live under the identity yet
    ///
    /// Returns the handle that is live afterwards.
    pub fn install_if_absent(&mut self, handle: TargetHandle) -> TargetHandle {
        let id = self.canonical(&handle.identity());
        self.live.entry(id).or_insert(handle).clone()
    }

    /// Live handle for an identity
    pub fn get(&self, id: &TargetId) -> Option<TargetHandle> {
        self.live.get(&self.canonical(id)).cloned()
    }

    /// Live handle for an identity, or `UnknownTarget`
    pub fn resolve(&self, id: &TargetId) -> Result<TargetHandle> {
        self.get(id)
            .ok_or_else(|| HistoryError::UnknownTarget(id.clone()))
    }

    /// True if a live handle exists for the identity
    pub fn contains(&self, id: &TargetId) -> bool {
        self.live.contains_key(&self.canonical(id))
    }

    /// Make `from` resolve to whatever `to` resolves to
    ///
    /// A handle live under `from` moves to `to` unless `to` already has one.
    pub fn alias(&mut self, from: &TargetId, to: &TargetId) {
        let from = self.canonical(from);
        let to = self.canonical(to);
        if from == to {
            return;
        }
        if let Some(handle) = self.live.remove(&from) {
            self.live.entry(to.clone()).or_insert(handle);
        }
        if self.pinned.remove(&from) {
            self.pinned.insert(to.clone());
        }
        trace!(target: "timeline::targets", from = %from, to = %to, "identity aliased");
        self.aliases.insert(from, to);
    }

    /// Drop every unpinned live handle whose identity is not referenced
    ///
    /// Aliases are dropped too unless their source is referenced or they
    /// lead to a pinned identity.
    pub fn retain_referenced(&mut self, referenced: &HashSet<TargetId>) {
        let mut keep: HashSet<TargetId> = referenced.iter().map(|id| self.canonical(id)).collect();
        keep.extend(self.pinned.iter().cloned());
        let before = self.live.len();
        self.live.retain(|id, _| keep.contains(id));
        let pinned = &self.pinned;
        self.aliases
            .retain(|from, to| referenced.contains(from) || pinned.contains(to));
        let dropped = before - self.live.len();
        if dropped > 0 {
            trace!(target: "timeline::targets", dropped, "unreferenced targets released");
        }
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// True if no handle is live
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Drop every handle, alias and pin
    pub fn clear(&mut self) {
        self.live.clear();
        self.aliases.clear();
        self.pinned.clear();
    }
}
