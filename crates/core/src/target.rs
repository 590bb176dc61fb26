//! Target contract: the document entities commands mutate
//!
//! The engine consumes targets only through this trait. Targets are shared
//! behind `Arc` and mutate through interior mutability, so a handler holding
//! a `TargetHandle` can apply an edit without the engine lending out `&mut`.

use crate::error::Result;
use crate::types::{Document, StorageClass, TargetId};
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a live target
pub type TargetHandle = Arc<dyn Target>;

/// A document entity referenced by commands
pub trait Target: Send + Sync + fmt::Debug {
    /// Stable identity of this entity
    fn identity(&self) -> TargetId;

    /// Type tag checked against the memory-only set (e.g. "Mesh", "PointCloud")
    fn type_tag(&self) -> &str;

    /// Serialize the current state
    fn serialize(&self) -> Result<Document>;

    /// Build a fresh live instance from a serialized document
    ///
    /// Persistence round-trips rehydrate through this method, so the result
    /// may be a different object with the same identity.
    fn deserialize(&self, doc: &Document) -> Result<TargetHandle>;

    /// Concrete type access for handlers (`self` in every implementation)
    fn as_any(&self) -> &dyn Any;

    /// Visit every descendant (composite targets such as groups)
    fn for_each_descendant(&self, _f: &mut dyn FnMut(&dyn Target)) {}

    /// Classify this target and everything reachable from it
    ///
    /// A group is memory-only if any reachable member is.
    fn classify_storage(&self, policy: &StoragePolicy) -> StorageClass {
        let mut class = policy.classify(self.type_tag());
        self.for_each_descendant(&mut |child| {
            class = class.combine(policy.classify(child.type_tag()));
        });
        class
    }
}

impl dyn Target {
    /// Borrow the concrete target type, if it matches
    pub fn downcast_ref<T: Target + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Set of target type tags exempt from persistence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoragePolicy {
    memory_only: BTreeSet<String>,
}

impl StoragePolicy {
    /// Policy with no memory-only types
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy from a list of memory-only type tags
    pub fn with_memory_only<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            memory_only: types.into_iter().map(Into::into).collect(),
        }
    }

    /// Add a memory-only type tag
    pub fn insert(&mut self, type_tag: impl Into<String>) {
        self.memory_only.insert(type_tag.into());
    }

    /// Classify a single type tag
    pub fn classify(&self, type_tag: &str) -> StorageClass {
        if self.memory_only.contains(type_tag) {
            StorageClass::MemoryOnly
        } else {
            StorageClass::Durable
        }
    }

    /// Memory-only type tags, sorted
    pub fn memory_only_types(&self) -> impl Iterator<Item = &str> {
        self.memory_only.iter().map(String::as_str)
    }
}
