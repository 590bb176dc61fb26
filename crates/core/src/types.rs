//! Core types for the history engine
//!
//! This module defines the foundational types:
//! - CommandId: Monotonic id assigned at first durable append
//! - TargetId: Stable identity of a document entity
//! - CommandKind: Discriminator selecting a command handler
//! - Link: Chain tag gluing neighbouring commands into one gesture
//! - StorageClass: Durable vs memory-only classification

use crate::error::HistoryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque document form used for command payloads and snapshots.
///
/// The engine never looks inside; each handler owns the layout of the
/// documents it produces.
pub type Document = serde_json::Value;

/// Identifier of a committed command
///
/// Ids are assigned by the engine when a command is first appended to the
/// undo stack (never on merge) and increase strictly with stack position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(u64);

impl CommandId {
    /// Wrap a raw id
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The id following this one
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CommandId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Stable identity of a document entity
///
/// Identities survive persistence round-trips even when the in-memory
/// object behind them is replaced.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// Wrap an existing identity string
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// Generate a fresh random identity (UUID v4)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identity string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TargetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of a recorded edit
///
/// Each kind resolves to exactly one handler. The string tags are persisted
/// alongside snapshots and MUST NOT change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Insert an object under a parent
    AddObject,
    /// Detach an object from its parent
    RemoveObject,
    /// Reparent an object
    MoveObject,
    /// Change an object's position
    SetPosition,
    /// Change an object's rotation
    SetRotation,
    /// Change an object's scale
    SetScale,
    /// Change a named attribute
    SetValue,
    /// Change an object's identity
    SetUuid,
    /// Change a color attribute
    SetColor,
    /// Replace an object's geometry
    SetGeometry,
    /// Change a named geometry attribute
    SetGeometryValue,
    /// Replace an object's material
    SetMaterial,
    /// Change a named material attribute
    SetMaterialValue,
    /// Change a material color slot
    SetMaterialColor,
    /// Change a material texture slot
    SetMaterialMap,
    /// Attach a script to an object
    AddScript,
    /// Detach a script from an object
    RemoveScript,
    /// Change a script attribute
    SetScriptValue,
    /// Replace the whole scene
    SetScene,
    /// Ordered composite of sub-commands
    Multi,
}

impl CommandKind {
    /// Every kind, in declaration order
    pub const ALL: [CommandKind; 20] = [
        CommandKind::AddObject,
        CommandKind::RemoveObject,
        CommandKind::MoveObject,
        CommandKind::SetPosition,
        CommandKind::SetRotation,
        CommandKind::SetScale,
        CommandKind::SetValue,
        CommandKind::SetUuid,
        CommandKind::SetColor,
        CommandKind::SetGeometry,
        CommandKind::SetGeometryValue,
        CommandKind::SetMaterial,
        CommandKind::SetMaterialValue,
        CommandKind::SetMaterialColor,
        CommandKind::SetMaterialMap,
        CommandKind::AddScript,
        CommandKind::RemoveScript,
        CommandKind::SetScriptValue,
        CommandKind::SetScene,
        CommandKind::Multi,
    ];

    /// Stable persisted tag
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::AddObject => "add_object",
            CommandKind::RemoveObject => "remove_object",
            CommandKind::MoveObject => "move_object",
            CommandKind::SetPosition => "set_position",
            CommandKind::SetRotation => "set_rotation",
            CommandKind::SetScale => "set_scale",
            CommandKind::SetValue => "set_value",
            CommandKind::SetUuid => "set_uuid",
            CommandKind::SetColor => "set_color",
            CommandKind::SetGeometry => "set_geometry",
            CommandKind::SetGeometryValue => "set_geometry_value",
            CommandKind::SetMaterial => "set_material",
            CommandKind::SetMaterialValue => "set_material_value",
            CommandKind::SetMaterialColor => "set_material_color",
            CommandKind::SetMaterialMap => "set_material_map",
            CommandKind::AddScript => "add_script",
            CommandKind::RemoveScript => "remove_script",
            CommandKind::SetScriptValue => "set_script_value",
            CommandKind::SetScene => "set_scene",
            CommandKind::Multi => "multi",
        }
    }

    /// Whether this kind carries sub-commands
    pub fn is_composite(&self) -> bool {
        matches!(self, CommandKind::Multi)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| HistoryError::UnknownKind(s.to_string()))
    }
}

/// Chain tag gluing adjacent commands into one atomic undo/redo unit
///
/// `Prev` means "undo me together with the entry below me"; `Next` means
/// "the entry above me belongs to the same gesture".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    /// Standalone command
    #[default]
    None,
    /// Chained to the command below it on the stack
    Prev,
    /// Chained to the command above it on the stack
    Next,
}

impl Link {
    /// True for any chain tag
    pub fn is_linked(&self) -> bool {
        !matches!(self, Link::None)
    }
}

/// Storage classification of a target (or a whole composite)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    /// Persisted through the channel and evictable
    #[default]
    Durable,
    /// Never handed to the persistence channel
    MemoryOnly,
}

impl StorageClass {
    /// Fold two classifications: memory-only wins
    pub fn combine(self, other: StorageClass) -> StorageClass {
        match (self, other) {
            (StorageClass::Durable, StorageClass::Durable) => StorageClass::Durable,
            _ => StorageClass::MemoryOnly,
        }
    }

    /// True for `MemoryOnly`
    pub fn is_memory_only(&self) -> bool {
        matches!(self, StorageClass::MemoryOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_id_ordering() {
        let a = CommandId::new(1);
        let b = a.next();
        assert!(a < b);
        assert_eq!(b.get(), 2);
        assert_eq!(b.to_string(), "2");
    }

    #[test]
    fn test_target_id_generate_unique() {
        let a = TargetId::generate();
        let b = TargetId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_kind_tags_roundtrip() {
        for kind in CommandKind::ALL {
            let parsed: CommandKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_kind_parse_unknown() {
        let err = "paint_bucket".parse::<CommandKind>().unwrap_err();
        assert!(matches!(err, HistoryError::UnknownKind(tag) if tag == "paint_bucket"));
    }

    #[test]
    fn test_only_multi_is_composite() {
        let composites: Vec<_> = CommandKind::ALL
            .iter()
            .filter(|k| k.is_composite())
            .collect();
        assert_eq!(composites, vec![&CommandKind::Multi]);
    }

    #[test]
    fn test_storage_class_combine() {
        use StorageClass::*;
        assert_eq!(Durable.combine(Durable), Durable);
        assert_eq!(Durable.combine(MemoryOnly), MemoryOnly);
        assert_eq!(MemoryOnly.combine(Durable), MemoryOnly);
        assert!(MemoryOnly.is_memory_only());
    }

    #[test]
    fn test_link_default_is_none() {
        assert_eq!(Link::default(), Link::None);
        assert!(!Link::None.is_linked());
        assert!(Link::Prev.is_linked());
    }
}
