//! Shared scene fixtures for engine integration tests
//!
//! `SceneNode` is a minimal document entity: an identity, a type tag and a
//! map of fields. `FieldHandler` sets one field per command with payload
//! `{"field", "old", "new"}` and supports merging.

#![allow(dead_code)]

use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::sync::Arc;
use timeline_core::{
    Command, CommandKind, Document, EventRecorder, HistoryError, Result, Target, TargetHandle,
    TargetId,
};
use timeline_engine::{
    target_of, CommandHandler, HistoryConfig, HistoryEngine, ManualClock, TargetTable,
};

// ============================================================================
// Scene
// ============================================================================

#[derive(Debug)]
pub struct SceneNode {
    id: TargetId,
    tag: String,
    fields: RwLock<Map<String, Value>>,
    children: Vec<TargetHandle>,
}

impl SceneNode {
    pub fn handle(id: &str, tag: &str) -> TargetHandle {
        Self::group(id, tag, Vec::new())
    }

    pub fn group(id: &str, tag: &str, children: Vec<TargetHandle>) -> TargetHandle {
        Arc::new(SceneNode {
            id: TargetId::new(id),
            tag: tag.to_string(),
            fields: RwLock::new(Map::new()),
            children,
        })
    }

    pub fn from_document(doc: &Document) -> Result<TargetHandle> {
        let id = doc["id"]
            .as_str()
            .ok_or_else(|| HistoryError::Serialization("node without id".to_string()))?;
        let tag = doc["tag"].as_str().unwrap_or("Object");
        let fields = doc["fields"].as_object().cloned().unwrap_or_default();
        Ok(Arc::new(SceneNode {
            id: TargetId::new(id),
            tag: tag.to_string(),
            fields: RwLock::new(fields),
            children: Vec::new(),
        }))
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.fields.read().get(field).cloned()
    }

    pub fn set(&self, field: &str, value: Value) {
        let mut fields = self.fields.write();
        if value.is_null() {
            fields.remove(field);
        } else {
            fields.insert(field.to_string(), value);
        }
    }
}

impl Target for SceneNode {
    fn identity(&self) -> TargetId {
        self.id.clone()
    }

    fn type_tag(&self) -> &str {
        &self.tag
    }

    fn serialize(&self) -> Result<Document> {
        Ok(json!({
            "id": self.id,
            "tag": self.tag,
            "fields": *self.fields.read(),
        }))
    }

    fn deserialize(&self, doc: &Document) -> Result<TargetHandle> {
        SceneNode::from_document(doc)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn for_each_descendant(&self, f: &mut dyn FnMut(&dyn Target)) {
        for child in &self.children {
            f(child.as_ref());
            child.for_each_descendant(f);
        }
    }
}

fn node_of(command: &Command, targets: &TargetTable) -> Result<TargetHandle> {
    let handle = target_of(command, targets)?;
    if handle.downcast_ref::<SceneNode>().is_none() {
        return Err(HistoryError::apply(command.kind, "target is not a scene node"));
    }
    Ok(handle)
}

// ============================================================================
// Handlers
// ============================================================================

/// Sets `payload.field` to `payload.new`; inverts to `payload.old`
pub struct FieldHandler {
    kind: CommandKind,
}

impl FieldHandler {
    pub fn factory(kind: CommandKind) -> impl Fn() -> Box<dyn CommandHandler> + Send + Sync {
        move || Box::new(FieldHandler { kind }) as Box<dyn CommandHandler>
    }

    fn write(command: &Command, targets: &TargetTable, key: &str) -> Result<()> {
        let handle = node_of(command, targets)?;
        let field = command.payload["field"]
            .as_str()
            .ok_or_else(|| HistoryError::apply(command.kind, "payload without field"))?;
        if let Some(node) = handle.downcast_ref::<SceneNode>() {
            node.set(field, command.payload[key].clone());
        }
        Ok(())
    }
}

impl CommandHandler for FieldHandler {
    fn kind(&self) -> CommandKind {
        self.kind
    }

    fn apply(&mut self, command: &mut Command, targets: &TargetTable) -> Result<()> {
        Self::write(command, targets, "new")
    }

    fn invert(&mut self, command: &mut Command, targets: &TargetTable) -> Result<()> {
        Self::write(command, targets, "old")
    }

    fn merge_into(&mut self, previous: &mut Command, incoming: &Command) -> Result<()> {
        previous.payload["new"] = incoming.payload["new"].clone();
        Ok(())
    }

    fn deserialize(
        &mut self,
        command: &mut Command,
        doc: &Document,
        _targets: &TargetTable,
    ) -> Result<Vec<TargetHandle>> {
        if let Some(payload) = doc.get("payload") {
            command.payload = payload.clone();
        }
        match doc.get("target") {
            Some(state) if !state.is_null() => Ok(vec![SceneNode::from_document(state)?]),
            _ => Ok(Vec::new()),
        }
    }
}

/// Always fails to apply
pub struct FailingHandler;

impl CommandHandler for FailingHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::SetScale
    }

    fn apply(&mut self, command: &mut Command, _targets: &TargetTable) -> Result<()> {
        Err(HistoryError::apply(command.kind, "scale must be positive"))
    }

    fn invert(&mut self, _command: &mut Command, _targets: &TargetTable) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Engine setup
// ============================================================================

pub struct Fixture {
    pub engine: HistoryEngine,
    pub clock: Arc<ManualClock>,
    pub events: EventRecorder,
}

pub fn fixture() -> Fixture {
    fixture_with(HistoryConfig::default())
}

pub fn fixture_with(config: HistoryConfig) -> Fixture {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut engine = HistoryEngine::new(config).unwrap();
    register_handlers(&mut engine);

    let clock = Arc::new(ManualClock::new());
    engine.set_clock(clock.clone());
    let events = EventRecorder::new();
    engine.set_observer(events.clone());

    engine.install_target(SceneNode::handle("cube", "Mesh"));
    engine.install_target(SceneNode::handle("light", "Light"));
    engine.install_target(SceneNode::handle("cloud", "PointCloud"));

    Fixture {
        engine,
        clock,
        events,
    }
}

pub fn register_handlers(engine: &mut HistoryEngine) {
    for kind in [CommandKind::SetValue, CommandKind::SetPosition, CommandKind::SetColor] {
        engine
            .register_handler(kind, FieldHandler::factory(kind))
            .unwrap();
    }
    engine
        .register_handler(CommandKind::SetScale, || Box::new(FailingHandler))
        .unwrap();
}

/// Command setting `field` on the live target `id`, capturing the old value
pub fn set_field(
    engine: &HistoryEngine,
    kind: CommandKind,
    id: &str,
    field: &str,
    new: Value,
) -> Command {
    let target = TargetId::new(id);
    let old = field_of(engine, id, field).unwrap_or(Value::Null);
    let command = match engine.target(&target) {
        Some(handle) => Command::new(kind, &handle),
        None => Command::detached(kind, target),
    };
    command.with_payload(json!({"field": field, "old": old, "new": new}))
}

/// Shorthand for a `SetValue` command
pub fn set_value(engine: &HistoryEngine, id: &str, field: &str, new: Value) -> Command {
    set_field(engine, CommandKind::SetValue, id, field, new)
}

/// Current value of a field on the live target
pub fn field_of(engine: &HistoryEngine, id: &str, field: &str) -> Option<Value> {
    let handle = engine.target(&TargetId::new(id))?;
    handle.downcast_ref::<SceneNode>()?.get(field)
}
