//! Execute, merge, undo/redo, link chains, eviction and travel
//!
//! These run without a persistence channel unless a test attaches one, so
//! every command completes synchronously.

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use timeline_core::{
    Command, CommandId, CommandKind, HistoryError, HistoryEvent, Link, Phase, TargetId,
};
use timeline_durability::testing::ScriptedChannel;
use timeline_engine::{HistoryConfig, Persistence};

fn ids(fixture: &Fixture) -> Vec<u64> {
    fixture
        .engine
        .undo_stack()
        .iter()
        .filter_map(|c| c.id)
        .map(CommandId::get)
        .collect()
}

// ============================================================================
// Execute
// ============================================================================

#[test]
fn test_execute_assigns_increasing_ids() {
    let mut f = fixture();
    for i in 0..3 {
        let cmd = set_value(&f.engine, "cube", "name", json!(format!("cube-{}", i)));
        let receipt = f.engine.execute(cmd).unwrap();
        assert_eq!(receipt.id, CommandId::new(i + 1));
        assert!(!receipt.merged);
        assert_eq!(receipt.persistence, Persistence::Skipped);
    }
    assert_eq!(ids(&f), vec![1, 2, 3]);
    assert_eq!(f.engine.current_id(), Some(CommandId::new(3)));
    assert_eq!(field_of(&f.engine, "cube", "name"), Some(json!("cube-2")));
}

#[test]
fn test_execute_notification_order() {
    let mut f = fixture();
    let cmd = set_value(&f.engine, "cube", "name", json!("box"));
    f.engine.execute(cmd).unwrap();

    let events = f.events.events();
    assert_eq!(events.len(), 4);
    assert_eq!(events[0], HistoryEvent::ExecuteStart);
    assert!(matches!(
        &events[1],
        HistoryEvent::HistoryChanged(Some(summary)) if summary.id == Some(CommandId::new(1))
    ));
    assert_eq!(events[2], HistoryEvent::SceneChanged);
    assert_eq!(events[3], HistoryEvent::ExecuteEnd);
}

#[test]
fn test_new_edit_clears_redo() {
    let mut f = fixture();
    let cmd = set_value(&f.engine, "cube", "name", json!("a"));
    f.engine.execute(cmd).unwrap();
    f.engine.undo().unwrap();
    assert_eq!(f.engine.redo_len(), 1);

    let cmd = set_value(&f.engine, "cube", "name", json!("b"));
    f.engine.execute(cmd).unwrap();
    assert_eq!(f.engine.redo_len(), 0);
    assert!(!f.engine.can_redo());
}

#[test]
fn test_unregistered_kind_rejected() {
    let mut f = fixture();
    let cmd = set_field(&f.engine, CommandKind::SetRotation, "cube", "rotation", json!(90));
    let err = f.engine.execute(cmd).unwrap_err();
    assert!(matches!(err, HistoryError::HandlerNotRegistered(CommandKind::SetRotation)));
    assert_eq!(f.engine.undo_len(), 0);
    assert_eq!(f.events.count(|e| *e == HistoryEvent::ExecuteEnd), 1);
}

#[test]
fn test_apply_failure_keeps_entry() {
    let mut f = fixture();
    let cmd = set_field(&f.engine, CommandKind::SetScale, "cube", "scale", json!(-1));
    let err = f.engine.execute(cmd).unwrap_err();

    assert!(matches!(err, HistoryError::Apply { kind: CommandKind::SetScale, .. }));
    assert_eq!(f.engine.undo_len(), 1);
    assert_eq!(f.events.count(|e| *e == HistoryEvent::ExecuteEnd), 1);
    assert!(!f.engine.is_locked());
    assert!(!f.engine.registry().is_bound(CommandKind::SetScale));
}

#[test]
fn test_unknown_target_rejected() {
    let mut f = fixture();
    let cmd = Command::detached(CommandKind::SetValue, TargetId::new("ghost"))
        .with_payload(json!({"field": "name", "old": null, "new": "x"}));
    assert!(matches!(
        f.engine.execute(cmd),
        Err(HistoryError::UnknownTarget(_))
    ));
    assert_eq!(f.engine.undo_len(), 0);
}

#[test]
fn test_handler_constructed_once_per_kind() {
    let mut f = fixture();
    for i in 0..5 {
        f.clock.advance_ms(1_000);
        let cmd = set_value(&f.engine, "cube", "n", json!(i));
        f.engine.execute(cmd).unwrap();
    }
    f.engine.undo().unwrap();
    f.engine.redo().unwrap();
    assert_eq!(f.engine.registry().constructed(CommandKind::SetValue), 1);
    assert_eq!(f.engine.registry().constructed(CommandKind::SetColor), 0);
}

// ============================================================================
// Merge window
// ============================================================================

#[test]
fn test_mergeable_edits_within_window_collapse() {
    let mut f = fixture();
    let cmd = set_field(&f.engine, CommandKind::SetPosition, "cube", "x", json!(1)).mergeable();
    f.engine.execute(cmd).unwrap();

    f.clock.advance_ms(100);
    let cmd = set_field(&f.engine, CommandKind::SetPosition, "cube", "x", json!(2)).mergeable();
    let receipt = f.engine.execute(cmd).unwrap();

    assert!(receipt.merged);
    assert_eq!(receipt.id, CommandId::new(1));
    assert_eq!(f.engine.undo_len(), 1);
    assert_eq!(f.engine.stats().merged, 1);
    assert_eq!(field_of(&f.engine, "cube", "x"), Some(json!(2)));

    // One undo reverts the whole drag.
    f.engine.undo().unwrap();
    assert_eq!(field_of(&f.engine, "cube", "x"), None);
}

#[test]
fn test_edits_outside_window_stay_separate() {
    let mut f = fixture();
    let cmd = set_field(&f.engine, CommandKind::SetPosition, "cube", "x", json!(1)).mergeable();
    f.engine.execute(cmd).unwrap();

    f.clock.advance_ms(600);
    let cmd = set_field(&f.engine, CommandKind::SetPosition, "cube", "x", json!(2)).mergeable();
    let receipt = f.engine.execute(cmd).unwrap();

    assert!(!receipt.merged);
    assert_eq!(f.engine.undo_len(), 2);
}

#[test]
fn test_merge_requires_same_kind_and_target() {
    let mut f = fixture();
    let cmd = set_field(&f.engine, CommandKind::SetPosition, "cube", "x", json!(1)).mergeable();
    f.engine.execute(cmd).unwrap();

    let cmd = set_field(&f.engine, CommandKind::SetPosition, "light", "x", json!(1)).mergeable();
    f.engine.execute(cmd).unwrap();

    let cmd = set_field(&f.engine, CommandKind::SetColor, "light", "x", json!(2)).mergeable();
    f.engine.execute(cmd).unwrap();

    assert_eq!(f.engine.undo_len(), 3);
}

#[test]
fn test_non_mergeable_edits_never_collapse() {
    let mut f = fixture();
    for i in 0..3 {
        let cmd = set_value(&f.engine, "cube", "n", json!(i));
        f.engine.execute(cmd).unwrap();
    }
    assert_eq!(f.engine.undo_len(), 3);
}

#[test]
fn test_no_merge_into_entry_exposed_by_undo() {
    let mut f = fixture();
    let cmd = set_field(&f.engine, CommandKind::SetPosition, "cube", "x", json!(1)).mergeable();
    f.engine.execute(cmd).unwrap();
    f.clock.advance_ms(1_000);
    let cmd = set_field(&f.engine, CommandKind::SetPosition, "cube", "x", json!(2)).mergeable();
    f.engine.execute(cmd).unwrap();
    f.engine.undo().unwrap();

    f.clock.advance_ms(10);
    let cmd = set_field(&f.engine, CommandKind::SetPosition, "cube", "x", json!(3)).mergeable();
    let receipt = f.engine.execute(cmd).unwrap();
    assert!(!receipt.merged);
    assert_eq!(f.engine.undo_len(), 2);
}

// ============================================================================
// Undo / redo
// ============================================================================

#[test]
fn test_undo_redo_roundtrip() {
    let mut f = fixture();
    let cmd = set_value(&f.engine, "cube", "name", json!("first"));
    f.engine.execute(cmd).unwrap();
    let cmd = set_value(&f.engine, "cube", "name", json!("second"));
    f.engine.execute(cmd).unwrap();

    assert!(f.engine.undo().unwrap());
    assert_eq!(field_of(&f.engine, "cube", "name"), Some(json!("first")));
    assert!(f.engine.undo().unwrap());
    assert_eq!(field_of(&f.engine, "cube", "name"), None);
    assert!(!f.engine.undo().unwrap());

    assert!(f.engine.redo().unwrap());
    assert!(f.engine.redo().unwrap());
    assert_eq!(field_of(&f.engine, "cube", "name"), Some(json!("second")));
    assert!(!f.engine.redo().unwrap());

    // Redo re-enters execute with the original ids.
    assert_eq!(ids(&f), vec![1, 2]);
}

#[test]
fn test_undo_emits_status_then_change() {
    let mut f = fixture();
    let cmd = set_value(&f.engine, "cube", "name", json!("x"));
    f.engine.execute(cmd).unwrap();
    f.events.clear();

    f.engine.undo().unwrap();
    let events = f.events.events();
    assert_eq!(events[0], HistoryEvent::UndoStatus(Phase::Start));
    assert_eq!(events[1], HistoryEvent::UndoStatus(Phase::End));
    assert!(matches!(events[2], HistoryEvent::HistoryChanged(Some(_))));
    assert_eq!(events[3], HistoryEvent::SceneChanged);
    assert_eq!(events.len(), 4);
}

#[test]
fn test_redo_does_not_emit_execute_events() {
    let mut f = fixture();
    let cmd = set_value(&f.engine, "cube", "name", json!("x"));
    f.engine.execute(cmd).unwrap();
    f.engine.undo().unwrap();
    f.events.clear();

    f.engine.redo().unwrap();
    assert_eq!(f.events.count(|e| *e == HistoryEvent::ExecuteStart), 0);
    assert_eq!(f.events.history_changes(), 1);
    assert_eq!(f.events.scene_changes(), 1);
}

// ============================================================================
// Link chains
// ============================================================================

fn execute_chain(f: &mut Fixture, links: [Link; 3]) {
    for (i, link) in links.into_iter().enumerate() {
        let cmd = set_value(&f.engine, "cube", &format!("step{}", i), json!(i)).linked(link);
        f.engine.execute(cmd).unwrap();
    }
}

#[test]
fn test_next_linked_chain_is_atomic() {
    let mut f = fixture();
    let cmd = set_value(&f.engine, "light", "on", json!(true));
    f.engine.execute(cmd).unwrap();
    execute_chain(&mut f, [Link::Next, Link::Next, Link::None]);
    f.events.clear();

    assert!(f.engine.undo().unwrap());
    assert_eq!(f.engine.undo_len(), 1);
    assert_eq!(f.engine.redo_len(), 3);
    assert_eq!(f.events.history_changes(), 1);
    assert_eq!(f.events.scene_changes(), 1);
    assert_eq!(field_of(&f.engine, "cube", "step0"), None);

    f.events.clear();
    assert!(f.engine.redo().unwrap());
    assert_eq!(f.engine.undo_len(), 4);
    assert_eq!(f.engine.redo_len(), 0);
    assert_eq!(f.events.history_changes(), 1);
    assert_eq!(field_of(&f.engine, "cube", "step2"), Some(json!(2)));
}

#[test]
fn test_prev_linked_chain_is_atomic() {
    let mut f = fixture();
    let cmd = set_value(&f.engine, "light", "on", json!(true));
    f.engine.execute(cmd).unwrap();
    execute_chain(&mut f, [Link::None, Link::Prev, Link::Prev]);

    assert!(f.engine.undo().unwrap());
    assert_eq!(f.engine.undo_len(), 1);
    assert_eq!(field_of(&f.engine, "light", "on"), Some(json!(true)));

    assert!(f.engine.redo().unwrap());
    assert_eq!(f.engine.undo_len(), 4);
    assert_eq!(f.engine.stats().redone, 3);
}

#[test]
fn test_unlinked_entries_undo_one_at_a_time() {
    let mut f = fixture();
    execute_chain(&mut f, [Link::None, Link::None, Link::None]);
    f.engine.undo().unwrap();
    assert_eq!(f.engine.undo_len(), 2);
}

// ============================================================================
// Composites
// ============================================================================

#[test]
fn test_composite_applies_in_order_and_inverts_in_reverse() {
    let mut f = fixture();
    let first = set_value(&f.engine, "cube", "name", json!("a"));
    // The second sub-command records "a" as its old value.
    let second = Command::new(
        CommandKind::SetValue,
        &f.engine.target(&TargetId::new("cube")).unwrap(),
    )
    .with_payload(json!({"field": "name", "old": "a", "new": "b"}));
    let multi = Command::composite(vec![first, second]).named("Rename twice");

    f.engine.execute(multi).unwrap();
    assert_eq!(f.engine.undo_len(), 1);
    assert_eq!(field_of(&f.engine, "cube", "name"), Some(json!("b")));

    f.engine.undo().unwrap();
    assert_eq!(field_of(&f.engine, "cube", "name"), None);

    f.engine.redo().unwrap();
    assert_eq!(field_of(&f.engine, "cube", "name"), Some(json!("b")));
    assert_eq!(f.engine.last_command().unwrap().display_name(), "Rename twice");
}

#[test]
fn test_composite_with_unregistered_sub_kind_rejected() {
    let mut f = fixture();
    let ok = set_value(&f.engine, "cube", "name", json!("a"));
    let bad = set_field(&f.engine, CommandKind::SetMaterial, "cube", "material", json!("steel"));
    let result = f.engine.execute(Command::composite(vec![ok, bad]));
    assert!(matches!(
        result,
        Err(HistoryError::HandlerNotRegistered(CommandKind::SetMaterial))
    ));
    assert_eq!(field_of(&f.engine, "cube", "name"), None);
}

// ============================================================================
// Memory-only targets and eviction
// ============================================================================

fn memory_only_config(capacity: usize) -> HistoryConfig {
    HistoryConfig {
        capacity,
        memory_only_types: vec!["PointCloud".to_string()],
        ..HistoryConfig::default()
    }
}

#[test]
fn test_memory_only_bypasses_channel() {
    let mut f = fixture_with(memory_only_config(10));
    let channel = Arc::new(ScriptedChannel::new());
    f.engine.set_channel(channel.clone());

    let cmd = set_value(&f.engine, "cloud", "points", json!(1_000));
    let receipt = f.engine.execute(cmd).unwrap();

    assert_eq!(receipt.persistence, Persistence::Skipped);
    assert!(!f.engine.is_locked());
    assert!(channel.store_history().is_empty());
    assert!(f.engine.last_command().unwrap().memory_only);
    assert!(f.events.count(|e| *e == HistoryEvent::ExecuteEnd) == 1);
}

#[test]
fn test_group_with_memory_only_member_is_memory_only() {
    let mut f = fixture_with(memory_only_config(10));
    f.engine.install_target(SceneNode::group(
        "scan-group",
        "Group",
        vec![SceneNode::handle("scan", "PointCloud")],
    ));
    let channel = Arc::new(ScriptedChannel::new());
    f.engine.set_channel(channel.clone());

    let cmd = set_value(&f.engine, "scan-group", "visible", json!(false));
    f.engine.execute(cmd).unwrap();
    assert!(f.engine.last_command().unwrap().memory_only);
    assert!(channel.store_history().is_empty());
}

#[test]
fn test_eviction_boundary() {
    let mut f = fixture_with(HistoryConfig {
        capacity: 3,
        ..HistoryConfig::default()
    });
    let channel = Arc::new(ScriptedChannel::auto_ack());
    f.engine.set_channel(channel.clone());
    for i in 0..3 {
        let cmd = set_value(&f.engine, "cube", "n", json!(i));
        f.engine.execute(cmd).unwrap();
    }
    assert_eq!(f.engine.undo_len(), 3);
    assert_eq!(f.engine.stats().evicted, 0);

    let cmd = set_value(&f.engine, "cube", "n", json!(3));
    f.engine.execute(cmd).unwrap();
    assert_eq!(f.engine.undo_len(), 1);
    assert_eq!(f.engine.stats().evicted, 3);
    assert_eq!(ids(&f), vec![4]);

    let stored: Vec<u64> = channel.store_history().into_iter().map(CommandId::get).collect();
    assert_eq!(stored, vec![1, 2, 3, 4]);
    for id in 1..=3 {
        assert!(channel.stored(CommandId::new(id)).is_some());
    }

    let undone = (0..4).filter(|_| f.engine.undo().unwrap()).count();
    assert_eq!(undone, 1);
    assert_eq!(f.engine.undo_len(), 0);
    assert_eq!(f.engine.redo_len(), 1);
    assert_eq!(field_of(&f.engine, "cube", "n"), Some(json!(2)));
}

#[test]
fn test_memory_only_entries_survive_eviction() {
    let mut f = fixture_with(memory_only_config(2));
    let cmd = set_value(&f.engine, "cloud", "a", json!(1));
    f.engine.execute(cmd).unwrap();
    let cmd = set_value(&f.engine, "cloud", "b", json!(2));
    f.engine.execute(cmd).unwrap();
    let cmd = set_value(&f.engine, "cube", "a", json!(3));
    f.engine.execute(cmd).unwrap();
    assert_eq!(f.engine.stats().evicted, 0);

    let cmd = set_value(&f.engine, "cube", "b", json!(4));
    f.engine.execute(cmd).unwrap();
    assert_eq!(ids(&f), vec![1, 2, 4]);
    assert_eq!(f.engine.stats().evicted, 1);
}

#[test]
fn test_eviction_releases_unreferenced_targets() {
    let mut f = fixture_with(HistoryConfig {
        capacity: 1,
        ..HistoryConfig::default()
    });
    let lamp = SceneNode::handle("lamp", "Light");
    let cmd = Command::new(CommandKind::SetValue, &lamp)
        .with_payload(json!({"field": "on", "old": null, "new": true}));
    f.engine.execute(cmd).unwrap();
    assert!(f.engine.target(&TargetId::new("lamp")).is_some());

    let cmd = set_value(&f.engine, "cube", "n", json!(1));
    f.engine.execute(cmd).unwrap();

    assert!(f.engine.target(&TargetId::new("cube")).is_some());
    assert!(f.engine.target(&TargetId::new("lamp")).is_none());
}

#[test]
fn test_eviction_keeps_installed_targets() {
    let mut f = fixture_with(HistoryConfig {
        capacity: 1,
        ..HistoryConfig::default()
    });
    let cmd = set_value(&f.engine, "light", "on", json!(true));
    f.engine.execute(cmd).unwrap();
    let cmd = set_value(&f.engine, "cube", "n", json!(1));
    f.engine.execute(cmd).unwrap();
    assert_eq!(f.engine.stats().evicted, 1);
    assert!(f.engine.target(&TargetId::new("light")).is_some());

    let cmd = set_value(&f.engine, "light", "on", json!(false));
    f.engine.execute(cmd).unwrap();
    assert_eq!(field_of(&f.engine, "light", "on"), Some(json!(false)));

    f.engine.clear();
    assert!(f.engine.target(&TargetId::new("light")).is_none());
}

// ============================================================================
// Travel
// ============================================================================

fn five_edits() -> Fixture {
    let mut f = fixture();
    for i in 1..=5 {
        let cmd = set_value(&f.engine, "cube", "n", json!(i));
        f.engine.execute(cmd).unwrap();
    }
    f
}

#[test]
fn test_go_to_state_backward_and_forward() {
    let mut f = five_edits();

    assert_eq!(f.engine.go_to_state(Some(CommandId::new(2))).unwrap(), 3);
    assert_eq!(f.engine.current_id(), Some(CommandId::new(2)));
    assert_eq!(field_of(&f.engine, "cube", "n"), Some(json!(2)));

    assert_eq!(f.engine.go_to_state(None).unwrap(), 2);
    assert_eq!(f.engine.undo_len(), 0);
    assert_eq!(field_of(&f.engine, "cube", "n"), None);

    assert_eq!(f.engine.go_to_state(Some(CommandId::new(5))).unwrap(), 5);
    assert_eq!(field_of(&f.engine, "cube", "n"), Some(json!(5)));
}

#[test]
fn test_go_to_state_is_idempotent() {
    let mut f = five_edits();
    f.engine.go_to_state(Some(CommandId::new(3))).unwrap();
    let stats = f.engine.stats();
    let undos = f.engine.undo_entries();
    let redos = f.engine.redo_entries();
    f.events.clear();

    assert_eq!(f.engine.go_to_state(Some(CommandId::new(3))).unwrap(), 0);
    assert_eq!(f.engine.stats(), stats);
    assert_eq!(f.engine.undo_entries(), undos);
    assert_eq!(f.engine.redo_entries(), redos);
    assert!(f.events.events().is_empty());
}

#[test]
fn test_go_to_state_emits_one_combined_notification() {
    let mut f = five_edits();
    f.events.clear();

    f.engine.go_to_state(Some(CommandId::new(1))).unwrap();
    assert_eq!(f.events.history_changes(), 1);
    assert_eq!(f.events.scene_changes(), 1);
    assert_eq!(
        f.events
            .count(|e| matches!(e, HistoryEvent::UndoStatus(_) | HistoryEvent::RedoStatus(_))),
        0
    );
}

// ============================================================================
// Clear
// ============================================================================

#[test]
fn test_clear_resets_history() {
    let mut f = five_edits();
    f.engine.undo().unwrap();
    f.events.clear();

    f.engine.clear();
    assert_eq!(f.engine.undo_len(), 0);
    assert_eq!(f.engine.redo_len(), 0);
    assert_eq!(f.engine.id_counter(), 0);
    assert_eq!(f.events.events(), vec![HistoryEvent::HistoryChanged(None)]);

    f.engine.install_target(SceneNode::handle("cube", "Mesh"));
    let cmd = set_value(&f.engine, "cube", "n", json!(0));
    assert_eq!(f.engine.execute(cmd).unwrap().id, CommandId::new(1));
}
