//! End-to-end tests for property inheritance through clone links.
//!
//! Variants resolve unset keys through their model parent and override
//! locally; references always show their source; constraints adjust
//! writes before they land.

use prefab_graph::command::{CloneNode, CreateNode, ModifyModel, ResetModel};
use prefab_graph::{
    CloneMode, Constraint, MemoryDatastore, NodeFactory, PropertySchema, PropertySpec, Session,
    SessionConfig, Value, props,
};

// ============================================================================
// Helper: a session with a `point {x: 0, y: 0}` type and a `card` type
// whose `label` is pushed up to the nearest reference root.
// ============================================================================

fn session() -> Session<MemoryDatastore> {
    let mut factory = NodeFactory::with_builtin_types();
    factory.register(PropertySchema::builder("point").value("x", 0).value("y", 0).build());
    factory.register(
        PropertySchema::builder("card")
            .property("label", PropertySpec::new("").constraint(Constraint::Reference))
            .value("note", "")
            .build(),
    );
    Session::with_datastore(MemoryDatastore::new(), factory, SessionConfig::default())
}

fn point(session: &mut Session<MemoryDatastore>, x: i64) -> prefab_graph::NodeId {
    session
        .execute(CreateNode::new("point").named("O").with_values(props([("x", x)])))
        .unwrap()[0]
}

// ============================================================================
// 1. Variant inherits, then overrides locally
// ============================================================================

#[test]
fn test_variant_overrides_without_touching_source() {
    let mut s = session();
    let o = point(&mut s, 5);
    assert_eq!(s.graph().get_value(o, "x").unwrap(), Value::Int(5));

    let v1 = s.execute(CloneNode::new(o, CloneMode::Variant)).unwrap()[0];
    assert_eq!(s.graph().node(v1).unwrap().mode(), CloneMode::VariantRoot);
    assert_eq!(s.graph().get_value(v1, "x").unwrap(), Value::Int(5));

    s.execute(ModifyModel::set(v1, "x", 9)).unwrap();
    assert_eq!(s.graph().get_value(v1, "x").unwrap(), Value::Int(9));
    assert_eq!(s.graph().get_value(o, "x").unwrap(), Value::Int(5));
}

// ============================================================================
// 2. Overriding one key keeps the others inherited
// ============================================================================

#[test]
fn test_variant_override_breaks_equality_for_one_key_only() {
    let mut s = session();
    let o = point(&mut s, 5);
    let v = s.execute(CloneNode::new(o, CloneMode::Variant)).unwrap()[0];

    s.execute(ModifyModel::set(v, "x", 1)).unwrap();
    s.execute(ModifyModel::set(o, "y", 7)).unwrap();

    assert_eq!(s.graph().get_value(v, "x").unwrap(), Value::Int(1));
    assert_eq!(s.graph().get_value(v, "y").unwrap(), Value::Int(7));
}

// ============================================================================
// 3. Reference follows its source immediately
// ============================================================================

#[test]
fn test_reference_sees_source_writes() {
    let mut s = session();
    let o = point(&mut s, 5);
    let r = s.execute(CloneNode::new(o, CloneMode::Reference)).unwrap()[0];

    s.execute(ModifyModel::set(o, "x", 42)).unwrap();
    assert_eq!(s.graph().get_value(r, "x").unwrap(), Value::Int(42));
    assert_eq!(
        s.graph().effective_values(r).unwrap(),
        s.graph().effective_values(o).unwrap()
    );
}

// ============================================================================
// 4. Content writes on a reference root are routed to the source;
//    transform writes stay on the instance
// ============================================================================

#[test]
fn test_reference_root_routes_content_and_keeps_transform_local() {
    let mut s = Session::open_memory();
    let o = s.execute(CreateNode::new("sprite")).unwrap()[0];
    let rr = s.execute(CloneNode::new(o, CloneMode::Reference)).unwrap()[0];

    s.execute(ModifyModel::set(rr, "opacity", 0.25)).unwrap();
    assert_eq!(s.graph().get_value(o, "opacity").unwrap(), Value::Float(0.25));
    assert!(s.graph().models().get(rr).unwrap().own("opacity").is_none());

    s.execute(ModifyModel::set(rr, "x", 10.0)).unwrap();
    assert_eq!(s.graph().get_value(rr, "x").unwrap(), Value::Float(10.0));
    assert_eq!(s.graph().get_value(o, "x").unwrap(), Value::Float(0.0));
}

// ============================================================================
// 5. Range constraints clamp
// ============================================================================

#[test]
fn test_range_constraint_clamps() {
    let mut s = Session::open_memory();
    let sprite = s.execute(CreateNode::new("sprite")).unwrap()[0];

    s.execute(ModifyModel::set(sprite, "opacity", 2.5)).unwrap();
    assert_eq!(s.graph().get_value(sprite, "opacity").unwrap(), Value::Float(1.0));

    s.execute(ModifyModel::set(sprite, "opacity", -1.0)).unwrap();
    assert_eq!(s.graph().get_value(sprite, "opacity").unwrap(), Value::Float(0.0));
}

// ============================================================================
// 6. Reference constraint writes into the reference root
// ============================================================================

#[test]
fn test_reference_constraint_pushes_to_reference_root() {
    let mut s = session();
    let o = s.execute(CreateNode::new("card")).unwrap()[0];
    let rr = s.execute(CloneNode::new(o, CloneMode::Reference)).unwrap()[0];
    let v = s.execute(CloneNode::new(rr, CloneMode::Variant)).unwrap()[0];

    s.execute(ModifyModel::set(v, "label", "hello")).unwrap();

    let models = s.graph().models();
    assert_eq!(models.get(rr).unwrap().own("label"), Some(&Value::from("hello")));
    assert!(models.get(v).unwrap().own("label").is_none());
    assert_eq!(s.graph().get_value(v, "label").unwrap(), Value::from("hello"));
    assert_eq!(s.graph().get_value(o, "label").unwrap(), Value::from(""));

    s.undo().unwrap();
    assert!(s.graph().models().get(rr).unwrap().own("label").is_none());
    assert_eq!(s.graph().get_value(v, "label").unwrap(), Value::from(""));
}

// ============================================================================
// 7. Reset returns every key to its default
// ============================================================================

#[test]
fn test_reset_restores_defaults() {
    let mut s = session();
    let o = point(&mut s, 5);
    s.execute(ModifyModel::set(o, "y", 3)).unwrap();

    s.execute(ResetModel::new(o)).unwrap();
    assert_eq!(s.graph().get_value(o, "x").unwrap(), Value::Int(0));
    assert_eq!(s.graph().get_value(o, "y").unwrap(), Value::Int(0));

    s.undo().unwrap();
    assert_eq!(s.graph().get_value(o, "x").unwrap(), Value::Int(5));
    assert_eq!(s.graph().get_value(o, "y").unwrap(), Value::Int(3));
}

// ============================================================================
// 8. Clearing a variant override falls back to the source
// ============================================================================

#[test]
fn test_clear_override_falls_back_to_source() {
    let mut s = session();
    let o = point(&mut s, 5);
    let v = s.execute(CloneNode::new(o, CloneMode::Variant)).unwrap()[0];
    s.execute(ModifyModel::set(v, "x", 9)).unwrap();

    s.execute(ModifyModel::clear(v, "x")).unwrap();
    assert_eq!(s.graph().get_value(v, "x").unwrap(), Value::Int(5));
}

// ============================================================================
// 9. Model deltas are reported for linked descendants
// ============================================================================

#[test]
fn test_deltas_reach_inheriting_models() {
    let mut s = session();
    let o = point(&mut s, 5);
    let v = s.execute(CloneNode::new(o, CloneMode::Variant)).unwrap()[0];
    s.drain_deltas();

    s.execute(ModifyModel::set(o, "x", 6)).unwrap();
    let deltas = s.drain_deltas();
    let models: Vec<_> = deltas.iter().map(|d| d.model).collect();
    assert!(models.contains(&o));
    assert!(models.contains(&v));
    let on_v = deltas.iter().find(|d| d.model == v).unwrap();
    assert_eq!(on_v.key.as_deref(), Some("x"));
    assert_eq!(on_v.new, Some(Value::Int(6)));
}
