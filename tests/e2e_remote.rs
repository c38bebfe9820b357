//! End-to-end tests for folding remote datastore notifications.
//!
//! Remote changes run as graph-only commands: they change the local graph,
//! never echo back to the datastore and never enter the undo history.

use prefab_graph::command::{AddChild, CreateNode, ModifyModel};
use prefab_graph::{
    CloneInfoDescriptor, CloneMode, DatastoreOp, MemoryDatastore, NodeDescriptor, NodeId,
    PropertyMap, RemoteChange, Session, SessionEvent, Value, props,
};

// ============================================================================
// Helper
// ============================================================================

fn setup() -> (Session<MemoryDatastore>, NodeId, Vec<NodeId>) {
    let mut s = Session::open_memory();
    let p = s.execute(CreateNode::new("group").named("P")).unwrap()[0];
    let kids = (0..2)
        .map(|_| s.execute(AddChild::new_node(p, "sprite")).unwrap()[0])
        .collect();
    s.datastore().take_ops();
    s.drain_events();
    (s, p, kids)
}

fn remote_node(id: u64, parent: Option<NodeId>, model: PropertyMap) -> NodeDescriptor {
    NodeDescriptor {
        id: NodeId(id),
        name: "Remote".into(),
        created: id,
        node_type: "sprite".into(),
        parent,
        children: Vec::new(),
        model,
        clone_info: CloneInfoDescriptor::default(),
        custom_properties: Default::default(),
    }
}

// ============================================================================
// 1. A remote create registers the node without echo or history
// ============================================================================

#[test]
fn test_remote_create() {
    let (mut s, p, kids) = setup();
    let head = s.history().head();
    let desc = remote_node(100, Some(p), props([("opacity", 0.3)]));

    assert!(s.apply_remote(RemoteChange::NodeCreated { descriptor: desc }).unwrap());
    let id = NodeId(100);
    assert_eq!(s.graph().children(p).unwrap(), vec![kids[0], kids[1], id]);
    assert_eq!(s.graph().get_value(id, "opacity").unwrap(), Value::Float(0.3));
    assert!(s.datastore().ops().is_empty());
    assert_eq!(s.history().head(), head);
    assert_eq!(s.drain_events(), vec![SessionEvent::Remote { command: "loadNode" }]);

    // Ids handed out locally afterwards never collide with the remote one.
    let local = s.execute(CreateNode::new("group")).unwrap()[0];
    assert!(local.0 > 100);
}

// ============================================================================
// 2. Echoes of local edits are skipped
// ============================================================================

#[test]
fn test_local_echoes_are_ignored() {
    let (mut s, p, kids) = setup();
    s.execute(ModifyModel::set(kids[0], "tint", "#ff0000")).unwrap();

    for op in s.datastore().take_ops() {
        let echo = match op {
            DatastoreOp::ModifyNodeModel { id, patch } => {
                let (key, value) = patch.into_iter().next().unwrap();
                RemoteChange::ModelKeyChanged { id, key, value }
            }
            _ => continue,
        };
        assert!(!s.apply_remote(echo).unwrap());
    }

    let desc = s.datastore().node(kids[1]).unwrap();
    assert!(!s.apply_remote(RemoteChange::NodeCreated { descriptor: desc }).unwrap());
    assert!(!s.apply_remote(RemoteChange::ParentChanged { child: kids[1], parent: Some(p) }).unwrap());
    assert!(!s.apply_remote(RemoteChange::ChildrenReordered { id: p, children: kids.clone() }).unwrap());
    assert!(s.drain_events().iter().all(|e| !matches!(e, SessionEvent::Remote { .. })));
}

// ============================================================================
// 3. Remote removal cloaks once
// ============================================================================

#[test]
fn test_remote_remove() {
    let (mut s, p, kids) = setup();
    assert!(s.apply_remote(RemoteChange::NodeRemoved { id: kids[0] }).unwrap());
    assert!(s.graph().node(kids[0]).unwrap().is_cloaked());
    assert_eq!(s.graph().children(p).unwrap(), vec![kids[1]]);
    assert!(!s.apply_remote(RemoteChange::NodeRemoved { id: kids[0] }).unwrap());
    assert!(s.datastore().ops().is_empty());
}

// ============================================================================
// 4. Remote parent change and reorder
// ============================================================================

#[test]
fn test_remote_tree_changes() {
    let (mut s, p, kids) = setup();
    assert!(s.apply_remote(RemoteChange::ChildrenReordered { id: p, children: vec![kids[1], kids[0]] }).unwrap());
    assert_eq!(s.graph().children(p).unwrap(), vec![kids[1], kids[0]]);

    assert!(s.apply_remote(RemoteChange::ParentChanged { child: kids[0], parent: None }).unwrap());
    assert!(s.graph().roots().contains(&kids[0]));
    assert_eq!(s.graph().children(p).unwrap(), vec![kids[1]]);
}

// ============================================================================
// 5. Remote model writes land raw; a cleared key falls back
// ============================================================================

#[test]
fn test_remote_model_key() {
    let (mut s, _p, kids) = setup();
    let id = kids[0];
    let change = RemoteChange::ModelKeyChanged { id, key: "opacity".into(), value: Some(Value::Float(0.2)) };
    assert!(s.apply_remote(change).unwrap());
    assert_eq!(s.graph().get_value(id, "opacity").unwrap(), Value::Float(0.2));

    let clear = RemoteChange::ModelKeyChanged { id, key: "opacity".into(), value: None };
    assert!(s.apply_remote(clear).unwrap());
    assert_eq!(s.graph().get_value(id, "opacity").unwrap(), Value::Float(1.0));
}

// ============================================================================
// 6. Remote clone info rewires inheritance
// ============================================================================

#[test]
fn test_remote_clone_info() {
    let (mut s, _p, kids) = setup();
    let (a, b) = (kids[0], kids[1]);
    s.execute(ModifyModel::set(a, "tint", "#00ff00")).unwrap();

    let info = CloneInfoDescriptor { cloner: Some(a), clone_mode: CloneMode::VariantRoot, cloned: Vec::new() };
    assert!(s.apply_remote(RemoteChange::CloneInfoChanged { id: b, info: info.clone() }).unwrap());
    assert_eq!(s.graph().node(b).unwrap().cloner(), Some(a));
    assert_eq!(s.graph().get_value(b, "tint").unwrap(), Value::from("#00ff00"));
    assert!(s.graph().node(a).unwrap().clone_info.cloned.contains(&b));

    assert!(!s.apply_remote(RemoteChange::CloneInfoChanged { id: b, info }).unwrap());
}

// ============================================================================
// 7. A remote change that cannot apply is rejected without side effects
// ============================================================================

#[test]
fn test_bad_remote_change_rejected() {
    let (mut s, p, kids) = setup();
    let orphan = remote_node(200, Some(NodeId(999)), PropertyMap::new());
    assert!(s.apply_remote(RemoteChange::NodeCreated { descriptor: orphan }).is_err());
    assert!(s.graph().get(NodeId(200)).is_none());

    let cycle = RemoteChange::ParentChanged { child: p, parent: Some(kids[0]) };
    assert!(s.apply_remote(cycle).is_err());
    assert_eq!(s.graph().parent(p).unwrap(), None);
    s.graph().check_integrity().unwrap();
}
