//! End-to-end tests for structural fan-out.
//!
//! Adding, removing and moving children under a prefab must be mirrored
//! into every instance of it, with clone chains that follow the family
//! shape and positions that correspond structurally.

use prefab_graph::command::{AddChild, CloneNode, CreateNode, MoveNode, RemoveNode};
use prefab_graph::{CloneMode, DatastoreOp, Error, MemoryDatastore, NodeId, Session, ledger};
use proptest::prelude::*;

// ============================================================================
// Helper
// ============================================================================

fn original(s: &mut Session<MemoryDatastore>) -> NodeId {
    s.execute(CreateNode::new("group").named("O")).unwrap()[0]
}

fn clone(s: &mut Session<MemoryDatastore>, source: NodeId, mode: CloneMode) -> NodeId {
    s.execute(CloneNode::new(source, mode)).unwrap()[0]
}

// ============================================================================
// 1. Adding under an original with one variant creates exactly two nodes
// ============================================================================

#[test]
fn test_add_child_under_variant_family() {
    let mut s = Session::open_memory();
    let o = original(&mut s);
    let v1 = clone(&mut s, o, CloneMode::Variant);
    let before = s.graph().len();

    let created = s.execute(AddChild::new_node(o, "sprite")).unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(s.graph().len(), before + 2);

    let ch = created[0];
    let copy = created[1];
    assert_eq!(s.graph().children(o).unwrap(), vec![ch]);
    assert_eq!(s.graph().children(v1).unwrap(), vec![copy]);
    let node = s.graph().node(copy).unwrap();
    assert_eq!(node.mode(), CloneMode::Variant);
    assert_eq!(node.cloner(), Some(ch));
}

// ============================================================================
// 2. M clones of the parent yield M+1 nodes with consistent wiring
// ============================================================================

#[test]
fn test_add_child_creates_m_plus_one() {
    let mut s = Session::open_memory();
    let o = original(&mut s);
    let members = vec![
        clone(&mut s, o, CloneMode::Variant),
        clone(&mut s, o, CloneMode::Reference),
        clone(&mut s, o, CloneMode::Variant),
    ];

    let created = s.execute(AddChild::new_node(o, "text")).unwrap();
    assert_eq!(created.len(), members.len() + 1);

    let ch = created[0];
    for (member, copy) in members.iter().zip(&created[1..]) {
        assert_eq!(s.graph().parent(*copy).unwrap(), Some(*member));
        let node = s.graph().node(*copy).unwrap();
        assert_eq!(node.cloner(), Some(ch));
        let expected = if *member == members[1] { CloneMode::Reference } else { CloneMode::Variant };
        assert_eq!(node.mode(), expected);
    }
    let cloned = &s.graph().node(ch).unwrap().clone_info.cloned;
    assert_eq!(cloned.len(), members.len());
}

// ============================================================================
// 3. A clone of a clone is fed from its nearest family ancestor
// ============================================================================

#[test]
fn test_nested_instance_clones_from_nearest_copy() {
    let mut s = Session::open_memory();
    let o = original(&mut s);
    let v = clone(&mut s, o, CloneMode::Variant);
    let vv = clone(&mut s, v, CloneMode::Variant);

    let created = s.execute(AddChild::new_node(o, "sprite")).unwrap();
    let in_v = s.graph().children(v).unwrap()[0];
    let in_vv = s.graph().children(vv).unwrap()[0];
    assert_eq!(created, vec![created[0], in_v, in_vv]);
    assert_eq!(s.graph().node(in_vv).unwrap().cloner(), Some(in_v));
    assert_eq!(ledger::original(s.graph(), in_vv).unwrap(), created[0]);
}

// ============================================================================
// 4. Adding under a reference lands on its source
// ============================================================================

#[test]
fn test_add_under_reference_redirects_to_source() {
    let mut s = Session::open_memory();
    let o = original(&mut s);
    let r = clone(&mut s, o, CloneMode::Reference);

    let created = s.execute(AddChild::new_node(r, "sprite")).unwrap();
    assert_eq!(s.graph().parent(created[0]).unwrap(), Some(o));
    assert_eq!(s.graph().children(r).unwrap(), vec![created[1]]);
}

// ============================================================================
// 5. The requested index is honoured in every instance
// ============================================================================

#[test]
fn test_index_is_structurally_corresponding() {
    let mut s = Session::open_memory();
    let o = original(&mut s);
    let a = s.execute(AddChild::new_node(o, "sprite")).unwrap()[0];
    let b = s.execute(AddChild::new_node(o, "sprite")).unwrap()[0];
    let v = clone(&mut s, o, CloneMode::Variant);
    let v_kids = s.graph().children(v).unwrap();

    let created = s.execute(AddChild::new_node(o, "text").at(1)).unwrap();
    assert_eq!(s.graph().children(o).unwrap(), vec![a, created[0], b]);
    assert_eq!(s.graph().children(v).unwrap(), vec![v_kids[0], created[1], v_kids[1]]);
}

// ============================================================================
// 6. Removing a child cloaks it in every instance
// ============================================================================

#[test]
fn test_remove_fans_out_and_undo_restores() {
    let mut s = Session::open_memory();
    let o = original(&mut s);
    let v = clone(&mut s, o, CloneMode::Variant);
    let r = clone(&mut s, o, CloneMode::Reference);
    let created = s.execute(AddChild::new_node(o, "sprite")).unwrap();

    s.execute(RemoveNode::new(created[0])).unwrap();
    assert!(s.graph().children(o).unwrap().is_empty());
    assert!(s.graph().children(v).unwrap().is_empty());
    assert!(s.graph().children(r).unwrap().is_empty());
    assert!(created.iter().all(|c| s.graph().node(*c).unwrap().is_cloaked()));

    s.undo().unwrap();
    assert_eq!(s.graph().children(v).unwrap(), vec![created[1]]);
    assert_eq!(s.graph().children(r).unwrap(), vec![created[2]]);
}

// ============================================================================
// 7. Moving a child moves its mirrors inside each instance
// ============================================================================

#[test]
fn test_move_follows_in_instances() {
    let mut s = Session::open_memory();
    let o = original(&mut s);
    let v = clone(&mut s, o, CloneMode::Variant);
    let folder = s.execute(AddChild::new_node(o, "group")).unwrap();
    let item = s.execute(AddChild::new_node(o, "sprite")).unwrap();

    s.execute(MoveNode::new(item[0], Some(folder[0]))).unwrap();
    assert_eq!(s.graph().parent(item[1]).unwrap(), Some(folder[1]));
    assert_eq!(s.graph().children(v).unwrap(), vec![folder[1]]);

    s.undo().unwrap();
    assert_eq!(s.graph().children(v).unwrap(), vec![folder[1], item[1]]);
}

// ============================================================================
// 8. A rejected create aborts the whole fan-out
// ============================================================================

#[test]
fn test_rejected_create_rolls_back_fanout() {
    let mut s = Session::open_memory();
    let o = original(&mut s);
    clone(&mut s, o, CloneMode::Variant);
    let before = s.graph().len();
    let groups = s.history().groups();
    s.datastore().take_ops();

    s.datastore().reject_creates(true);
    let err = s.execute(AddChild::new_node(o, "sprite")).unwrap_err();
    assert!(matches!(err, Error::Datastore(_)));
    assert_eq!(s.graph().len(), before);
    assert_eq!(s.history().groups(), groups);
    assert!(s.datastore().ops().is_empty());
    s.graph().check_integrity().unwrap();

    s.datastore().reject_creates(false);
    let created = s.execute(AddChild::new_node(o, "sprite")).unwrap();
    assert_eq!(created.len(), 2);
    let ops = s.datastore().ops();
    assert!(matches!(&ops[0], DatastoreOp::CreateNode { descriptor } if descriptor.id == created[0]));
}

// ============================================================================
// 9. Local children in an instance do not shift the mirrored position
// ============================================================================

#[test]
fn test_index_follows_copy_past_local_children() {
    let mut s = Session::open_memory();
    let o = original(&mut s);
    let a = s.execute(AddChild::new_node(o, "sprite")).unwrap();
    let v = clone(&mut s, o, CloneMode::Variant);
    let extra = s.execute(CreateNode::new("sprite").named("extra")).unwrap()[0];
    s.execute(MoveNode::new(extra, Some(v)).at(0)).unwrap();
    assert_eq!(s.graph().children(v).unwrap(), vec![extra, a[1]]);

    let created = s.execute(AddChild::new_node(o, "sprite").at(1)).unwrap();
    assert_eq!(s.graph().children(o).unwrap(), vec![a[0], created[0]]);
    assert_eq!(s.graph().children(v).unwrap(), vec![extra, a[1], created[1]]);
}

// ============================================================================
// 10. A prefab cannot end up inside its own family
// ============================================================================

#[test]
fn test_family_containment_is_rejected() {
    let mut s = Session::open_memory();
    let o = original(&mut s);
    let v = clone(&mut s, o, CloneMode::Variant);
    let before = s.graph().len();
    let groups = s.history().groups();

    let err = s.execute(AddChild::clone_of(o, o, CloneMode::Reference)).unwrap_err();
    assert!(matches!(err, Error::TreeCycle { .. }));
    let err = s.execute(MoveNode::new(o, Some(v))).unwrap_err();
    assert!(matches!(err, Error::TreeCycle { .. }));

    assert_eq!(s.graph().len(), before);
    assert_eq!(s.history().groups(), groups);
    assert!(s.graph().children(o).unwrap().is_empty());
    assert!(s.graph().children(v).unwrap().is_empty());
    assert_eq!(s.graph().roots(), vec![o, v]);
    s.graph().check_integrity().unwrap();
}

// ============================================================================
// 11. Fan-out completeness for arbitrary families
// ============================================================================

fn mode_strategy() -> impl Strategy<Value = CloneMode> {
    prop_oneof![Just(CloneMode::Variant), Just(CloneMode::Reference)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_fanout_reaches_every_member(
        modes in prop::collection::vec(mode_strategy(), 0..5),
        nested in prop::collection::vec(any::<bool>(), 0..5),
    ) {
        let mut s = Session::open_memory();
        let o = original(&mut s);
        let mut family = vec![o];
        for (i, mode) in modes.iter().enumerate() {
            // Either clone the original or the latest family member.
            let source = if nested.get(i).copied().unwrap_or(false) {
                *family.last().unwrap()
            } else {
                o
            };
            family.push(clone(&mut s, source, *mode));
        }
        let m = ledger::all_cloned(s.graph(), o).unwrap().len();
        let before = s.graph().len();

        let created = s.execute(AddChild::new_node(o, "sprite")).unwrap();
        prop_assert_eq!(created.len(), m + 1);
        prop_assert_eq!(s.graph().len(), before + m + 1);

        for member in &family {
            let kids = s.graph().children(*member).unwrap();
            prop_assert_eq!(kids.len(), 1);
            let kid = s.graph().node(kids[0]).unwrap();
            if let Some(c) = kid.cloner() {
                let cloned = &s.graph().node(c).unwrap().clone_info.cloned;
                prop_assert_eq!(cloned.iter().filter(|x| **x == kid.id).count(), 1);
            }
        }
        s.graph().check_integrity().unwrap();
    }
}
