//! Tree primitives: re-parent and reorder.

use serde::{Deserialize, Serialize};

use super::node::raw_index;
use super::{Command, CommandContext};
use crate::datastore::DatastoreOp;
use crate::graph::TreePosition;
use crate::model::NodeId;
use crate::{Error, Result};

// ============================================================================
// SetParent
// ============================================================================

/// Move `child` under `parent` (`None` = top level) at a visible index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetParent {
    pub child: NodeId,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(skip)]
    placement: Option<Placement>,
}

/// Where the child came from and where it lands on redo.
#[derive(Debug, Clone, Copy)]
struct Placement {
    former: TreePosition,
    /// Raw sibling just before the child in its former list.
    anchor: Option<NodeId>,
    /// Raw slot under the new parent, taken on undo.
    slot: Option<usize>,
}

impl SetParent {
    pub const NAME: &'static str = "setParent";

    pub fn new(child: NodeId, parent: Option<NodeId>, index: Option<usize>) -> Self {
        Self { child, parent, index, placement: None }
    }

    fn announce(&self, cx: &mut CommandContext<'_>, former: Option<NodeId>, now: Option<NodeId>) -> Result<()> {
        cx.emit(DatastoreOp::SetNodeParent { child: self.child, parent: now });
        cx.emit_children(former)?;
        cx.emit_children(now)?;
        cx.touch(self.child);
        Ok(())
    }
}

impl Command for SetParent {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn apply(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        if let Some(placement) = &mut self.placement {
            placement.former = cx.graph.set_parent(self.child, self.parent, placement.slot)?;
            let from = placement.former.0;
            return self.announce(cx, from, self.parent);
        }

        if let Some(p) = self.parent {
            if !cx.graph.is_live(p) {
                cx.graph.node(p)?;
                return Err(Error::NodeCloaked(p));
            }
        }
        let raw = raw_index(cx.graph, self.parent, self.index)?;
        let (from, at) = cx.graph.position(self.child)?;
        let anchor = match at {
            0 => None,
            i => Some(cx.graph.siblings(from)?[i - 1]),
        };
        let former = cx.graph.set_parent(self.child, self.parent, raw)?;
        self.placement = Some(Placement { former, anchor, slot: raw });
        self.announce(cx, from, self.parent)
    }

    fn undo(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        if let Some(placement) = &mut self.placement {
            placement.slot = Some(cx.graph.position(self.child)?.1);
            let (from, index) = placement.former;
            cx.graph.restore_after(self.child, from, placement.anchor, index)?;
            self.announce(cx, self.parent, from)?;
        }
        Ok(())
    }

    fn has_run(&self) -> bool {
        self.placement.is_some()
    }
}

// ============================================================================
// ReorderChildren
// ============================================================================

/// Reorder the visible children of `parent`. Cloaked children keep their
/// raw slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderChildren {
    pub parent: NodeId,
    pub order: Vec<NodeId>,
    #[serde(skip)]
    former: Option<Vec<NodeId>>,
}

impl ReorderChildren {
    pub const NAME: &'static str = "reorderChildren";

    pub fn new(parent: NodeId, order: Vec<NodeId>) -> Self {
        Self { parent, order, former: None }
    }
}

impl Command for ReorderChildren {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn apply(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        let visible = cx.graph.children(self.parent)?;
        let mut a = visible.clone();
        let mut b = self.order.clone();
        a.sort();
        b.sort();
        if a != b {
            return Err(Error::InvalidParams(format!(
                "order for {} is not a permutation of its visible children",
                self.parent
            )));
        }

        let mut next = self.order.iter();
        let raw: Vec<NodeId> = cx
            .graph
            .node(self.parent)?
            .children
            .iter()
            .map(|c| {
                if visible.contains(c) {
                    next.next().copied().unwrap_or(*c)
                } else {
                    *c
                }
            })
            .collect();
        let former = cx.graph.reorder_children(self.parent, &raw)?;
        self.former = Some(former);
        cx.emit_children(Some(self.parent))?;
        cx.touch(self.parent);
        Ok(())
    }

    fn undo(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        if let Some(former) = &self.former {
            cx.graph.reorder_children(self.parent, former)?;
            cx.emit_children(Some(self.parent))?;
            cx.touch(self.parent);
        }
        Ok(())
    }

    fn has_run(&self) -> bool {
        self.former.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::NodeFactory;
    use crate::graph::SceneGraph;

    fn family() -> (SceneGraph, NodeId, Vec<NodeId>) {
        let mut g = SceneGraph::new(NodeFactory::with_builtin_types());
        let p = g.create_node("group", None, None).unwrap();
        let kids = (0..3)
            .map(|_| {
                let k = g.create_node("sprite", None, None).unwrap();
                g.set_parent(k, Some(p), None).unwrap();
                k
            })
            .collect();
        (g, p, kids)
    }

    #[test]
    fn test_set_parent_undo_restores_index() {
        let (mut g, p, kids) = family();
        let mut cmd = SetParent::new(kids[1], None, Some(0));
        cmd.apply(&mut CommandContext::new(&mut g)).unwrap();
        assert_eq!(g.roots(), vec![kids[1], p]);

        cmd.undo(&mut CommandContext::new(&mut g)).unwrap();
        assert_eq!(g.children(p).unwrap(), kids);
        cmd.redo(&mut CommandContext::new(&mut g)).unwrap();
        assert_eq!(g.roots(), vec![kids[1], p]);
    }

    #[test]
    fn test_set_parent_undo_follows_former_sibling() {
        let (mut g, p, kids) = family();
        let mut cmd = SetParent::new(kids[2], None, None);
        cmd.apply(&mut CommandContext::new(&mut g)).unwrap();

        // a later, since-undone insertion still holds a slot ahead of the anchor
        let later = g.create_node("sprite", None, None).unwrap();
        g.set_parent(later, Some(p), Some(0)).unwrap();
        g.cloak(later).unwrap();

        cmd.undo(&mut CommandContext::new(&mut g)).unwrap();
        assert_eq!(g.node(p).unwrap().children, vec![later, kids[0], kids[1], kids[2]]);
        assert_eq!(g.children(p).unwrap(), kids);

        cmd.redo(&mut CommandContext::new(&mut g)).unwrap();
        assert_eq!(g.roots(), vec![p, kids[2]]);
        assert_eq!(g.children(p).unwrap(), vec![kids[0], kids[1]]);
    }

    #[test]
    fn test_set_parent_redo_reuses_undone_slot() {
        let (mut g, p, kids) = family();
        let q = g.create_node("group", None, None).unwrap();
        let mut cmd = SetParent::new(kids[0], Some(q), None);
        cmd.apply(&mut CommandContext::new(&mut g)).unwrap();

        let after = g.create_node("sprite", None, None).unwrap();
        g.set_parent(after, Some(q), None).unwrap();
        g.cloak(after).unwrap();

        cmd.undo(&mut CommandContext::new(&mut g)).unwrap();
        assert_eq!(g.children(p).unwrap(), kids);
        g.uncloak(after).unwrap();
        cmd.redo(&mut CommandContext::new(&mut g)).unwrap();
        assert_eq!(g.children(q).unwrap(), vec![kids[0], after]);
    }

    #[test]
    fn test_set_parent_to_current_parent_is_fatal() {
        let (mut g, p, kids) = family();
        let mut cmd = SetParent::new(kids[0], Some(p), None);
        assert!(matches!(
            cmd.apply(&mut CommandContext::new(&mut g)),
            Err(Error::AlreadyParent { .. })
        ));
        assert!(!cmd.has_run());
    }

    #[test]
    fn test_reorder_skips_cloaked_slots() {
        let (mut g, p, kids) = family();
        g.cloak(kids[1]).unwrap();
        let mut cmd = ReorderChildren::new(p, vec![kids[2], kids[0]]);
        cmd.apply(&mut CommandContext::new(&mut g)).unwrap();
        assert_eq!(g.node(p).unwrap().children, vec![kids[2], kids[1], kids[0]]);

        cmd.undo(&mut CommandContext::new(&mut g)).unwrap();
        assert_eq!(g.node(p).unwrap().children, kids);
    }

    #[test]
    fn test_reorder_rejects_foreign_ids() {
        let (mut g, p, kids) = family();
        let mut cmd = ReorderChildren::new(p, vec![kids[0], kids[1], p]);
        assert!(matches!(cmd.apply(&mut CommandContext::new(&mut g)), Err(Error::InvalidParams(_))));
    }
}
