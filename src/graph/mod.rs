//! # Scene Graph Registry
//!
//! The arena that owns every node and model of a session. All back-references
//! (tree parent, cloner, model-parent) are ids resolved here, so disposal
//! never leaves dangling strong cycles.
//!
//! Nodes are never destroyed by ordinary editing: removal cloaks them. A
//! cloaked node stays registered and keeps its slot in its parent's child
//! list, but is skipped by traversal ([`SceneGraph::children`],
//! [`SceneGraph::roots`]) and by clone fan-out.

pub mod clone;

use hashbrown::{HashMap, HashSet};

use crate::factory::NodeFactory;
use crate::model::{CloneMode, CustomProperties, NodeId, PropertyMap, SceneNode, Value};
use crate::properties::ModelStore;
use crate::{Error, Result};

pub use clone::{CloneOutcome, UnlinkRecord};

/// Former position of a node in the tree: parent (`None` = top level) and
/// raw index among that parent's children.
pub type TreePosition = (Option<NodeId>, usize);

#[derive(Debug, Clone)]
pub struct SceneGraph {
    nodes: HashMap<NodeId, SceneNode>,
    models: ModelStore,
    factory: NodeFactory,
    /// Top-level nodes in order, cloaked ones included.
    roots: Vec<NodeId>,
    next_id: u64,
    next_seq: u64,
}

impl SceneGraph {
    pub fn new(factory: NodeFactory) -> Self {
        Self {
            nodes: HashMap::new(),
            models: ModelStore::new(),
            factory,
            roots: Vec::new(),
            next_id: 1,
            next_seq: 1,
        }
    }

    pub fn factory(&self) -> &NodeFactory {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut NodeFactory {
        &mut self.factory
    }

    pub fn models(&self) -> &ModelStore {
        &self.models
    }

    pub fn models_mut(&mut self) -> &mut ModelStore {
        &mut self.models
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn node(&self, id: NodeId) -> Result<&SceneNode> {
        self.nodes.get(&id).ok_or(Error::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut SceneNode> {
        self.nodes.get_mut(&id).ok_or(Error::NodeNotFound(id))
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Registered nodes, cloaked included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All registered nodes in creation order.
    pub fn nodes(&self) -> Vec<&SceneNode> {
        let mut all: Vec<&SceneNode> = self.nodes.values().collect();
        all.sort_by_key(|n| n.seq);
        all
    }

    /// Visible top-level nodes.
    pub fn roots(&self) -> Vec<NodeId> {
        self.roots.iter().copied().filter(|id| !self.is_cloaked(*id)).collect()
    }

    /// Visible children in order.
    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self
            .node(id)?
            .children
            .iter()
            .copied()
            .filter(|c| !self.is_cloaked(*c))
            .collect())
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(id)?.parent)
    }

    fn is_cloaked(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.cloaked)
    }

    /// Registered, not cloaked, and no cloaked tree ancestor.
    pub fn is_live(&self, id: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            match self.nodes.get(&c) {
                Some(n) if !n.cloaked => cursor = n.parent,
                _ => return false,
            }
        }
        true
    }

    pub fn get_value(&self, id: NodeId, key: &str) -> Result<Value> {
        self.models.get_value(id, key)
    }

    pub fn effective_values(&self, id: NodeId) -> Result<PropertyMap> {
        self.models.effective_values(id)
    }

    /// Tree ancestors, nearest first.
    pub fn tree_ancestors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut cursor = self.node(id)?.parent;
        while let Some(p) = cursor {
            if out.contains(&p) {
                return Err(Error::TreeCycle { child: id, parent: p });
            }
            out.push(p);
            cursor = self.node(p)?.parent;
        }
        Ok(out)
    }

    pub fn is_descendant(&self, id: NodeId, ancestor: NodeId) -> bool {
        self.tree_ancestors(id).is_ok_and(|a| a.contains(&ancestor))
    }

    /// `id` and every node beneath it, pre-order, cloaked included.
    pub fn subtree(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        let mut visited: HashSet<NodeId> = HashSet::new();
        while let Some(next) = stack.pop() {
            if !visited.insert(next) {
                return Err(Error::TreeCycle { child: next, parent: id });
            }
            out.push(next);
            let node = self.node(next)?;
            stack.extend(node.children.iter().rev().copied());
        }
        Ok(out)
    }

    /// Sort ids by creation sequence.
    pub fn sort_by_seq(&self, ids: &mut [NodeId]) {
        ids.sort_by_key(|id| self.nodes.get(id).map(|n| n.seq).unwrap_or(u64::MAX));
    }

    // ========================================================================
    // Creation
    // ========================================================================

    fn allocate(&mut self, requested: Option<NodeId>) -> Result<(NodeId, u64)> {
        let id = match requested {
            Some(id) => {
                if self.nodes.contains_key(&id) {
                    return Err(Error::IntegrityViolation(format!("node {id} already registered")));
                }
                self.next_id = self.next_id.max(id.0 + 1);
                id
            }
            None => {
                let id = NodeId(self.next_id);
                self.next_id += 1;
                id
            }
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        Ok((id, seq))
    }

    /// Register a new top-level node of a factory type with an empty model.
    pub fn create_node(&mut self, type_name: &str, name: Option<&str>, id: Option<NodeId>) -> Result<NodeId> {
        let schema = self.factory.schema(type_name)?;
        let (id, seq) = self.allocate(id)?;
        let node = self.factory.instantiate(id, type_name, name, seq)?;
        self.nodes.insert(id, node);
        self.models.insert(id, schema);
        self.roots.push(id);
        tracing::trace!(node = %id, type_name, "node created");
        Ok(id)
    }

    /// Register a node built elsewhere (descriptor load). Links are taken as
    /// given; callers run [`check_integrity`](Self::check_integrity) once the
    /// batch is complete.
    pub(crate) fn register(&mut self, node: SceneNode) -> Result<()> {
        let schema = self.factory.schema(&node.node_type)?;
        if self.nodes.contains_key(&node.id) {
            return Err(Error::IntegrityViolation(format!("node {} already registered", node.id)));
        }
        self.next_id = self.next_id.max(node.id.0 + 1);
        self.next_seq = self.next_seq.max(node.seq + 1);
        if node.parent.is_none() {
            self.roots.push(node.id);
        }
        self.models.insert(node.id, schema);
        self.nodes.insert(node.id, node);
        Ok(())
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    // ========================================================================
    // Tree primitives
    // ========================================================================

    /// Raw child list of `parent` (`None` = top level), cloaked slots included.
    pub fn siblings(&self, parent: Option<NodeId>) -> Result<&[NodeId]> {
        Ok(match parent {
            Some(p) => self.node(p)?.children.as_slice(),
            None => self.roots.as_slice(),
        })
    }

    /// Current position of a node.
    pub fn position(&self, child: NodeId) -> Result<TreePosition> {
        let parent = self.node(child)?.parent;
        let index = self
            .siblings(parent)?
            .iter()
            .position(|c| *c == child)
            .ok_or(Error::ChildNotFound { parent, child })?;
        Ok((parent, index))
    }

    /// Raw insertion index corresponding to a visible index under `parent`.
    pub fn raw_index(&self, parent: Option<NodeId>, visible_index: usize) -> Result<usize> {
        let siblings = self.siblings(parent)?;
        let mut seen = 0;
        for (raw, id) in siblings.iter().enumerate() {
            if self.is_cloaked(*id) {
                continue;
            }
            if seen == visible_index {
                return Ok(raw);
            }
            seen += 1;
        }
        Ok(siblings.len())
    }

    /// Visible index of a node among its visible siblings.
    pub fn visible_index(&self, child: NodeId) -> Result<usize> {
        let (parent, raw) = self.position(child)?;
        let siblings = self.siblings(parent)?;
        Ok(siblings[..raw].iter().filter(|c| !self.is_cloaked(**c)).count())
    }

    /// Move `child` under `parent` (`None` = top level) at raw `index`
    /// (`None` = append). Returns the former position.
    ///
    /// Re-parenting to the current parent is an integrity error. Landing
    /// beneath itself or beneath one of its clone relatives is a cycle.
    pub fn set_parent(&mut self, child: NodeId, parent: Option<NodeId>, index: Option<usize>) -> Result<TreePosition> {
        let current = self.node(child)?.parent;
        if current == parent {
            return Err(Error::AlreadyParent { child, parent });
        }
        if let Some(p) = parent {
            self.node(p)?;
            if p == child || self.is_descendant(p, child) || self.contains_clone_relative(p, child)? {
                return Err(Error::TreeCycle { child, parent: p });
            }
        }
        let former = self.detach(child)?;
        self.insert_at(child, parent, index)?;
        Ok(former)
    }

    /// Reposition `child` within its current parent.
    pub fn move_within(&mut self, child: NodeId, index: usize) -> Result<TreePosition> {
        let former = self.detach(child)?;
        self.insert_at(child, former.0, Some(index))?;
        Ok(former)
    }

    /// Put `child` back under `parent` right after `anchor` (`None` = first
    /// slot). Falls back to raw `index` once the anchor has left that list.
    pub fn restore_after(
        &mut self,
        child: NodeId,
        parent: Option<NodeId>,
        anchor: Option<NodeId>,
        index: usize,
    ) -> Result<()> {
        self.detach(child)?;
        let slot = match anchor {
            Some(a) => self
                .siblings(parent)?
                .iter()
                .position(|s| *s == a)
                .map_or(index, |i| i + 1),
            None => 0,
        };
        self.insert_at(child, parent, Some(slot))
    }

    /// Whether `node`'s subtree holds a clone relative (cloner chain or
    /// transitive clone, cloaked included) of `parent` or of one of its
    /// ancestors.
    pub fn contains_clone_relative(&self, parent: NodeId, node: NodeId) -> Result<bool> {
        let mut containers = self.tree_ancestors(parent)?;
        containers.push(parent);
        for member in self.subtree(node)? {
            if self.clone_family(member).iter().any(|f| containers.contains(f)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn clone_family(&self, id: NodeId) -> HashSet<NodeId> {
        let mut family = HashSet::new();
        family.insert(id);
        let mut cursor = self.nodes.get(&id).and_then(|n| n.clone_info.cloner);
        while let Some(c) = cursor {
            if !family.insert(c) {
                break;
            }
            cursor = self.nodes.get(&c).and_then(|n| n.clone_info.cloner);
        }
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(node) = self.nodes.get(&next) else { continue };
            for c in &node.clone_info.cloned {
                if family.insert(*c) {
                    stack.push(*c);
                }
            }
        }
        family
    }

    fn detach(&mut self, child: NodeId) -> Result<TreePosition> {
        let (parent, index) = self.position(child)?;
        match parent {
            Some(p) => {
                self.node_mut(p)?.children.remove(index);
            }
            None => {
                self.roots.remove(index);
            }
        }
        self.node_mut(child)?.parent = None;
        Ok((parent, index))
    }

    fn insert_at(&mut self, child: NodeId, parent: Option<NodeId>, index: Option<usize>) -> Result<()> {
        let siblings = match parent {
            Some(p) => &mut self.node_mut(p)?.children,
            None => &mut self.roots,
        };
        let index = index.unwrap_or(siblings.len()).min(siblings.len());
        siblings.insert(index, child);
        self.node_mut(child)?.parent = parent;
        Ok(())
    }

    /// Replace the child order of `parent` with a permutation of itself.
    /// Returns the former order.
    pub fn reorder_children(&mut self, parent: NodeId, order: &[NodeId]) -> Result<Vec<NodeId>> {
        let current = self.node(parent)?.children.clone();
        let mut a = current.clone();
        let mut b = order.to_vec();
        a.sort();
        b.sort();
        if a != b {
            return Err(Error::IntegrityViolation(format!(
                "reorder of {parent} is not a permutation of its children"
            )));
        }
        self.node_mut(parent)?.children = order.to_vec();
        Ok(current)
    }

    // ========================================================================
    // Cloaking
    // ========================================================================

    pub fn cloak(&mut self, id: NodeId) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.cloaked {
            return Err(Error::NodeCloaked(id));
        }
        node.cloaked = true;
        Ok(())
    }

    /// Clear the cloaked flag. Returns whether it was set.
    pub fn uncloak(&mut self, id: NodeId) -> Result<bool> {
        let node = self.node_mut(id)?;
        let was = node.cloaked;
        node.cloaked = false;
        Ok(was)
    }

    // ========================================================================
    // Node data
    // ========================================================================

    pub fn custom_properties(&self, id: NodeId) -> Result<&CustomProperties> {
        Ok(&self.node(id)?.custom)
    }

    pub(crate) fn custom_properties_mut(&mut self, id: NodeId) -> Result<&mut CustomProperties> {
        Ok(&mut self.node_mut(id)?.custom)
    }

    pub(crate) fn set_view(&mut self, id: NodeId, view: crate::view::ViewHandle) -> Result<()> {
        self.node_mut(id)?.view = Some(view);
        Ok(())
    }

    // ========================================================================
    // Integrity
    // ========================================================================

    /// Verify every structural invariant of the graph.
    pub fn check_integrity(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::IntegrityViolation(msg));

        for root in &self.roots {
            match self.nodes.get(root) {
                Some(n) if n.parent.is_none() => {}
                _ => return fail(format!("top-level entry {root} is not a parentless node")),
            }
        }

        for node in self.nodes.values() {
            let id = node.id;
            match node.parent {
                Some(p) => {
                    let Some(parent) = self.nodes.get(&p) else {
                        return fail(format!("node {id} has unknown parent {p}"));
                    };
                    if parent.children.iter().filter(|c| **c == id).count() != 1 {
                        return fail(format!("parent {p} does not list child {id} exactly once"));
                    }
                }
                None => {
                    if self.roots.iter().filter(|r| **r == id).count() != 1 {
                        return fail(format!("parentless node {id} missing from top level"));
                    }
                }
            }
            for c in &node.children {
                if self.nodes.get(c).and_then(|n| n.parent) != Some(id) {
                    return fail(format!("child {c} of {id} does not point back"));
                }
            }

            let info = &node.clone_info;
            match (info.mode, info.cloner) {
                (CloneMode::Original | CloneMode::Duplicate, Some(c)) => {
                    return fail(format!("{} node {id} still has cloner {c}", info.mode));
                }
                (mode, None) if mode.inherits_model() => {
                    return fail(format!("{mode} node {id} has no cloner"));
                }
                _ => {}
            }
            if let Some(c) = info.cloner {
                let Some(cloner) = self.nodes.get(&c) else {
                    return fail(format!("node {id} has unknown cloner {c}"));
                };
                if cloner.clone_info.cloned.iter().filter(|x| **x == id).count() != 1 {
                    return fail(format!("cloner {c} does not list {id} exactly once"));
                }
            }
            for c in &info.cloned {
                if self.nodes.get(c).and_then(|n| n.clone_info.cloner) != Some(id) {
                    return fail(format!("cloned {c} of {id} does not point back"));
                }
            }

            let Some(model) = self.models.get(id) else {
                return fail(format!("node {id} has no model"));
            };
            let expected = if info.mode.inherits_model() { info.cloner } else { None };
            if model.parent() != expected {
                return fail(format!(
                    "model of {id} ({}) links to {:?}, expected {:?}",
                    info.mode,
                    model.parent(),
                    expected
                ));
            }
            if model.is_reference() != (info.mode == CloneMode::ReferenceRoot) {
                return fail(format!("model of {id} has wrong reference flag for {}", info.mode));
            }
        }
        Ok(())
    }
}
