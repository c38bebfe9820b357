//! Structural composites that fan an edit out to every clone of its
//! context: add, remove and move.
//!
//! Each composite resolves its real target through the ledger policy, runs
//! primitive sub-commands, and on failure rolls back whatever already ran.

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use super::node::{CloakNode, CloneNode, CreateNode};
use super::tree::SetParent;
use super::{Command, CommandContext, Steps};
use crate::graph::SceneGraph;
use crate::ledger;
use crate::model::{CloneMode, NodeId, PropertyMap};
use crate::{Error, Result};

/// Source to clone from when fanning out beneath `member`: whatever was
/// produced for the nearest cloner ancestor of `member`, else `fallback`.
fn fanout_source(
    graph: &SceneGraph,
    member: NodeId,
    produced: &HashMap<NodeId, NodeId>,
    fallback: NodeId,
) -> Result<NodeId> {
    for ancestor in ledger::clone_ancestors(graph, member)? {
        if let Some(p) = produced.get(&ancestor) {
            return Ok(*p);
        }
    }
    Ok(fallback)
}

/// Visible index under `member` that mirrors where `child` sits among its
/// own siblings: right after the member's copy of the previous sibling,
/// else right before its copy of the next one, else `fallback`.
fn corresponding_index(
    graph: &SceneGraph,
    child: NodeId,
    member: NodeId,
    fallback: Option<usize>,
) -> Result<Option<usize>> {
    let Some(parent) = graph.parent(child)? else {
        return Ok(fallback);
    };
    let siblings = graph.children(parent)?;
    let Some(at) = siblings.iter().position(|s| *s == child) else {
        return Ok(fallback);
    };
    let slots = graph.children(member)?;
    let copy_of = |sibling: NodeId| {
        slots.iter().position(|slot| {
            ledger::clone_ancestors(graph, *slot).is_ok_and(|chain| chain.contains(&sibling))
        })
    };

    if let Some(i) = at.checked_sub(1).and_then(|prev| copy_of(siblings[prev])) {
        return Ok(Some(i + 1));
    }
    if let Some(i) = siblings.get(at + 1).and_then(|next| copy_of(*next)) {
        return Ok(Some(i));
    }
    Ok(fallback)
}

fn missing(what: &str) -> Error {
    Error::IntegrityViolation(format!("{what} produced no node"))
}

macro_rules! composite {
    ($ty:ty) => {
        impl Command for $ty {
            fn name(&self) -> &'static str {
                Self::NAME
            }

            fn params(&self) -> Result<serde_json::Value> {
                Ok(serde_json::to_value(self)?)
            }

            fn apply(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
                if self.steps.is_planned() {
                    return self.steps.redo_all(cx);
                }
                if let Err(e) = self.plan(cx) {
                    tracing::debug!(command = Self::NAME, error = %e, "rolling back");
                    self.steps.rollback(cx);
                    return Err(e);
                }
                self.steps.finish();
                Ok(())
            }

            fn undo(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
                self.steps.undo_all(cx)
            }

            fn discard(&mut self, graph: &mut SceneGraph) -> Result<()> {
                self.steps.discard_all(graph)
            }

            fn has_run(&self) -> bool {
                self.steps.is_planned()
            }
        }
    };
}

// ============================================================================
// AddChild
// ============================================================================

/// What to insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChildSpec {
    #[serde(rename_all = "camelCase")]
    New {
        node_type: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        values: PropertyMap,
    },
    CloneOf { source: NodeId, mode: CloneMode },
}

/// Insert a child under `parent` and mirror it into every clone of the
/// parent's context.
///
/// The child lands under `add_child_clone_target(parent)`. Each family
/// member then receives a clone of it in the member's child mode, cloned
/// from the copy produced for its nearest cloner ancestor so clone chains
/// follow the family shape.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChild {
    pub parent: NodeId,
    pub child: ChildSpec,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(skip)]
    steps: Steps,
    #[serde(skip)]
    produced: Vec<NodeId>,
}

impl AddChild {
    pub const NAME: &'static str = "addChild";

    pub fn new(parent: NodeId, child: ChildSpec) -> Self {
        Self { parent, child, index: None, steps: Steps::default(), produced: Vec::new() }
    }

    pub fn new_node(parent: NodeId, node_type: impl Into<String>) -> Self {
        Self::new(
            parent,
            ChildSpec::New { node_type: node_type.into(), name: None, values: PropertyMap::new() },
        )
    }

    pub fn clone_of(parent: NodeId, source: NodeId, mode: CloneMode) -> Self {
        Self::new(parent, ChildSpec::CloneOf { source, mode })
    }

    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Roots of every inserted subtree: the initial child first, then one
    /// per family member.
    pub fn produced(&self) -> &[NodeId] {
        &self.produced
    }

    fn plan(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        let target = ledger::add_child_clone_target(cx.graph, self.parent)?;
        if !cx.graph.is_live(target) {
            return Err(Error::NodeCloaked(target));
        }

        let initial = match &self.child {
            ChildSpec::New { node_type, name, values } => {
                let mut create = CreateNode::new(node_type.clone())
                    .under(target, self.index)
                    .with_values(values.clone());
                create.name = name.clone();
                self.steps.run(cx, create, CreateNode::node)?
            }
            ChildSpec::CloneOf { source, mode } => {
                let clone = CloneNode::new(*source, *mode).under(target, self.index);
                self.steps.run(cx, clone, CloneNode::root)?
            }
        }
        .ok_or_else(|| missing(Self::NAME))?;
        self.produced.push(initial);

        let mut produced: HashMap<NodeId, NodeId> = HashMap::new();
        produced.insert(target, initial);
        for member in ledger::all_cloned(cx.graph, target)? {
            let source = fanout_source(cx.graph, member, &produced, initial)?;
            let mode = ledger::new_child_clone_mode(cx.graph, member)?;
            let index = corresponding_index(cx.graph, initial, member, self.index)?;
            let clone = CloneNode::new(source, mode).under(member, index).at_depth(1);
            let root = self
                .steps
                .run(cx, clone, CloneNode::root)?
                .ok_or_else(|| missing(Self::NAME))?;
            tracing::trace!(%member, %source, %root, %mode, "fanned out child");
            produced.insert(member, root);
            self.produced.push(root);
        }
        tracing::debug!(parent = %target, count = self.produced.len(), "child added");
        Ok(())
    }
}

composite!(AddChild);

// ============================================================================
// RemoveNode
// ============================================================================

/// Cloak a node together with every clone of it.
///
/// Undo restores jointly: for each cloaked node, its cloaked dependencies
/// that this command cloaked are brought back first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveNode {
    pub node: NodeId,
    #[serde(skip)]
    cloaked: Option<Vec<NodeId>>,
}

impl RemoveNode {
    pub const NAME: &'static str = "removeNode";

    pub fn new(node: NodeId) -> Self {
        Self { node, cloaked: None }
    }

    /// Nodes this command cloaked, in cloak order.
    pub fn cloaked(&self) -> &[NodeId] {
        self.cloaked.as_deref().unwrap_or_default()
    }

    fn plan(&self, cx: &mut CommandContext<'_>) -> Result<Vec<NodeId>> {
        let target = ledger::remove_child_clone_target(cx.graph, self.node)?;
        if !cx.graph.is_live(target) {
            cx.graph.node(target)?;
            return Err(Error::NodeCloaked(target));
        }
        let mut set = vec![target];
        set.extend(ledger::all_cloned(cx.graph, target)?);

        let mut done = Vec::with_capacity(set.len());
        for id in set {
            if !cx.graph.is_live(id) {
                continue;
            }
            if let Err(e) = cx.cloak(id) {
                for d in done.iter().rev() {
                    cx.uncloak(*d)?;
                }
                return Err(e);
            }
            done.push(id);
        }
        Ok(done)
    }
}

impl Command for RemoveNode {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn apply(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        if let Some(cloaked) = &self.cloaked {
            for id in cloaked {
                cx.cloak(*id)?;
            }
            return Ok(());
        }
        let done = self.plan(cx)?;
        tracing::debug!(node = %self.node, count = done.len(), "node removed");
        self.cloaked = Some(done);
        Ok(())
    }

    fn undo(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        let Some(cloaked) = &self.cloaked else { return Ok(()) };
        let mine: HashSet<NodeId> = cloaked.iter().copied().collect();
        for id in cloaked.iter().rev() {
            for dep in ledger::restore_dependencies(cx.graph, *id)? {
                if mine.contains(&dep) && cx.graph.node(dep)?.is_cloaked() {
                    cx.uncloak(dep)?;
                }
            }
        }
        Ok(())
    }

    fn has_run(&self) -> bool {
        self.cloaked.is_some()
    }
}

// ============================================================================
// MoveNode
// ============================================================================

/// Re-parent a node and keep its clones structurally in step.
///
/// Every fanned-out clone of the node follows to the clone of the new
/// parent that lives in the same instance. Clones whose instance has no
/// counterpart of the new parent are cloaked, and instances that gain the
/// new parent without having had the node receive a fresh clone.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveNode {
    pub node: NodeId,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(skip)]
    steps: Steps,
}

impl MoveNode {
    pub const NAME: &'static str = "moveNode";

    pub fn new(node: NodeId, parent: Option<NodeId>) -> Self {
        Self { node, parent, index: None, steps: Steps::default() }
    }

    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    fn plan(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        let node = ledger::remove_child_clone_target(cx.graph, self.node)?;
        let parent = self
            .parent
            .map(|p| ledger::add_child_clone_target(cx.graph, p))
            .transpose()?;

        let clones = ledger::all_cloned(cx.graph, node)?;
        self.steps.run(cx, SetParent::new(node, parent, self.index), |_| ())?;

        let members = match parent {
            Some(p) => ledger::all_cloned(cx.graph, p)?,
            None => Vec::new(),
        };
        let mut member_roots = Vec::with_capacity(members.len());
        for m in &members {
            member_roots.push(ledger::clone_root(cx.graph, *m)?);
        }

        let mut produced: HashMap<NodeId, NodeId> = HashMap::new();
        if let Some(p) = parent {
            produced.insert(p, node);
        }
        for c in clones {
            let root = ledger::clone_root(cx.graph, c)?;
            // Direct instances of the node are not structural mirrors.
            if root.is_none() || root == Some(c) {
                continue;
            }
            let slot = members
                .iter()
                .zip(&member_roots)
                .find(|(m, r)| **r == root && !produced.contains_key(*m))
                .map(|(m, _)| *m);
            match slot {
                Some(m) => {
                    if cx.graph.parent(c)? != Some(m) {
                        let index = corresponding_index(cx.graph, node, m, self.index)?;
                        self.steps.run(cx, SetParent::new(c, Some(m), index), |_| ())?;
                    }
                    produced.insert(m, c);
                }
                None => {
                    self.steps.run(cx, CloakNode::new(c), |_| ())?;
                }
            }
        }

        for m in members {
            if produced.contains_key(&m) {
                continue;
            }
            let source = fanout_source(cx.graph, m, &produced, node)?;
            let mode = ledger::new_child_clone_mode(cx.graph, m)?;
            let index = corresponding_index(cx.graph, node, m, self.index)?;
            let clone = CloneNode::new(source, mode).under(m, index).at_depth(1);
            let root = self
                .steps
                .run(cx, clone, CloneNode::root)?
                .ok_or_else(|| missing(Self::NAME))?;
            produced.insert(m, root);
        }
        tracing::debug!(node = %node, parent = ?parent, "node moved");
        Ok(())
    }
}

composite!(MoveNode);
