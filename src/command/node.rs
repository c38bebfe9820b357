//! Node lifecycle primitives: create, load, clone, cloak.

use serde::{Deserialize, Serialize};

use super::{Command, CommandContext};
use crate::export;
use crate::graph::{CloneOutcome, SceneGraph};
use crate::model::{CloneMode, NodeDescriptor, NodeId, PropertyMap};
use crate::{Error, Result};

fn require_live(graph: &SceneGraph, id: NodeId) -> Result<()> {
    graph.node(id)?;
    if graph.is_live(id) { Ok(()) } else { Err(Error::NodeCloaked(id)) }
}

/// Visible index → raw index under `parent`.
pub(super) fn raw_index(graph: &SceneGraph, parent: Option<NodeId>, index: Option<usize>) -> Result<Option<usize>> {
    index.map(|i| graph.raw_index(parent, i)).transpose()
}

/// Dispose the node if it is only kept around, cloaked, for redo.
fn dispose_if_cloaked(graph: &mut SceneGraph, id: NodeId) -> Result<()> {
    if graph.get(id).is_some_and(|n| n.is_cloaked()) {
        graph.dispose(id)?;
    }
    Ok(())
}

// ============================================================================
// CreateNode
// ============================================================================

/// Create a node of a registered type, optionally under a parent at a
/// visible index, with initial values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNode {
    pub node_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub values: PropertyMap,
    /// Requested id; allocated when absent.
    #[serde(default)]
    pub id: Option<NodeId>,
    #[serde(skip)]
    created: Option<NodeId>,
}

impl CreateNode {
    pub const NAME: &'static str = "createNode";

    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            name: None,
            parent: None,
            index: None,
            values: PropertyMap::new(),
            id: None,
            created: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn under(mut self, parent: NodeId, index: Option<usize>) -> Self {
        self.parent = Some(parent);
        self.index = index;
        self
    }

    pub fn with_values(mut self, values: PropertyMap) -> Self {
        self.values = values;
        self
    }

    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    /// The created node, once applied.
    pub fn node(&self) -> Option<NodeId> {
        self.created
    }

    fn first_apply(&self, cx: &mut CommandContext<'_>) -> Result<NodeId> {
        if let Some(p) = self.parent {
            require_live(cx.graph, p)?;
        }
        let raw = raw_index(cx.graph, self.parent, self.index)?;
        let id = cx.graph.create_node(&self.node_type, self.name.as_deref(), self.id)?;

        let mut build = || -> Result<()> {
            if self.parent.is_some() {
                cx.graph.set_parent(id, self.parent, raw)?;
            }
            let change = cx.graph.models_mut().set_values(id, &self.values)?;
            cx.effects.deltas.extend(change.deltas);
            Ok(())
        };
        if let Err(e) = build() {
            cx.graph.dispose(id)?;
            return Err(e);
        }
        Ok(id)
    }
}

impl Command for CreateNode {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn apply(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        match self.created {
            Some(id) => cx.uncloak(id),
            None => {
                let id = self.first_apply(cx)?;
                self.created = Some(id);
                cx.created(id);
                cx.announce(id)?;
                cx.emit_children(self.parent)?;
                tracing::trace!(node = %id, type_name = %self.node_type, "create applied");
                Ok(())
            }
        }
    }

    fn undo(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        match self.created {
            Some(id) => cx.cloak(id),
            None => Ok(()),
        }
    }

    fn discard(&mut self, graph: &mut SceneGraph) -> Result<()> {
        match self.created.take() {
            Some(id) => dispose_if_cloaked(graph, id),
            None => Ok(()),
        }
    }

    fn has_run(&self) -> bool {
        self.created.is_some()
    }
}

// ============================================================================
// LoadNode
// ============================================================================

/// Register a node from a descriptor whose parent and cloner already exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadNode {
    pub descriptor: NodeDescriptor,
    #[serde(skip)]
    loaded: Option<bool>,
}

impl LoadNode {
    pub const NAME: &'static str = "loadNode";

    pub fn new(descriptor: NodeDescriptor) -> Self {
        Self { descriptor, loaded: None }
    }
}

impl Command for LoadNode {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn apply(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        let id = self.descriptor.id;
        match self.loaded {
            Some(true) => cx.uncloak(id),
            Some(false) => Ok(()),
            None => {
                let fresh = !cx.graph.contains(id);
                let loaded = export::import_node(cx.graph, &self.descriptor)?;
                self.loaded = Some(loaded);
                if loaded {
                    if fresh {
                        cx.created(id);
                    }
                    cx.touch(id);
                    cx.announce(id)?;
                    cx.emit_children(self.descriptor.parent)?;
                }
                Ok(())
            }
        }
    }

    fn undo(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        match self.loaded {
            Some(true) => cx.cloak(self.descriptor.id),
            _ => Ok(()),
        }
    }

    fn discard(&mut self, graph: &mut SceneGraph) -> Result<()> {
        match self.loaded.take() {
            Some(true) => dispose_if_cloaked(graph, self.descriptor.id),
            _ => Ok(()),
        }
    }

    fn has_run(&self) -> bool {
        self.loaded.is_some()
    }
}

// ============================================================================
// CloneNode
// ============================================================================

/// Deep-clone a subtree in a clone mode under a parent.
///
/// `depth` is 0 for a direct request (the clone becomes a Root) and 1 for
/// clones produced while fanning out a structural edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneNode {
    pub source: NodeId,
    pub mode: CloneMode,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub depth: usize,
    #[serde(skip)]
    outcome: Option<CloneOutcome>,
}

impl CloneNode {
    pub const NAME: &'static str = "cloneNode";

    pub fn new(source: NodeId, mode: CloneMode) -> Self {
        Self { source, mode, parent: None, index: None, depth: 0, outcome: None }
    }

    pub fn under(mut self, parent: NodeId, index: Option<usize>) -> Self {
        self.parent = Some(parent);
        self.index = index;
        self
    }

    pub fn at_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn outcome(&self) -> Option<&CloneOutcome> {
        self.outcome.as_ref()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.outcome.as_ref().map(|o| o.root)
    }
}

impl Command for CloneNode {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn apply(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        if let Some(outcome) = &self.outcome {
            for id in &outcome.produced {
                cx.uncloak(*id)?;
            }
            return Ok(());
        }

        require_live(cx.graph, self.source)?;
        if let Some(p) = self.parent {
            require_live(cx.graph, p)?;
        }
        let raw = raw_index(cx.graph, self.parent, self.index)?;
        let outcome = cx.graph.clone_node(self.source, self.mode, self.depth, self.parent, raw)?;

        let mut cloners: Vec<NodeId> = Vec::new();
        for id in &outcome.produced {
            cx.created(*id);
            cx.announce(*id)?;
            if let Some(c) = cx.graph.node(*id)?.cloner() {
                if !outcome.produced.contains(&c) && !cloners.contains(&c) {
                    cloners.push(c);
                }
            }
        }
        for c in cloners {
            cx.emit_clone_info(c)?;
        }
        cx.emit_children(self.parent)?;
        tracing::trace!(source = %self.source, root = %outcome.root, mode = %self.mode, "clone applied");
        self.outcome = Some(outcome);
        Ok(())
    }

    /// Cloak every produced node, last created first.
    fn undo(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        if let Some(outcome) = &self.outcome {
            for id in outcome.produced.iter().rev() {
                cx.cloak(*id)?;
            }
        }
        Ok(())
    }

    fn discard(&mut self, graph: &mut SceneGraph) -> Result<()> {
        match self.outcome.take() {
            Some(outcome) => dispose_if_cloaked(graph, outcome.root),
            None => Ok(()),
        }
    }

    fn has_run(&self) -> bool {
        self.outcome.is_some()
    }
}

// ============================================================================
// CloakNode
// ============================================================================

/// Soft-delete a single node (and with it, its subtree's visibility).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloakNode {
    pub node: NodeId,
    #[serde(skip)]
    done: bool,
}

impl CloakNode {
    pub const NAME: &'static str = "cloakNode";

    pub fn new(node: NodeId) -> Self {
        Self { node, done: false }
    }
}

impl Command for CloakNode {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn apply(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        cx.cloak(self.node)?;
        self.done = true;
        Ok(())
    }

    fn undo(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        if self.done {
            cx.uncloak(self.node)?;
        }
        Ok(())
    }

    fn has_run(&self) -> bool {
        self.done
    }
}
