//! # Commands
//!
//! Every mutation of a session goes through a [`Command`]: one reversible
//! unit of change that captures, on its first `apply`, whatever it needs to
//! undo itself exactly.
//!
//! ## Families
//!
//! | Kind | Commands |
//! |------|----------|
//! | Nodes | [`CreateNode`], [`LoadNode`], [`CloneNode`], [`CloakNode`] |
//! | Tree | [`SetParent`], [`ReorderChildren`] |
//! | Models | [`ModifyModel`], [`ResetModel`], [`UnlinkNode`], [`UpdateCloneInfo`], [`CustomPropertyCommand`] |
//! | Structure (fan-out) | [`AddChild`], [`RemoveNode`], [`MoveNode`] |
//!
//! Commands never talk to the datastore directly. They queue
//! [`DatastoreOp`]s on the [`CommandContext`], and the session flushes the
//! queue only after the whole command succeeded. A graph-only context
//! (remote folding, rollback) drops the queue instead.
//!
//! ## Contract
//!
//! - `apply` either succeeds or leaves the graph as it found it.
//! - `undo` relies only on the command's own cache.
//! - `redo` defaults to `apply`, which reuses the cache when present so
//!   node ids survive any number of undo/redo cycles.

mod model;
mod node;
mod structure;
mod tree;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datastore::DatastoreOp;
use crate::export;
use crate::graph::SceneGraph;
use crate::model::{CloneInfoDescriptor, CustomProperties, ModelPatch, NodeId, PropertyMap};
use crate::properties::{ModelChange, ModelDelta};
use crate::{Error, Result};

pub use model::{CustomPropertyCommand, CustomPropertyOp, ModifyModel, ResetModel, UnlinkNode, UpdateCloneInfo};
pub use node::{CloakNode, CloneNode, CreateNode, LoadNode};
pub use structure::{AddChild, ChildSpec, MoveNode, RemoveNode};
pub use tree::{ReorderChildren, SetParent};

// ============================================================================
// Command trait
// ============================================================================

pub trait Command: fmt::Debug + Send {
    /// Stable name used in the command log.
    fn name(&self) -> &'static str;

    /// Immutable parameters, sufficient to rebuild the command for replay.
    fn params(&self) -> Result<serde_json::Value>;

    fn apply(&mut self, cx: &mut CommandContext<'_>) -> Result<()>;

    fn undo(&mut self, cx: &mut CommandContext<'_>) -> Result<()>;

    fn redo(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        self.apply(cx)
    }

    /// Called when the command falls off the redo end of the history. Nodes
    /// that only exist cloaked because of this command may be disposed.
    fn discard(&mut self, _graph: &mut SceneGraph) -> Result<()> {
        Ok(())
    }

    fn has_run(&self) -> bool;
}

// ============================================================================
// Effects
// ============================================================================

/// Everything a command run produced besides the graph mutation itself.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Effects {
    /// Datastore outbox, in issue order.
    pub ops: Vec<DatastoreOp>,
    pub deltas: Vec<ModelDelta>,
    /// Nodes whose view may need creating, updating or hiding.
    pub touched: Vec<NodeId>,
    /// Nodes created by this run, in creation order.
    pub created: Vec<NodeId>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.deltas.is_empty() && self.touched.is_empty() && self.created.is_empty()
    }
}

// ============================================================================
// CommandContext
// ============================================================================

/// Mutable access to the graph plus the effect collector for one run.
pub struct CommandContext<'a> {
    pub graph: &'a mut SceneGraph,
    effects: Effects,
    graph_only: bool,
}

impl<'a> CommandContext<'a> {
    pub fn new(graph: &'a mut SceneGraph) -> Self {
        Self { graph, effects: Effects::default(), graph_only: false }
    }

    /// A context whose datastore operations are dropped.
    pub fn graph_only(graph: &'a mut SceneGraph) -> Self {
        Self { graph, effects: Effects::default(), graph_only: true }
    }

    pub fn is_graph_only(&self) -> bool {
        self.graph_only
    }

    pub fn effects(&self) -> &Effects {
        &self.effects
    }

    pub fn into_effects(self) -> Effects {
        self.effects
    }

    pub fn emit(&mut self, op: DatastoreOp) {
        if !self.graph_only {
            self.effects.ops.push(op);
        }
    }

    pub fn touch(&mut self, id: NodeId) {
        self.effects.touched.push(id);
    }

    pub(crate) fn created(&mut self, id: NodeId) {
        self.effects.created.push(id);
        self.touch(id);
    }

    /// Queue a create carrying the node's current descriptor.
    pub fn announce(&mut self, id: NodeId) -> Result<()> {
        if !self.graph_only {
            let descriptor = export::describe(self.graph, id)?;
            self.emit(DatastoreOp::CreateNode { descriptor });
        }
        Ok(())
    }

    /// Queue the live child order of `parent` (nothing for the top level).
    pub fn emit_children(&mut self, parent: Option<NodeId>) -> Result<()> {
        if let Some(p) = parent {
            let children = self.graph.children(p)?;
            self.emit(DatastoreOp::SetNodeChildren { id: p, children });
        }
        Ok(())
    }

    pub fn emit_clone_info(&mut self, id: NodeId) -> Result<()> {
        let mut info = CloneInfoDescriptor::from(&self.graph.node(id)?.clone_info);
        info.cloned.retain(|c| self.graph.is_live(*c));
        self.emit(DatastoreOp::UpdateCloneInfo { id, info });
        Ok(())
    }

    /// Fold a model change into the run: keep its deltas and queue one
    /// sparse patch per written model.
    pub fn record_change(&mut self, change: ModelChange) {
        let mut patches: BTreeMap<NodeId, ModelPatch> = BTreeMap::new();
        for w in &change.writes {
            patches.entry(w.model).or_default().insert(w.key.clone(), w.after.clone());
        }
        for (id, patch) in patches {
            self.emit(DatastoreOp::ModifyNodeModel { id, patch });
        }
        for d in &change.deltas {
            self.touch(d.model);
        }
        self.effects.deltas.extend(change.deltas);
    }

    /// Queue a patch turning `before` into the node's current own values.
    pub fn emit_model_diff(&mut self, id: NodeId, before: &PropertyMap) -> Result<()> {
        let after = self
            .graph
            .models()
            .get(id)
            .ok_or(Error::NodeNotFound(id))?
            .own_values()
            .clone();
        let mut patch = ModelPatch::new();
        for (key, value) in &after {
            if before.get(key) != Some(value) {
                patch.insert(key.clone(), Some(value.clone()));
            }
        }
        for key in before.keys() {
            if !after.contains_key(key) {
                patch.insert(key.clone(), None);
            }
        }
        if !patch.is_empty() {
            self.emit(DatastoreOp::ModifyNodeModel { id, patch });
        }
        Ok(())
    }

    pub fn emit_custom_diff(&mut self, id: NodeId, before: &CustomProperties, after: &CustomProperties) {
        for (name, value) in &after.defined {
            if before.defined.get(name) != Some(value) {
                self.emit(DatastoreOp::SetCustomProperty { id, name: name.clone(), default: value.clone() });
            }
        }
        for name in before.defined.keys().filter(|n| !after.defined.contains_key(*n)) {
            self.emit(DatastoreOp::RemoveCustomProperty { id, name: name.clone() });
        }
        for (name, value) in &after.assigned {
            if before.assigned.get(name) != Some(value) {
                self.emit(DatastoreOp::AssignCustomProperty { id, name: name.clone(), value: value.clone() });
            }
        }
        for name in before.assigned.keys().filter(|n| !after.assigned.contains_key(*n)) {
            self.emit(DatastoreOp::UnassignCustomProperty { id, name: name.clone() });
        }
    }

    /// Cloak `id` and retire every node that stops being live with it.
    pub fn cloak(&mut self, id: NodeId) -> Result<()> {
        let retiring: Vec<NodeId> = self
            .graph
            .subtree(id)?
            .into_iter()
            .filter(|n| self.graph.is_live(*n))
            .collect();
        let parent = self.graph.parent(id)?;
        self.graph.cloak(id)?;
        for n in retiring.iter().rev() {
            self.emit(DatastoreOp::RemoveNode { id: *n });
            self.touch(*n);
        }
        self.emit_children(parent)
    }

    /// Uncloak `id` and re-announce every node that becomes live with it.
    pub fn uncloak(&mut self, id: NodeId) -> Result<()> {
        self.graph.uncloak(id)?;
        let returning: Vec<NodeId> = self
            .graph
            .subtree(id)?
            .into_iter()
            .filter(|n| self.graph.is_live(*n))
            .collect();
        for n in returning {
            self.announce(n)?;
            self.touch(n);
        }
        let parent = self.graph.parent(id)?;
        self.emit_children(parent)
    }
}

// ============================================================================
// Sub-command bookkeeping
// ============================================================================

/// Executed sub-commands of a composite, in apply order.
#[derive(Debug, Default)]
pub(crate) struct Steps {
    done: Vec<Box<dyn Command>>,
    planned: bool,
}

impl Steps {
    pub fn is_planned(&self) -> bool {
        self.planned
    }

    pub fn finish(&mut self) {
        self.planned = true;
    }

    /// Apply `cmd`, keep it, and hand back whatever `extract` reads from it.
    pub fn run<C, T>(&mut self, cx: &mut CommandContext<'_>, mut cmd: C, extract: impl FnOnce(&C) -> T) -> Result<T>
    where
        C: Command + 'static,
    {
        cmd.apply(cx)?;
        let out = extract(&cmd);
        self.done.push(Box::new(cmd));
        Ok(out)
    }

    /// Undo everything applied so far after a failed plan and drop the
    /// nodes that only existed because of it.
    pub fn rollback(&mut self, cx: &mut CommandContext<'_>) {
        for cmd in self.done.iter_mut().rev() {
            if let Err(e) = cmd.undo(cx) {
                tracing::warn!(command = cmd.name(), error = %e, "rollback step failed");
            }
        }
        for cmd in self.done.iter_mut().rev() {
            if let Err(e) = cmd.discard(cx.graph) {
                tracing::warn!(command = cmd.name(), error = %e, "discard after rollback failed");
            }
        }
        self.done.clear();
    }

    pub fn undo_all(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        for cmd in self.done.iter_mut().rev() {
            cmd.undo(cx)?;
        }
        Ok(())
    }

    pub fn redo_all(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        for cmd in self.done.iter_mut() {
            cmd.redo(cx)?;
        }
        Ok(())
    }

    pub fn discard_all(&mut self, graph: &mut SceneGraph) -> Result<()> {
        for cmd in self.done.iter_mut().rev() {
            cmd.discard(graph)?;
        }
        Ok(())
    }
}

// ============================================================================
// Command log records
// ============================================================================

/// Serialized form of an applied command: `{ name, params }` plus when it
/// ran and whether it started an undo group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub name: String,
    pub params: serde_json::Value,
    pub at: DateTime<Utc>,
    #[serde(default = "default_undo_root")]
    pub undo_root: bool,
}

fn default_undo_root() -> bool {
    true
}

impl CommandRecord {
    pub fn of(command: &dyn Command, undo_root: bool, at: DateTime<Utc>) -> Result<Self> {
        Ok(Self { name: command.name().to_string(), params: command.params()?, at, undo_root })
    }
}

/// Rebuild a fresh, not-yet-applied command from its record.
pub fn from_record(record: &CommandRecord) -> Result<Box<dyn Command>> {
    fn parse<C>(params: &serde_json::Value) -> Result<Box<dyn Command>>
    where
        C: Command + serde::de::DeserializeOwned + 'static,
    {
        let cmd: C = serde_json::from_value(params.clone())
            .map_err(|e| Error::InvalidParams(e.to_string()))?;
        Ok(Box::new(cmd))
    }

    let params = &record.params;
    match record.name.as_str() {
        CreateNode::NAME => parse::<CreateNode>(params),
        LoadNode::NAME => parse::<LoadNode>(params),
        CloneNode::NAME => parse::<CloneNode>(params),
        CloakNode::NAME => parse::<CloakNode>(params),
        SetParent::NAME => parse::<SetParent>(params),
        ReorderChildren::NAME => parse::<ReorderChildren>(params),
        ModifyModel::NAME => parse::<ModifyModel>(params),
        ResetModel::NAME => parse::<ResetModel>(params),
        UnlinkNode::NAME => parse::<UnlinkNode>(params),
        UpdateCloneInfo::NAME => parse::<UpdateCloneInfo>(params),
        CustomPropertyCommand::NAME => parse::<CustomPropertyCommand>(params),
        AddChild::NAME => parse::<AddChild>(params),
        RemoveNode::NAME => parse::<RemoveNode>(params),
        MoveNode::NAME => parse::<MoveNode>(params),
        other => Err(Error::UnknownCommand(other.to_string())),
    }
}
