//! Model and clone-link primitives.

use serde::{Deserialize, Serialize};

use super::{Command, CommandContext};
use crate::graph::UnlinkRecord;
use crate::ledger;
use crate::model::{CloneInfo, CloneMode, CustomProperties, ModelPatch, NodeId, PropertyMap, Value};
use crate::properties::{ModelChange, ModelDelta, ModelSnapshot, ModelWrite};
use crate::{Error, Result};

// ============================================================================
// ModifyModel
// ============================================================================

/// Write or clear property values on a node.
///
/// Each key is routed through [`ledger::clone_target_for_key`] unless `raw`
/// is set, so an edit made on a Reference lands on its source. `None`
/// clears an override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyModel {
    pub node: NodeId,
    pub patch: ModelPatch,
    #[serde(default)]
    pub raw: bool,
    #[serde(skip)]
    writes: Option<Vec<ModelWrite>>,
}

impl ModifyModel {
    pub const NAME: &'static str = "modifyModel";

    pub fn new(node: NodeId, patch: ModelPatch) -> Self {
        Self { node, patch, raw: false, writes: None }
    }

    pub fn set(node: NodeId, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut patch = ModelPatch::new();
        patch.insert(key.into(), Some(value.into()));
        Self::new(node, patch)
    }

    pub fn clear(node: NodeId, key: impl Into<String>) -> Self {
        let mut patch = ModelPatch::new();
        patch.insert(key.into(), None);
        Self::new(node, patch)
    }

    /// Bypass target routing and constraints.
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    fn write_all(&self, cx: &mut CommandContext<'_>, change: &mut ModelChange) -> Result<()> {
        for (key, value) in &self.patch {
            let target = if self.raw {
                self.node
            } else {
                ledger::clone_target_for_key(cx.graph, self.node, key)?
            };
            let models = cx.graph.models_mut();
            let step = match (value, self.raw) {
                (Some(v), false) => models.set_value(target, key, v.clone())?,
                (Some(v), true) => models.set_own(target, key, Some(v.clone()))?,
                (None, _) => models.clear_value(target, key)?,
            };
            change.merge(step);
        }
        Ok(())
    }
}

impl Command for ModifyModel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn apply(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        if let Some(writes) = &self.writes {
            let change = cx.graph.models_mut().replay(writes)?;
            cx.record_change(change);
            return Ok(());
        }

        cx.graph.node(self.node)?;
        let mut change = ModelChange::default();
        if let Err(e) = self.write_all(cx, &mut change) {
            cx.graph.models_mut().revert(&change.writes)?;
            return Err(e);
        }
        tracing::trace!(node = %self.node, writes = change.writes.len(), "model modified");
        self.writes = Some(change.writes.clone());
        cx.record_change(change);
        Ok(())
    }

    fn undo(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        if let Some(writes) = &self.writes {
            let change = cx.graph.models_mut().revert(writes)?;
            cx.record_change(change);
        }
        Ok(())
    }

    fn has_run(&self) -> bool {
        self.writes.is_some()
    }
}

// ============================================================================
// ResetModel
// ============================================================================

/// Clear every schema key from a node's own values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetModel {
    pub node: NodeId,
    #[serde(skip)]
    writes: Option<Vec<ModelWrite>>,
}

impl ResetModel {
    pub const NAME: &'static str = "resetModel";

    pub fn new(node: NodeId) -> Self {
        Self { node, writes: None }
    }
}

impl Command for ResetModel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn apply(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        let change = match &self.writes {
            Some(writes) => cx.graph.models_mut().replay(writes)?,
            None => cx.graph.models_mut().reset(self.node)?,
        };
        if self.writes.is_none() {
            self.writes = Some(change.writes.clone());
        }
        cx.record_change(change);
        Ok(())
    }

    fn undo(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        if let Some(writes) = &self.writes {
            let change = cx.graph.models_mut().revert(writes)?;
            cx.record_change(change);
        }
        Ok(())
    }

    fn has_run(&self) -> bool {
        self.writes.is_some()
    }
}

// ============================================================================
// UnlinkNode
// ============================================================================

/// Turn a clone into an Original. With `deep`, every clone in the node's
/// live subtree is unlinked too.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlinkNode {
    pub node: NodeId,
    #[serde(default)]
    pub deep: bool,
    #[serde(skip)]
    records: Option<Vec<UnlinkRecord>>,
}

impl UnlinkNode {
    pub const NAME: &'static str = "unlinkNode";

    pub fn new(node: NodeId) -> Self {
        Self { node, deep: false, records: None }
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    fn targets(&self, cx: &CommandContext<'_>) -> Result<Vec<NodeId>> {
        if !self.deep {
            cx.graph.node(self.node)?;
            return Ok(vec![self.node]);
        }
        Ok(cx
            .graph
            .subtree(self.node)?
            .into_iter()
            .filter(|n| cx.graph.is_live(*n))
            .filter(|n| cx.graph.get(*n).is_some_and(|node| !node.clone_info.is_original()))
            .collect())
    }

    fn mirror(cx: &mut CommandContext<'_>, id: NodeId, cloner: Option<NodeId>) -> Result<()> {
        cx.emit_clone_info(id)?;
        if let Some(c) = cloner {
            cx.emit_clone_info(c)?;
        }
        cx.touch(id);
        Ok(())
    }
}

impl Command for UnlinkNode {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn apply(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        let targets = self.targets(cx)?;
        let mut records = Vec::with_capacity(targets.len());
        for id in targets {
            match cx.graph.unlink(id) {
                Ok((record, change)) => {
                    cx.record_change(change);
                    Self::mirror(cx, id, record.info.cloner)?;
                    records.push(record);
                }
                Err(e) => {
                    for record in records.iter().rev() {
                        cx.graph.relink(record)?;
                    }
                    return Err(e);
                }
            }
        }
        tracing::debug!(node = %self.node, count = records.len(), "unlink applied");
        self.records = Some(records);
        Ok(())
    }

    fn undo(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        let Some(records) = &self.records else { return Ok(()) };
        for record in records.iter().rev() {
            let before = own_values(cx, record.node)?;
            let change = cx.graph.relink(record)?;
            cx.record_change(change);
            cx.emit_model_diff(record.node, &before)?;
            Self::mirror(cx, record.node, record.info.cloner)?;
        }
        Ok(())
    }

    fn has_run(&self) -> bool {
        self.records.is_some()
    }
}

fn own_values(cx: &CommandContext<'_>, id: NodeId) -> Result<PropertyMap> {
    Ok(cx
        .graph
        .models()
        .get(id)
        .ok_or(Error::NodeNotFound(id))?
        .own_values()
        .clone())
}

/// Key-less notification for a model and everything inheriting from it.
fn modified(cx: &mut CommandContext<'_>, id: NodeId) {
    let mut change = ModelChange::default();
    change.deltas.push(ModelDelta { model: id, key: None, old: None, new: None });
    for d in cx.graph.models().descendants(id) {
        change.deltas.push(ModelDelta { model: d, key: None, old: None, new: None });
    }
    cx.record_change(change);
}

// ============================================================================
// UpdateCloneInfo
// ============================================================================

/// Re-point a node's clone mode and cloner, keeping both sides of the clone
/// link and the model link consistent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCloneInfo {
    pub node: NodeId,
    pub mode: CloneMode,
    #[serde(default)]
    pub cloner: Option<NodeId>,
    #[serde(skip)]
    cache: Option<CloneInfoCache>,
}

#[derive(Debug, Clone)]
struct CloneInfoCache {
    previous: CloneInfo,
    /// Position in the previous cloner's `cloned` list.
    cloned_index: Option<usize>,
    model: ModelSnapshot,
}

impl UpdateCloneInfo {
    pub const NAME: &'static str = "updateCloneInfo";

    pub fn new(node: NodeId, mode: CloneMode, cloner: Option<NodeId>) -> Self {
        Self { node, mode, cloner, cache: None }
    }

    fn validate(&self, cx: &CommandContext<'_>) -> Result<()> {
        cx.graph.node(self.node)?;
        match (self.mode, self.cloner) {
            (mode, None) if mode.inherits_model() => {
                return Err(Error::BrokenCloneChain { node: self.node });
            }
            (CloneMode::Original | CloneMode::Duplicate, Some(_)) => {
                return Err(Error::InvalidParams(format!("{} takes no cloner", self.mode)));
            }
            _ => {}
        }
        if let Some(c) = self.cloner {
            if c == self.node || ledger::clone_ancestors(cx.graph, c)?.contains(&self.node) {
                return Err(Error::BrokenCloneChain { node: self.node });
            }
        }
        Ok(())
    }
}

impl Command for UpdateCloneInfo {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn apply(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        if self.cache.is_none() {
            self.validate(cx)?;
            let node = cx.graph.node(self.node)?;
            let previous = node.clone_info.clone();
            let cloned_index = match previous.cloner {
                Some(c) => cx.graph.node(c)?.clone_info.cloned.iter().position(|x| *x == self.node),
                None => None,
            };
            let model = cx.graph.models().snapshot(self.node)?;
            self.cache = Some(CloneInfoCache { previous, cloned_index, model });
        }

        let previous = cx.graph.rewire_clone(self.node, self.mode, self.cloner)?;
        modified(cx, self.node);
        cx.emit_clone_info(self.node)?;
        for c in [previous.cloner, self.cloner].into_iter().flatten() {
            cx.emit_clone_info(c)?;
        }
        Ok(())
    }

    fn undo(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        let Some(cache) = &self.cache else { return Ok(()) };
        let before = own_values(cx, self.node)?;
        cx.graph.rewire_clone(self.node, cache.previous.mode, cache.previous.cloner)?;
        if let (Some(c), Some(index)) = (cache.previous.cloner, cache.cloned_index) {
            let info = &mut cx.graph.node_mut(c)?.clone_info;
            info.remove_cloned(self.node);
            info.insert_cloned(index, self.node);
        }
        let change = cx.graph.models_mut().restore(&cache.model)?;
        cx.record_change(change);
        cx.emit_model_diff(self.node, &before)?;
        modified(cx, self.node);

        cx.emit_clone_info(self.node)?;
        for c in [cache.previous.cloner, self.cloner].into_iter().flatten() {
            cx.emit_clone_info(c)?;
        }
        Ok(())
    }

    fn has_run(&self) -> bool {
        self.cache.is_some()
    }
}

// ============================================================================
// CustomPropertyCommand
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum CustomPropertyOp {
    Define { name: String, default: Value },
    /// Drops the definition and any assignment.
    Remove { name: String },
    Assign { name: String, value: Value },
    Unassign { name: String },
}

/// Edit a node's user-defined properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPropertyCommand {
    pub node: NodeId,
    pub op: CustomPropertyOp,
    #[serde(skip)]
    previous: Option<CustomProperties>,
}

impl CustomPropertyCommand {
    pub const NAME: &'static str = "customProperty";

    pub fn new(node: NodeId, op: CustomPropertyOp) -> Self {
        Self { node, op, previous: None }
    }
}

impl Command for CustomPropertyCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn apply(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        let before = cx.graph.custom_properties(self.node)?.clone();
        let mut after = before.clone();
        match &self.op {
            CustomPropertyOp::Define { name, default } => {
                after.defined.insert(name.clone(), default.clone());
            }
            CustomPropertyOp::Remove { name } => {
                after.defined.remove(name);
                after.assigned.remove(name);
            }
            CustomPropertyOp::Assign { name, value } => {
                if !after.defined.contains_key(name) {
                    return Err(Error::InvalidParams(format!("custom property {name} is not defined")));
                }
                after.assigned.insert(name.clone(), value.clone());
            }
            CustomPropertyOp::Unassign { name } => {
                after.assigned.remove(name);
            }
        }
        *cx.graph.custom_properties_mut(self.node)? = after.clone();
        cx.emit_custom_diff(self.node, &before, &after);
        cx.touch(self.node);
        self.previous = Some(before);
        Ok(())
    }

    fn undo(&mut self, cx: &mut CommandContext<'_>) -> Result<()> {
        let Some(previous) = &self.previous else { return Ok(()) };
        let current = cx.graph.custom_properties(self.node)?.clone();
        *cx.graph.custom_properties_mut(self.node)? = previous.clone();
        cx.emit_custom_diff(self.node, &current, previous);
        cx.touch(self.node);
        Ok(())
    }

    fn has_run(&self) -> bool {
        self.previous.is_some()
    }
}
