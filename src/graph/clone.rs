//! Clone, unlink and dispose.
//!
//! These are the only operations that create or sever clone relationships;
//! both sides of every link (`cloner` and the cloner's `cloned` list, model
//! child and model parent) are written together.

use hashbrown::HashSet;

use super::SceneGraph;
use crate::model::{CloneInfo, CloneMode, NodeId};
use crate::properties::{ModelChange, ModelSnapshot};
use crate::{Error, Result};

/// Nodes produced by one clone operation.
#[derive(Debug, Clone, PartialEq)]
pub struct CloneOutcome {
    pub root: NodeId,
    /// Every produced node in creation order, `root` first.
    pub produced: Vec<NodeId>,
}

/// Everything needed to reverse an unlink exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct UnlinkRecord {
    pub node: NodeId,
    pub info: CloneInfo,
    /// Position the node held in its cloner's `cloned` list.
    pub cloner_index: Option<usize>,
    pub model: ModelSnapshot,
}

impl SceneGraph {
    /// Deep-copy `source` as a clone in `mode`, attached under `parent`
    /// (`None` = top level) at raw `index`.
    ///
    /// `depth` is the clone depth of `source` itself: 0 for a direct user
    /// request (Reference and Variant promote to their Root modes), 1 or more
    /// for clones made while fanning out a structural edit.
    pub fn clone_node(
        &mut self,
        source: NodeId,
        mode: CloneMode,
        depth: usize,
        parent: Option<NodeId>,
        index: Option<usize>,
    ) -> Result<CloneOutcome> {
        if mode == CloneMode::Original {
            return Err(Error::InvalidParams("cannot clone as Original".into()));
        }
        if self.node(source)?.cloaked {
            return Err(Error::NodeCloaked(source));
        }
        if let Some(p) = parent {
            self.node(p)?;
            if mode != CloneMode::Duplicate && self.contains_clone_relative(p, source)? {
                return Err(Error::TreeCycle { child: source, parent: p });
            }
        }

        let mut produced = Vec::new();
        let root = self.clone_recursive(source, mode, depth, &mut produced)?;
        if mode == CloneMode::Duplicate {
            for id in &produced {
                self.sever_cloner(*id)?;
            }
        }

        if parent.is_some() {
            self.set_parent(root, parent, index)?;
        } else if let Some(i) = index {
            self.move_within(root, i)?;
        }

        tracing::debug!(%source, %root, %mode, count = produced.len(), "cloned subtree");
        Ok(CloneOutcome { root, produced })
    }

    fn clone_recursive(
        &mut self,
        source: NodeId,
        mode: CloneMode,
        depth: usize,
        produced: &mut Vec<NodeId>,
    ) -> Result<NodeId> {
        let src = self.node(source)?;
        let node_type = src.node_type.clone();
        let name = src.name.clone();
        let custom = src.custom.clone();
        let children: Vec<NodeId> = src
            .children
            .iter()
            .copied()
            .filter(|c| self.get(*c).is_some_and(|n| !n.cloaked))
            .collect();

        let id = self.create_node(&node_type, Some(&name), None)?;
        produced.push(id);
        let node_mode = mode.at_depth(depth);
        {
            let node = self.node_mut(id)?;
            node.clone_info = CloneInfo::cloned_from(source, node_mode);
            node.custom = custom;
        }
        self.node_mut(source)?.clone_info.add_cloned(id);

        match node_mode {
            CloneMode::Original | CloneMode::Duplicate => {
                let values = self.models.effective_values(source)?;
                let schema = self.factory.schema(&node_type)?;
                for (key, value) in values {
                    if value != schema.default_value(&key) {
                        self.models.set_own(id, &key, Some(value))?;
                    }
                }
            }
            CloneMode::ReferenceRoot => self.models.link(id, source, true)?,
            CloneMode::Reference | CloneMode::Variant | CloneMode::VariantRoot => {
                self.models.link(id, source, false)?
            }
        }

        for child in children {
            let c = self.clone_recursive(child, mode, depth + 1, produced)?;
            self.set_parent(c, Some(id), None)?;
        }
        Ok(id)
    }

    /// Drop the cloner link on both sides without touching mode or model.
    fn sever_cloner(&mut self, id: NodeId) -> Result<Option<usize>> {
        let Some(cloner) = self.node_mut(id)?.clone_info.cloner.take() else {
            return Ok(None);
        };
        Ok(self.node_mut(cloner)?.clone_info.remove_cloned(id))
    }

    /// Turn a clone back into an Original.
    ///
    /// Variants and Roots flatten their model first; plain References copy
    /// every effective value so they keep exactly what they showed.
    pub fn unlink(&mut self, id: NodeId) -> Result<(UnlinkRecord, ModelChange)> {
        let info = self.node(id)?.clone_info.clone();
        let model = self.models.snapshot(id)?;

        let change = match info.mode {
            CloneMode::Original | CloneMode::Duplicate => ModelChange::default(),
            CloneMode::Reference => self.models.detach_copy(id)?,
            CloneMode::ReferenceRoot | CloneMode::Variant | CloneMode::VariantRoot => {
                self.models.flatten(id)?
            }
        };
        self.models.set_reference_flag(id, false)?;

        let cloner_index = self.sever_cloner(id)?;
        self.node_mut(id)?.clone_info.mode = CloneMode::Original;

        tracing::debug!(node = %id, mode = %info.mode, "unlinked");
        Ok((UnlinkRecord { node: id, info, cloner_index, model }, change))
    }

    /// Reverse an [`unlink`](Self::unlink).
    pub fn relink(&mut self, record: &UnlinkRecord) -> Result<ModelChange> {
        let id = record.node;
        if let Some(cloner) = record.info.cloner {
            let index = record.cloner_index.unwrap_or(usize::MAX);
            self.node_mut(cloner)?.clone_info.insert_cloned(index, id);
        }
        {
            let node = self.node_mut(id)?;
            node.clone_info.mode = record.info.mode;
            node.clone_info.cloner = record.info.cloner;
        }
        self.models.restore(&record.model)
    }

    /// Replace a node's mode and cloner, keeping both sides of the clone
    /// link and the model link consistent. Returns the previous info.
    pub fn rewire_clone(&mut self, id: NodeId, mode: CloneMode, cloner: Option<NodeId>) -> Result<CloneInfo> {
        if let Some(c) = cloner {
            self.node(c)?;
            if c == id {
                return Err(Error::BrokenCloneChain { node: id });
            }
        }
        let previous = self.node(id)?.clone_info.clone();
        self.sever_cloner(id)?;
        self.models.detach(id);
        self.models.set_reference_flag(id, false)?;

        {
            let node = self.node_mut(id)?;
            node.clone_info.mode = mode;
            node.clone_info.cloner = cloner;
        }
        if let Some(c) = cloner {
            self.node_mut(c)?.clone_info.add_cloned(id);
            if mode.inherits_model() {
                self.models.link(id, c, mode == CloneMode::ReferenceRoot)?;
            }
        }
        Ok(previous)
    }

    /// Remove a subtree from the registry for good.
    ///
    /// Clones outside the subtree that depend on a disposed node are
    /// unlinked (keeping their effective values) before anything is dropped.
    /// Returns the disposed ids.
    pub fn dispose(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        let subtree = self.subtree(id)?;
        let members: HashSet<NodeId> = subtree.iter().copied().collect();

        for n in &subtree {
            let cloned = self.node(*n)?.clone_info.cloned.to_vec();
            for c in cloned {
                if !members.contains(&c) {
                    self.unlink(c)?;
                }
            }
        }
        for n in subtree.iter().rev() {
            if let Some(cloner) = self.node(*n)?.clone_info.cloner {
                if !members.contains(&cloner) {
                    self.sever_cloner(*n)?;
                }
            }
        }

        self.detach(id)?;
        for n in &subtree {
            self.models.remove(*n);
            self.nodes.remove(n);
        }
        tracing::debug!(node = %id, count = subtree.len(), "disposed subtree");
        Ok(subtree)
    }
}
