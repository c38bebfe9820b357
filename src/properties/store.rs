//! Per-node property models and the store that links them.
//!
//! A model holds a sparse map of own values. Unset keys resolve through the
//! model-parent link (distinct from the node tree), then fall back to the
//! schema default. Model-parent links form a forest.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use super::{Constraint, PropertySchema};
use crate::model::{NodeId, PropertyMap, Value};
use crate::{Error, Result};

// ============================================================================
// PropertyModel
// ============================================================================

#[derive(Debug, Clone)]
pub struct PropertyModel {
    id: NodeId,
    schema: Arc<PropertySchema>,
    own: PropertyMap,
    parent: Option<NodeId>,
    children: SmallVec<[NodeId; 4]>,
    is_reference: bool,
}

impl PropertyModel {
    pub fn new(id: NodeId, schema: Arc<PropertySchema>) -> Self {
        Self {
            id,
            schema,
            own: PropertyMap::new(),
            parent: None,
            children: SmallVec::new(),
            is_reference: false,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn schema(&self) -> &Arc<PropertySchema> {
        &self.schema
    }

    pub fn own_values(&self) -> &PropertyMap {
        &self.own
    }

    pub fn own(&self, key: &str) -> Option<&Value> {
        self.own.get(key)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_reference(&self) -> bool {
        self.is_reference
    }
}

// ============================================================================
// Change records
// ============================================================================

/// A change notification: `key == None` is a key-less "modified" event.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDelta {
    pub model: NodeId,
    pub key: Option<String>,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

impl ModelDelta {
    fn keyed(model: NodeId, key: &str, old: Value, new: Value) -> Self {
        Self { model, key: Some(key.to_string()), old: Some(old), new: Some(new) }
    }

    fn modified(model: NodeId) -> Self {
        Self { model, key: None, old: None, new: None }
    }
}

/// One raw own-value write; `None` means the key was absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelWrite {
    pub model: NodeId,
    pub key: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelChange {
    /// Whether any own-value map or link changed.
    pub changed: bool,
    pub deltas: Vec<ModelDelta>,
    pub writes: Vec<ModelWrite>,
}

impl ModelChange {
    pub fn merge(&mut self, other: ModelChange) {
        self.changed |= other.changed;
        self.deltas.extend(other.deltas);
        self.writes.extend(other.writes);
    }

    /// Models whose own values were written.
    pub fn touched_models(&self) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = Vec::new();
        for w in &self.writes {
            if !out.contains(&w.model) {
                out.push(w.model);
            }
        }
        out
    }
}

/// Full state of one model, captured before link-severing operations.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSnapshot {
    pub id: NodeId,
    pub own: PropertyMap,
    pub parent: Option<NodeId>,
    pub parent_index: usize,
    pub is_reference: bool,
}

// ============================================================================
// ModelStore
// ============================================================================

/// Arena of property models keyed by their node's id.
#[derive(Debug, Clone, Default)]
pub struct ModelStore {
    models: HashMap<NodeId, PropertyModel>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: NodeId, schema: Arc<PropertySchema>) {
        self.models.insert(id, PropertyModel::new(id, schema));
    }

    /// Drop a model, detaching it from its parent and orphaning its children.
    pub fn remove(&mut self, id: NodeId) -> Option<PropertyModel> {
        self.detach(id);
        let removed = self.models.remove(&id)?;
        for child in &removed.children {
            if let Some(c) = self.models.get_mut(child) {
                c.parent = None;
            }
        }
        Some(removed)
    }

    pub fn get(&self, id: NodeId) -> Option<&PropertyModel> {
        self.models.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.models.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    fn model(&self, id: NodeId) -> Result<&PropertyModel> {
        self.models.get(&id).ok_or(Error::NodeNotFound(id))
    }

    fn model_mut(&mut self, id: NodeId) -> Result<&mut PropertyModel> {
        self.models.get_mut(&id).ok_or(Error::NodeNotFound(id))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Effective value: own, else the model-parent's effective value, else
    /// the schema default.
    pub fn get_value(&self, id: NodeId, key: &str) -> Result<Value> {
        let start = self.model(id)?;
        let mut current = start;
        let mut visited: HashSet<NodeId> = HashSet::new();
        visited.insert(id);
        loop {
            if let Some(v) = current.own.get(key) {
                return Ok(v.clone());
            }
            match current.parent {
                Some(parent) => {
                    if !visited.insert(parent) {
                        return Err(Error::ModelCycle { child: current.id, parent });
                    }
                    current = self.model(parent)?;
                }
                None => return Ok(start.schema.default_value(key)),
            }
        }
    }

    /// Effective values for every schema key plus any undeclared own keys.
    pub fn effective_values(&self, id: NodeId) -> Result<PropertyMap> {
        let model = self.model(id)?;
        let mut out = PropertyMap::new();
        for key in model.schema.keys() {
            out.insert(key.clone(), self.get_value(id, key)?);
        }
        for (key, value) in &model.own {
            out.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Ok(out)
    }

    /// Nearest model-parent ancestor (exclusive) flagged `is_reference`.
    pub fn reference_ancestor(&self, id: NodeId) -> Result<Option<NodeId>> {
        let mut visited: HashSet<NodeId> = HashSet::new();
        visited.insert(id);
        let mut cursor = self.model(id)?.parent;
        while let Some(p) = cursor {
            if !visited.insert(p) {
                return Err(Error::ModelCycle { child: id, parent: p });
            }
            let m = self.model(p)?;
            if m.is_reference {
                return Ok(Some(p));
            }
            cursor = m.parent;
        }
        Ok(None)
    }

    /// All models linked beneath `id`, breadth first.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut visited: HashSet<NodeId> = HashSet::new();
        visited.insert(id);
        let mut queue: Vec<NodeId> = self
            .models
            .get(&id)
            .map(|m| m.children.to_vec())
            .unwrap_or_default();
        let mut i = 0;
        while i < queue.len() {
            let next = queue[i];
            i += 1;
            if !visited.insert(next) {
                continue;
            }
            out.push(next);
            if let Some(m) = self.models.get(&next) {
                queue.extend(m.children.iter().copied());
            }
        }
        out
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Write `value` under `key`, running constraints first.
    ///
    /// No-op when `value` equals the currently resolved value. The whole
    /// constraint chain adjusts the value before anything is stored. When a
    /// `Reference` constraint finds a reference-root ancestor the adjusted
    /// value lands there and the local override is cleared, so the write is
    /// seen through inheritance.
    pub fn set_value(&mut self, id: NodeId, key: &str, value: Value) -> Result<ModelChange> {
        let mut change = ModelChange::default();
        if self.get_value(id, key)? == value {
            return Ok(change);
        }

        let schema = Arc::clone(self.model(id)?.schema());
        let mut candidate = value;
        let mut redirect = None;
        for constraint in schema.constraints_for(key) {
            match constraint {
                Constraint::Reference => {
                    if redirect.is_none() {
                        redirect = self.reference_ancestor(id)?;
                    }
                }
                other => candidate = other.adjust(candidate, key, self.model(id)?),
            }
        }

        match redirect {
            Some(ancestor) => {
                tracing::trace!(model = %id, %ancestor, key, "reference constraint redirect");
                self.write_raw(ancestor, key, Some(candidate), &mut change)?;
                self.write_raw(id, key, None, &mut change)?;
            }
            None => self.write_raw(id, key, Some(candidate), &mut change)?,
        }
        Ok(change)
    }

    /// Write several keys, schema order first, then undeclared keys sorted.
    pub fn set_values(&mut self, id: NodeId, values: &PropertyMap) -> Result<ModelChange> {
        let schema = Arc::clone(self.model(id)?.schema());
        let mut change = ModelChange::default();
        for key in schema.keys() {
            if let Some(v) = values.get(key) {
                change.merge(self.set_value(id, key, v.clone())?);
            }
        }
        let mut extra: Vec<&String> = values.keys().filter(|k| !schema.contains(k)).collect();
        extra.sort();
        for key in extra {
            change.merge(self.set_value(id, key, values[key].clone())?);
        }
        Ok(change)
    }

    /// Remove an own override so the key resolves through inheritance again.
    pub fn clear_value(&mut self, id: NodeId, key: &str) -> Result<ModelChange> {
        let mut change = ModelChange::default();
        self.write_raw(id, key, None, &mut change)?;
        Ok(change)
    }

    /// Raw own-value write, bypassing constraints.
    pub fn set_own(&mut self, id: NodeId, key: &str, value: Option<Value>) -> Result<ModelChange> {
        let mut change = ModelChange::default();
        self.write_raw(id, key, value, &mut change)?;
        Ok(change)
    }

    /// Clear every schema key from own values. Emits one key-less
    /// notification for the model and each linked descendant.
    pub fn reset(&mut self, id: NodeId) -> Result<ModelChange> {
        let model = self.model_mut(id)?;
        let keys: Vec<String> = model
            .schema
            .keys()
            .iter()
            .filter(|k| model.own.contains_key(k.as_str()))
            .cloned()
            .collect();

        let mut change = ModelChange::default();
        for key in keys {
            let before = model.own.remove(&key);
            change.writes.push(ModelWrite { model: id, key, before, after: None });
        }
        if !change.writes.is_empty() {
            change.changed = true;
            change.deltas.push(ModelDelta::modified(id));
            for d in self.descendants(id) {
                change.deltas.push(ModelDelta::modified(d));
            }
        }
        Ok(change)
    }

    /// Snapshot every inherited value that differs from its default into own
    /// values, then detach from the model-parent. No-op without a parent.
    pub fn flatten(&mut self, id: NodeId) -> Result<ModelChange> {
        self.snapshot_inherited(id, false)
    }

    /// Like [`flatten`](Self::flatten) but copies every effective value,
    /// defaults included.
    pub fn detach_copy(&mut self, id: NodeId) -> Result<ModelChange> {
        self.snapshot_inherited(id, true)
    }

    fn snapshot_inherited(&mut self, id: NodeId, include_defaults: bool) -> Result<ModelChange> {
        let mut change = ModelChange::default();
        let model = self.model(id)?;
        if model.parent.is_none() {
            return Ok(change);
        }
        let schema = Arc::clone(&model.schema);
        let mut copies = Vec::new();
        for key in schema.keys() {
            if model.own.contains_key(key) {
                continue;
            }
            let effective = self.get_value(id, key)?;
            if include_defaults || effective != schema.default_value(key) {
                copies.push((key.clone(), effective));
            }
        }

        let model = self.model_mut(id)?;
        for (key, value) in copies {
            model.own.insert(key.clone(), value.clone());
            change.writes.push(ModelWrite { model: id, key, before: None, after: Some(value) });
        }
        self.detach(id);
        change.changed = true;
        Ok(change)
    }

    fn write_raw(
        &mut self,
        id: NodeId,
        key: &str,
        value: Option<Value>,
        change: &mut ModelChange,
    ) -> Result<()> {
        let before = self.model(id)?.own.get(key).cloned();
        if before == value {
            return Ok(());
        }
        let old = self.get_value(id, key)?;
        {
            let model = self.model_mut(id)?;
            match &value {
                Some(v) => {
                    model.own.insert(key.to_string(), v.clone());
                }
                None => {
                    model.own.remove(key);
                }
            }
        }
        let new = self.get_value(id, key)?;
        change.changed = true;
        change.writes.push(ModelWrite {
            model: id,
            key: key.to_string(),
            before,
            after: value,
        });

        if old != new && self.model(id)?.schema.contains(key) {
            change.deltas.push(ModelDelta::keyed(id, key, old.clone(), new.clone()));
            self.propagate(id, key, &old, &new, &mut change.deltas);
        }
        Ok(())
    }

    /// Mirror a delta to every linked descendant that does not override `key`.
    fn propagate(&self, id: NodeId, key: &str, old: &Value, new: &Value, out: &mut Vec<ModelDelta>) {
        let mut stack: Vec<NodeId> = self.models.get(&id).map(|m| m.children.to_vec()).unwrap_or_default();
        let mut visited: HashSet<NodeId> = HashSet::new();
        while let Some(next) = stack.pop() {
            if !visited.insert(next) {
                continue;
            }
            let Some(m) = self.models.get(&next) else { continue };
            if m.own.contains_key(key) {
                continue;
            }
            out.push(ModelDelta::keyed(next, key, old.clone(), new.clone()));
            stack.extend(m.children.iter().copied());
        }
    }

    /// Replay writes backwards, restoring each `before`.
    pub fn revert(&mut self, writes: &[ModelWrite]) -> Result<ModelChange> {
        let mut change = ModelChange::default();
        for w in writes.iter().rev() {
            self.write_raw(w.model, &w.key, w.before.clone(), &mut change)?;
        }
        Ok(change)
    }

    /// Replay writes forwards, restoring each `after`.
    pub fn replay(&mut self, writes: &[ModelWrite]) -> Result<ModelChange> {
        let mut change = ModelChange::default();
        for w in writes {
            self.write_raw(w.model, &w.key, w.after.clone(), &mut change)?;
        }
        Ok(change)
    }

    // ========================================================================
    // Links
    // ========================================================================

    /// Attach `child` under `parent` for inheritance.
    pub fn link(&mut self, child: NodeId, parent: NodeId, is_reference: bool) -> Result<()> {
        self.link_at(child, parent, usize::MAX, is_reference)
    }

    fn link_at(&mut self, child: NodeId, parent: NodeId, index: usize, is_reference: bool) -> Result<()> {
        self.model(child)?;
        let mut cursor = Some(parent);
        while let Some(p) = cursor {
            if p == child {
                return Err(Error::ModelCycle { child, parent });
            }
            cursor = self.model(p)?.parent;
        }
        self.detach(child);
        let parent_model = self.model_mut(parent)?;
        let index = index.min(parent_model.children.len());
        parent_model.children.insert(index, child);
        let model = self.model_mut(child)?;
        model.parent = Some(parent);
        model.is_reference = is_reference;
        Ok(())
    }

    /// Detach from the model-parent without copying anything.
    /// Returns the former parent and position among its children.
    pub fn detach(&mut self, id: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.models.get_mut(&id)?.parent.take()?;
        let pm = self.models.get_mut(&parent)?;
        let pos = pm.children.iter().position(|c| *c == id)?;
        pm.children.remove(pos);
        Some((parent, pos))
    }

    pub fn set_reference_flag(&mut self, id: NodeId, is_reference: bool) -> Result<()> {
        self.model_mut(id)?.is_reference = is_reference;
        Ok(())
    }

    pub fn snapshot(&self, id: NodeId) -> Result<ModelSnapshot> {
        let model = self.model(id)?;
        let parent_index = model
            .parent
            .and_then(|p| self.models.get(&p))
            .and_then(|pm| pm.children.iter().position(|c| *c == id))
            .unwrap_or(0);
        Ok(ModelSnapshot {
            id,
            own: model.own.clone(),
            parent: model.parent,
            parent_index,
            is_reference: model.is_reference,
        })
    }

    /// Restore a snapshot exactly: own values, link position and flag.
    pub fn restore(&mut self, snapshot: &ModelSnapshot) -> Result<ModelChange> {
        let id = snapshot.id;
        let before = self.effective_values(id)?;
        self.detach(id);
        if let Some(parent) = snapshot.parent {
            self.link_at(id, parent, snapshot.parent_index, snapshot.is_reference)?;
        }
        let model = self.model_mut(id)?;
        model.own = snapshot.own.clone();
        model.is_reference = snapshot.is_reference;

        let mut change = ModelChange { changed: true, ..Default::default() };
        if self.effective_values(id)? != before {
            change.deltas.push(ModelDelta::modified(id));
            for d in self.descendants(id) {
                change.deltas.push(ModelDelta::modified(d));
            }
        }
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::PropertySpec;

    fn xy_schema() -> Arc<PropertySchema> {
        Arc::new(PropertySchema::builder("xy").value("x", 0).value("y", 0).build())
    }

    fn store_with(ids: &[u64]) -> ModelStore {
        let mut store = ModelStore::new();
        for id in ids {
            store.insert(NodeId(*id), xy_schema());
        }
        store
    }

    #[test]
    fn test_unset_key_resolves_through_parent() {
        let mut store = store_with(&[1, 2]);
        store.set_value(NodeId(1), "x", Value::Int(5)).unwrap();
        store.link(NodeId(2), NodeId(1), false).unwrap();
        assert_eq!(store.get_value(NodeId(2), "x").unwrap(), Value::Int(5));
        assert_eq!(store.get_value(NodeId(2), "y").unwrap(), Value::Int(0));

        store.set_value(NodeId(2), "x", Value::Int(9)).unwrap();
        assert_eq!(store.get_value(NodeId(2), "x").unwrap(), Value::Int(9));
        assert_eq!(store.get_value(NodeId(1), "x").unwrap(), Value::Int(5));
    }

    #[test]
    fn test_set_equal_to_resolved_is_noop() {
        let mut store = store_with(&[1, 2]);
        store.set_value(NodeId(1), "x", Value::Int(5)).unwrap();
        store.link(NodeId(2), NodeId(1), false).unwrap();
        let change = store.set_value(NodeId(2), "x", Value::Int(5)).unwrap();
        assert!(!change.changed);
        assert!(store.get(NodeId(2)).unwrap().own("x").is_none());
    }

    #[test]
    fn test_deltas_mirror_to_non_overriding_children() {
        let mut store = store_with(&[1, 2, 3]);
        store.link(NodeId(2), NodeId(1), false).unwrap();
        store.link(NodeId(3), NodeId(1), false).unwrap();
        store.set_value(NodeId(3), "x", Value::Int(1)).unwrap();

        let change = store.set_value(NodeId(1), "x", Value::Int(4)).unwrap();
        let models: Vec<NodeId> = change.deltas.iter().map(|d| d.model).collect();
        assert_eq!(models, vec![NodeId(1), NodeId(2)]);
        assert_eq!(change.deltas[1].old, Some(Value::Int(0)));
        assert_eq!(change.deltas[1].new, Some(Value::Int(4)));
    }

    #[test]
    fn test_undeclared_keys_store_without_notifying() {
        let mut store = store_with(&[1]);
        let change = store.set_value(NodeId(1), "note", Value::from("hi")).unwrap();
        assert!(change.changed);
        assert!(change.deltas.is_empty());
        assert_eq!(store.get_value(NodeId(1), "note").unwrap(), Value::from("hi"));
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut store = store_with(&[1]);
        store.set_value(NodeId(1), "x", Value::Int(3)).unwrap();
        store.set_value(NodeId(1), "y", Value::Int(4)).unwrap();
        let change = store.reset(NodeId(1)).unwrap();
        assert_eq!(change.deltas, vec![ModelDelta::modified(NodeId(1))]);
        assert_eq!(store.get_value(NodeId(1), "x").unwrap(), Value::Int(0));
        assert_eq!(store.get_value(NodeId(1), "y").unwrap(), Value::Int(0));
    }

    #[test]
    fn test_flatten_snapshots_non_defaults_and_detaches() {
        let mut store = store_with(&[1, 2]);
        store.set_value(NodeId(1), "x", Value::Int(5)).unwrap();
        store.link(NodeId(2), NodeId(1), false).unwrap();

        let change = store.flatten(NodeId(2)).unwrap();
        assert!(change.changed);
        let m = store.get(NodeId(2)).unwrap();
        assert_eq!(m.parent(), None);
        assert_eq!(m.own("x"), Some(&Value::Int(5)));
        assert_eq!(m.own("y"), None);
        assert!(store.get(NodeId(1)).unwrap().children().is_empty());

        let again = store.flatten(NodeId(2)).unwrap();
        assert_eq!(again, ModelChange::default());
    }

    #[test]
    fn test_detach_copy_includes_defaults() {
        let mut store = store_with(&[1, 2]);
        store.link(NodeId(2), NodeId(1), true).unwrap();
        store.detach_copy(NodeId(2)).unwrap();
        let m = store.get(NodeId(2)).unwrap();
        assert_eq!(m.own_values().len(), 2);
    }

    #[test]
    fn test_link_rejects_cycles() {
        let mut store = store_with(&[1, 2, 3]);
        store.link(NodeId(2), NodeId(1), false).unwrap();
        store.link(NodeId(3), NodeId(2), false).unwrap();
        assert!(matches!(
            store.link(NodeId(1), NodeId(3), false),
            Err(Error::ModelCycle { .. })
        ));
    }

    #[test]
    fn test_constraints_adjust_before_store() {
        let schema = Arc::new(
            PropertySchema::builder("t")
                .property("opacity", PropertySpec::new(1.0).constraint(Constraint::range(0.0, 1.0)))
                .build(),
        );
        let mut store = ModelStore::new();
        store.insert(NodeId(1), schema);
        store.set_value(NodeId(1), "opacity", Value::Float(3.0)).unwrap();
        assert_eq!(store.get_value(NodeId(1), "opacity").unwrap(), Value::Float(1.0));
    }

    #[test]
    fn test_reference_constraint_writes_into_reference_root() {
        let schema = Arc::new(
            PropertySchema::builder("t")
                .wildcard(Constraint::Reference)
                .value("x", 0)
                .build(),
        );
        let mut store = ModelStore::new();
        for id in 1..=3 {
            store.insert(NodeId(id), Arc::clone(&schema));
        }
        // 2 is a reference root of 1; 3 references 2.
        store.link(NodeId(2), NodeId(1), true).unwrap();
        store.link(NodeId(3), NodeId(2), false).unwrap();

        let change = store.set_value(NodeId(3), "x", Value::Int(7)).unwrap();
        assert!(change.changed);
        assert_eq!(store.get(NodeId(2)).unwrap().own("x"), Some(&Value::Int(7)));
        assert_eq!(store.get(NodeId(3)).unwrap().own("x"), None);
        assert_eq!(store.get_value(NodeId(3), "x").unwrap(), Value::Int(7));
        assert_eq!(store.get_value(NodeId(1), "x").unwrap(), Value::Int(0));
    }

    #[test]
    fn test_reference_redirect_stores_adjusted_value() {
        let schema = Arc::new(
            PropertySchema::builder("t")
                .wildcard(Constraint::Reference)
                .property("opacity", PropertySpec::new(1.0).constraint(Constraint::range(0.0, 1.0)))
                .build(),
        );
        let mut store = ModelStore::new();
        for id in 1..=3 {
            store.insert(NodeId(id), Arc::clone(&schema));
        }
        store.link(NodeId(2), NodeId(1), true).unwrap();
        store.link(NodeId(3), NodeId(2), false).unwrap();
        store.set_value(NodeId(3), "opacity", Value::Float(0.5)).unwrap();

        store.set_value(NodeId(3), "opacity", Value::Float(5.0)).unwrap();
        assert_eq!(store.get(NodeId(2)).unwrap().own("opacity"), Some(&Value::Float(1.0)));
        assert_eq!(store.get(NodeId(3)).unwrap().own("opacity"), None);
        assert_eq!(store.get_value(NodeId(3), "opacity").unwrap(), Value::Float(1.0));
    }

    #[test]
    fn test_revert_undoes_side_effect_writes() {
        let schema = Arc::new(
            PropertySchema::builder("t").wildcard(Constraint::Reference).value("x", 0).build(),
        );
        let mut store = ModelStore::new();
        for id in 1..=2 {
            store.insert(NodeId(id), Arc::clone(&schema));
        }
        store.link(NodeId(2), NodeId(1), true).unwrap();
        store.insert(NodeId(3), Arc::clone(&schema));
        store.link(NodeId(3), NodeId(2), false).unwrap();

        let change = store.set_value(NodeId(3), "x", Value::Int(2)).unwrap();
        store.revert(&change.writes).unwrap();
        assert_eq!(store.get(NodeId(2)).unwrap().own("x"), None);
        store.replay(&change.writes).unwrap();
        assert_eq!(store.get(NodeId(2)).unwrap().own("x"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_snapshot_restore_relinks_at_same_position() {
        let mut store = store_with(&[1, 2, 3]);
        store.link(NodeId(2), NodeId(1), false).unwrap();
        store.link(NodeId(3), NodeId(1), false).unwrap();
        store.set_value(NodeId(1), "x", Value::Int(8)).unwrap();

        let snap = store.snapshot(NodeId(2)).unwrap();
        store.flatten(NodeId(2)).unwrap();
        store.restore(&snap).unwrap();
        assert_eq!(store.get(NodeId(1)).unwrap().children(), &[NodeId(2), NodeId(3)]);
        assert!(store.get(NodeId(2)).unwrap().own_values().is_empty());
        assert_eq!(store.get_value(NodeId(2), "x").unwrap(), Value::Int(8));
    }
}
