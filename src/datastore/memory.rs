//! In-memory datastore.
//!
//! This is the reference implementation of `Datastore`. It keeps a
//! descriptor table that mirrors what a real backend would persist, plus an
//! ordered log of every operation received.
//!
//! ## Limitations
//!
//! - **No replication**: nothing is ever reported back as a `RemoteChange`.
//! - **Lenient**: operations against unknown ids are recorded and otherwise
//!   ignored, matching the fire-and-forget contract.
//!
//! Cloning a `MemoryDatastore` shares the same storage, so a test can hand
//! one copy to a session and inspect the other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::{CloneInfoDescriptor, ModelPatch, NodeDescriptor, NodeId, Value};
use crate::{Error, Result};
use super::{Datastore, DatastoreOp};

// ============================================================================
// MemoryDatastore
// ============================================================================

#[derive(Clone, Default)]
pub struct MemoryDatastore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    nodes: RwLock<HashMap<NodeId, NodeDescriptor>>,
    ops: RwLock<Vec<DatastoreOp>>,
    /// When set, `create_node` refuses to acknowledge.
    reject_creates: AtomicBool,
}

impl std::fmt::Debug for MemoryDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatastore")
            .field("nodes", &self.inner.nodes.read().len())
            .field("ops", &self.inner.ops.read().len())
            .finish()
    }
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation received so far, in order.
    pub fn ops(&self) -> Vec<DatastoreOp> {
        self.inner.ops.read().clone()
    }

    /// Drain the operation log.
    pub fn take_ops(&self) -> Vec<DatastoreOp> {
        std::mem::take(&mut *self.inner.ops.write())
    }

    pub fn node(&self, id: NodeId) -> Option<NodeDescriptor> {
        self.inner.nodes.read().get(&id).cloned()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.nodes.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.nodes.read().is_empty()
    }

    /// Make subsequent `create_node` calls fail, for exercising
    /// acknowledgement failures.
    pub fn reject_creates(&self, reject: bool) {
        self.inner.reject_creates.store(reject, Ordering::Relaxed);
    }

    fn record(&self, op: DatastoreOp) {
        self.inner.ops.write().push(op);
    }

    fn with_node(&self, id: NodeId, f: impl FnOnce(&mut NodeDescriptor)) {
        if let Some(node) = self.inner.nodes.write().get_mut(&id) {
            f(node);
        }
    }
}

// ============================================================================
// Datastore impl
// ============================================================================

impl Datastore for MemoryDatastore {
    fn create_node(&self, descriptor: &NodeDescriptor) -> Result<()> {
        if self.inner.reject_creates.load(Ordering::Relaxed) {
            return Err(Error::Datastore(format!("create of node {} rejected", descriptor.id)));
        }
        self.inner.nodes.write().insert(descriptor.id, descriptor.clone());
        self.record(DatastoreOp::CreateNode { descriptor: descriptor.clone() });
        Ok(())
    }

    fn remove_node(&self, id: NodeId) {
        self.inner.nodes.write().remove(&id);
        self.record(DatastoreOp::RemoveNode { id });
    }

    fn set_node_parent(&self, child: NodeId, parent: Option<NodeId>) {
        {
            let mut nodes = self.inner.nodes.write();
            let former = nodes.get(&child).and_then(|n| n.parent);
            if let Some(p) = former.and_then(|p| nodes.get_mut(&p)) {
                p.children.retain(|c| *c != child);
            }
            if let Some(p) = parent.and_then(|p| nodes.get_mut(&p)) {
                if !p.children.contains(&child) {
                    p.children.push(child);
                }
            }
            if let Some(c) = nodes.get_mut(&child) {
                c.parent = parent;
            }
        }
        self.record(DatastoreOp::SetNodeParent { child, parent });
    }

    fn modify_node_model(&self, id: NodeId, patch: &ModelPatch) {
        self.with_node(id, |node| {
            for (key, value) in patch {
                match value {
                    Some(v) => {
                        node.model.insert(key.clone(), v.clone());
                    }
                    None => {
                        node.model.remove(key);
                    }
                }
            }
        });
        self.record(DatastoreOp::ModifyNodeModel { id, patch: patch.clone() });
    }

    fn update_clone_info(&self, id: NodeId, info: &CloneInfoDescriptor) {
        self.with_node(id, |node| node.clone_info = info.clone());
        self.record(DatastoreOp::UpdateCloneInfo { id, info: info.clone() });
    }

    fn set_custom_property(&self, id: NodeId, name: &str, default: &Value) {
        self.with_node(id, |node| {
            node.custom_properties.defined.insert(name.to_string(), default.clone());
        });
        self.record(DatastoreOp::SetCustomProperty { id, name: name.to_string(), default: default.clone() });
    }

    fn remove_custom_property(&self, id: NodeId, name: &str) {
        self.with_node(id, |node| {
            node.custom_properties.defined.remove(name);
        });
        self.record(DatastoreOp::RemoveCustomProperty { id, name: name.to_string() });
    }

    fn assign_custom_property(&self, id: NodeId, name: &str, value: &Value) {
        self.with_node(id, |node| {
            node.custom_properties.assigned.insert(name.to_string(), value.clone());
        });
        self.record(DatastoreOp::AssignCustomProperty { id, name: name.to_string(), value: value.clone() });
    }

    fn unassign_custom_property(&self, id: NodeId, name: &str) {
        self.with_node(id, |node| {
            node.custom_properties.assigned.remove(name);
        });
        self.record(DatastoreOp::UnassignCustomProperty { id, name: name.to_string() });
    }

    fn set_node_children(&self, id: NodeId, children: &[NodeId]) {
        self.with_node(id, |node| node.children = children.to_vec());
        self.record(DatastoreOp::SetNodeChildren { id, children: children.to_vec() });
    }
}
