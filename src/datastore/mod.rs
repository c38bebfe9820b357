//! # Datastore Contract
//!
//! The boundary between the engine and whatever persists or replicates the
//! scene. The engine never reads from the datastore while editing; it only
//! mirrors its own mutations outward and folds remote notifications back in
//! through [`RemoteChange`].
//!
//! ## Implementations
//!
//! | Datastore | Module | Description |
//! |-----------|--------|-------------|
//! | `MemoryDatastore` | `memory` | Records every operation and keeps a descriptor table |
//!
//! Every operation is fire-and-forget except [`Datastore::create_node`],
//! whose acknowledgement gates the rest of a command's outbox.

pub mod memory;

use serde::{Deserialize, Serialize};

use crate::model::{CloneInfoDescriptor, ModelPatch, NodeDescriptor, NodeId, Value};
use crate::Result;

pub use memory::MemoryDatastore;

// ============================================================================
// Datastore Trait
// ============================================================================

/// Minimal operation set issued by the engine.
///
/// Takes `&self`; implementations use interior mutability.
pub trait Datastore: Send + Sync + 'static {
    /// Persist a new (or re-registered) node. Must be acknowledged.
    fn create_node(&self, descriptor: &NodeDescriptor) -> Result<()>;

    fn remove_node(&self, id: NodeId);

    fn set_node_parent(&self, child: NodeId, parent: Option<NodeId>);

    /// Apply a sparse own-value patch; `None` clears an override.
    fn modify_node_model(&self, id: NodeId, patch: &ModelPatch);

    fn update_clone_info(&self, id: NodeId, info: &CloneInfoDescriptor);

    fn set_custom_property(&self, id: NodeId, name: &str, default: &Value);

    fn remove_custom_property(&self, id: NodeId, name: &str);

    fn assign_custom_property(&self, id: NodeId, name: &str, value: &Value);

    fn unassign_custom_property(&self, id: NodeId, name: &str);

    fn set_node_children(&self, id: NodeId, children: &[NodeId]);
}

// ============================================================================
// Outbox operations
// ============================================================================

/// One queued datastore call. Commands collect these while applying and the
/// session flushes them only once the whole command has succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum DatastoreOp {
    CreateNode { descriptor: NodeDescriptor },
    RemoveNode { id: NodeId },
    SetNodeParent { child: NodeId, parent: Option<NodeId> },
    ModifyNodeModel { id: NodeId, patch: ModelPatch },
    UpdateCloneInfo { id: NodeId, info: CloneInfoDescriptor },
    SetCustomProperty { id: NodeId, name: String, default: Value },
    RemoveCustomProperty { id: NodeId, name: String },
    AssignCustomProperty { id: NodeId, name: String, value: Value },
    UnassignCustomProperty { id: NodeId, name: String },
    SetNodeChildren { id: NodeId, children: Vec<NodeId> },
}

impl DatastoreOp {
    /// Issue this operation against a datastore.
    pub fn apply_to(&self, store: &dyn Datastore) -> Result<()> {
        match self {
            DatastoreOp::CreateNode { descriptor } => return store.create_node(descriptor),
            DatastoreOp::RemoveNode { id } => store.remove_node(*id),
            DatastoreOp::SetNodeParent { child, parent } => store.set_node_parent(*child, *parent),
            DatastoreOp::ModifyNodeModel { id, patch } => store.modify_node_model(*id, patch),
            DatastoreOp::UpdateCloneInfo { id, info } => store.update_clone_info(*id, info),
            DatastoreOp::SetCustomProperty { id, name, default } => store.set_custom_property(*id, name, default),
            DatastoreOp::RemoveCustomProperty { id, name } => store.remove_custom_property(*id, name),
            DatastoreOp::AssignCustomProperty { id, name, value } => store.assign_custom_property(*id, name, value),
            DatastoreOp::UnassignCustomProperty { id, name } => store.unassign_custom_property(*id, name),
            DatastoreOp::SetNodeChildren { id, children } => store.set_node_children(*id, children),
        }
        Ok(())
    }

    pub fn is_create(&self) -> bool {
        matches!(self, DatastoreOp::CreateNode { .. })
    }
}

// ============================================================================
// Remote notifications
// ============================================================================

/// A change made elsewhere and reported by the datastore. Folded into the
/// local graph without echo and without entering the undo log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RemoteChange {
    NodeCreated { descriptor: NodeDescriptor },
    NodeRemoved { id: NodeId },
    ParentChanged { child: NodeId, parent: Option<NodeId> },
    ModelKeyChanged { id: NodeId, key: String, value: Option<Value> },
    CloneInfoChanged { id: NodeId, info: CloneInfoDescriptor },
    ChildrenReordered { id: NodeId, children: Vec<NodeId> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CloneMode;

    #[test]
    fn test_op_serialization_is_tagged() {
        let op = DatastoreOp::SetNodeParent { child: NodeId(2), parent: Some(NodeId(1)) };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "setNodeParent");
        assert_eq!(json["child"], 2);
        let back: DatastoreOp = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_remote_change_parses_from_wire() {
        let raw = r#"{"kind":"cloneInfoChanged","id":3,"info":{"cloner":1,"cloneMode":"Variant","cloned":[]}}"#;
        let change: RemoteChange = serde_json::from_str(raw).unwrap();
        match change {
            RemoteChange::CloneInfoChanged { id, info } => {
                assert_eq!(id, NodeId(3));
                assert_eq!(info.cloner, Some(NodeId(1)));
                assert_eq!(info.clone_mode, CloneMode::Variant);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
