//! Node in the scene graph.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{CloneInfo, CloneMode, Value};
use crate::view::ViewHandle;

/// Opaque node identifier, stable for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User-defined properties that live outside the type schema.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CustomProperties {
    /// name → default value
    #[serde(default)]
    pub defined: BTreeMap<String, Value>,
    /// name → assigned value
    #[serde(default)]
    pub assigned: BTreeMap<String, Value>,
}

impl CustomProperties {
    pub fn is_empty(&self) -> bool {
        self.defined.is_empty() && self.assigned.is_empty()
    }

    /// Assigned value, falling back to the defined default.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.assigned.get(name).or_else(|| self.defined.get(name))
    }
}

/// A clonable node in the scene graph.
///
/// Tree links and clone links are ids resolved through the owning
/// [`SceneGraph`](crate::graph::SceneGraph); the node's property model lives
/// in the graph's model store under the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub id: NodeId,
    pub name: String,
    pub node_type: String,
    /// Monotonic creation sequence, used for deterministic ordering.
    pub seq: u64,
    pub parent: Option<NodeId>,
    /// Ordered children, cloaked ones included.
    pub children: Vec<NodeId>,
    pub clone_info: CloneInfo,
    pub cloaked: bool,
    pub view: Option<ViewHandle>,
    pub custom: CustomProperties,
}

impl SceneNode {
    pub fn new(id: NodeId, node_type: impl Into<String>, name: impl Into<String>, seq: u64) -> Self {
        Self {
            id,
            name: name.into(),
            node_type: node_type.into(),
            seq,
            parent: None,
            children: Vec::new(),
            clone_info: CloneInfo::original(),
            cloaked: false,
            view: None,
            custom: CustomProperties::default(),
        }
    }

    pub fn mode(&self) -> CloneMode {
        self.clone_info.mode
    }

    pub fn cloner(&self) -> Option<NodeId> {
        self.clone_info.cloner
    }

    pub fn is_cloaked(&self) -> bool {
        self.cloaked
    }

    pub fn child_index(&self, child: NodeId) -> Option<usize> {
        self.children.iter().position(|c| *c == child)
    }
}
