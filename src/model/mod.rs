//! # Scene Graph Model
//!
//! Plain data that crosses every boundary: graph ↔ commands ↔ datastore ↔ export.
//!
//! Design rule: this module holds no registry and performs no I/O.
//! Relationships between nodes are ids, resolved through the
//! [`SceneGraph`](crate::graph::SceneGraph).

pub mod node;
pub mod value;
pub mod property_map;
pub mod clone_info;
pub mod descriptor;

pub use node::{SceneNode, NodeId, CustomProperties};
pub use value::Value;
pub use property_map::{PropertyMap, ModelPatch, props};
pub use clone_info::{CloneInfo, CloneMode};
pub use descriptor::{NodeDescriptor, CloneInfoDescriptor};
