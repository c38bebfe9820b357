//! View contract.
//!
//! Rendering is external. The engine only asks a [`ViewProvider`] for an
//! opaque handle per node and pushes effective values onto it after model
//! or structural changes.

use serde::{Deserialize, Serialize};

use crate::model::{PropertyMap, SceneNode};

/// Opaque per-node view handle issued by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewHandle(pub u64);

pub trait ViewProvider {
    /// Create the view for a node seen for the first time.
    fn create_view(&mut self, node: &SceneNode) -> ViewHandle;

    /// Push effective values onto an existing view.
    fn update_view(&mut self, handle: ViewHandle, node: &SceneNode, values: &PropertyMap);

    /// Called when a node with a view becomes cloaked.
    fn hide_view(&mut self, _handle: ViewHandle, _node: &SceneNode) {}
}
