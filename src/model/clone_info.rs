//! Clone relationship ledger entry carried by every node.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::NodeId;

/// How a node relates to the node it was cloned from.
///
/// Entered at creation, left only through an explicit unlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CloneMode {
    /// No cloner; the source of truth for its clone family.
    #[default]
    Original,
    /// One-time copy. The cloner link only exists while the copy is built.
    Duplicate,
    /// Mirrors its cloner; never diverges.
    Reference,
    /// Top attach point of a reference subtree.
    ReferenceRoot,
    /// Inherits from its cloner, may override per property.
    Variant,
    /// Top attach point of a variant subtree.
    VariantRoot,
}

impl CloneMode {
    pub fn is_root(self) -> bool {
        matches!(self, CloneMode::ReferenceRoot | CloneMode::VariantRoot)
    }

    pub fn is_reference_family(self) -> bool {
        matches!(self, CloneMode::Reference | CloneMode::ReferenceRoot)
    }

    pub fn is_variant_family(self) -> bool {
        matches!(self, CloneMode::Variant | CloneMode::VariantRoot)
    }

    /// Whether a node in this mode resolves unset keys through its cloner's model.
    pub fn inherits_model(self) -> bool {
        self.is_reference_family() || self.is_variant_family()
    }

    /// Mode a clone takes at the given depth of a clone operation.
    ///
    /// Only the directly requested clone (depth 0) becomes a root; everything
    /// copied beneath it keeps the plain mode.
    pub fn at_depth(self, depth: usize) -> CloneMode {
        match (self, depth) {
            (CloneMode::Reference, 0) => CloneMode::ReferenceRoot,
            (CloneMode::Variant, 0) => CloneMode::VariantRoot,
            (CloneMode::ReferenceRoot, d) if d > 0 => CloneMode::Reference,
            (CloneMode::VariantRoot, d) if d > 0 => CloneMode::Variant,
            (mode, _) => mode,
        }
    }

    /// Mode for a child fanned out beneath a node in this mode.
    pub fn child_mode(self) -> CloneMode {
        match self {
            CloneMode::Reference | CloneMode::ReferenceRoot => CloneMode::Reference,
            CloneMode::Variant | CloneMode::VariantRoot => CloneMode::Variant,
            CloneMode::Original | CloneMode::Duplicate => CloneMode::Duplicate,
        }
    }
}

impl std::fmt::Display for CloneMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Per-node clone bookkeeping.
///
/// `cloner` is a non-owning back-reference; `cloned` lists (does not own)
/// every node whose `cloner` is this node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CloneInfo {
    pub mode: CloneMode,
    pub cloner: Option<NodeId>,
    pub cloned: SmallVec<[NodeId; 4]>,
}

impl CloneInfo {
    pub fn original() -> Self {
        Self::default()
    }

    pub fn cloned_from(cloner: NodeId, mode: CloneMode) -> Self {
        Self { mode, cloner: Some(cloner), cloned: SmallVec::new() }
    }

    pub fn is_original(&self) -> bool {
        self.mode == CloneMode::Original
    }

    /// Record `id` as cloned from this node. Returns false if already present.
    pub fn add_cloned(&mut self, id: NodeId) -> bool {
        if self.cloned.contains(&id) {
            return false;
        }
        self.cloned.push(id);
        true
    }

    /// Insert at a specific position (used when restoring an unlink).
    pub fn insert_cloned(&mut self, index: usize, id: NodeId) {
        if self.cloned.contains(&id) {
            return;
        }
        let index = index.min(self.cloned.len());
        self.cloned.insert(index, id);
    }

    /// Remove `id`, returning its former position.
    pub fn remove_cloned(&mut self, id: NodeId) -> Option<usize> {
        let pos = self.cloned.iter().position(|c| *c == id)?;
        self.cloned.remove(pos);
        Some(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_promotion() {
        assert_eq!(CloneMode::Reference.at_depth(0), CloneMode::ReferenceRoot);
        assert_eq!(CloneMode::Variant.at_depth(0), CloneMode::VariantRoot);
        assert_eq!(CloneMode::Reference.at_depth(1), CloneMode::Reference);
        assert_eq!(CloneMode::VariantRoot.at_depth(2), CloneMode::Variant);
        assert_eq!(CloneMode::Duplicate.at_depth(0), CloneMode::Duplicate);
    }

    #[test]
    fn test_child_mode() {
        assert_eq!(CloneMode::ReferenceRoot.child_mode(), CloneMode::Reference);
        assert_eq!(CloneMode::VariantRoot.child_mode(), CloneMode::Variant);
        assert_eq!(CloneMode::Variant.child_mode(), CloneMode::Variant);
    }

    #[test]
    fn test_cloned_list_is_a_set() {
        let mut info = CloneInfo::original();
        assert!(info.add_cloned(NodeId(2)));
        assert!(!info.add_cloned(NodeId(2)));
        info.add_cloned(NodeId(3));
        assert_eq!(info.remove_cloned(NodeId(2)), Some(0));
        assert_eq!(info.remove_cloned(NodeId(2)), None);
        info.insert_cloned(0, NodeId(2));
        assert_eq!(info.cloned.as_slice(), &[NodeId(2), NodeId(3)]);
    }
}
