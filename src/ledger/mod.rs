//! # Clone Ledger Queries
//!
//! Derived relationship queries and the structural policy that every
//! command consults before touching the graph.
//!
//! Nothing here is cached: each answer is re-derived from the ids stored in
//! the [`SceneGraph`]. Traversals use explicit worklists with a visited set,
//! so an illegitimate cycle surfaces as [`Error::BrokenCloneChain`] instead
//! of unbounded recursion.
//!
//! ## Policy
//!
//! | Mode | structure edits go to | property edits go to |
//! |------|-----------------------|----------------------|
//! | Original, Duplicate | itself | itself |
//! | Reference | its cloner (recursively) | its cloner (recursively) |
//! | ReferenceRoot | cloner for new children, itself for its own removal | itself for instance-local keys, else its cloner |
//! | Variant, VariantRoot | itself | itself |

use hashbrown::HashSet;

use crate::graph::SceneGraph;
use crate::model::{CloneMode, NodeId};
use crate::{Error, Result};

// ============================================================================
// Chain queries
// ============================================================================

/// Walk the cloner chain to the node the family originates from.
///
/// A Duplicate whose transient link is gone counts as its own origin.
pub fn original(graph: &SceneGraph, id: NodeId) -> Result<NodeId> {
    Ok(clone_chain(graph, id)?.last().copied().unwrap_or(id))
}

/// Cloner chain from `id` (exclusive) up to the original (inclusive).
pub fn clone_ancestors(graph: &SceneGraph, id: NodeId) -> Result<Vec<NodeId>> {
    clone_chain(graph, id)
}

fn clone_chain(graph: &SceneGraph, id: NodeId) -> Result<Vec<NodeId>> {
    let mut chain = Vec::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    visited.insert(id);
    let mut current = id;
    loop {
        let node = graph.node(current).map_err(|_| Error::BrokenCloneChain { node: id })?;
        match (node.mode(), node.cloner()) {
            (CloneMode::Original | CloneMode::Duplicate, None) => return Ok(chain),
            (_, Some(cloner)) => {
                if !visited.insert(cloner) || !graph.contains(cloner) {
                    return Err(Error::BrokenCloneChain { node: id });
                }
                chain.push(cloner);
                current = cloner;
            }
            (_, None) => return Err(Error::BrokenCloneChain { node: id }),
        }
    }
}

/// Nearest node in the tree, starting at `id` itself, whose mode is a Root.
pub fn clone_root(graph: &SceneGraph, id: NodeId) -> Result<Option<NodeId>> {
    if graph.node(id)?.mode().is_root() {
        return Ok(Some(id));
    }
    for ancestor in graph.tree_ancestors(id)? {
        if graph.node(ancestor)?.mode().is_root() {
            return Ok(Some(ancestor));
        }
    }
    Ok(None)
}

// ============================================================================
// Family queries
// ============================================================================

/// Every live node transitively cloned from `id`, by creation sequence.
///
/// For a plain Variant the family is re-derived: all live clones of its
/// original that sit inside some instance of its clone root. That is the
/// set of "other copies of this variant", independent of how the individual
/// `cloned` lists were wired during fan-out.
pub fn all_cloned(graph: &SceneGraph, id: NodeId) -> Result<Vec<NodeId>> {
    let node = graph.node(id)?;
    if node.mode() == CloneMode::Variant {
        if let Some(root) = clone_root(graph, id)? {
            let origin = original(graph, id)?;
            let instances = cloned_closure(graph, root)?;
            let mut out: Vec<NodeId> = cloned_closure(graph, origin)?
                .into_iter()
                .filter(|n| *n != id)
                .filter(|n| {
                    instances
                        .iter()
                        .any(|inst| *n == *inst || graph.is_descendant(*n, *inst))
                })
                .collect();
            graph.sort_by_seq(&mut out);
            return Ok(out);
        }
    }
    cloned_closure(graph, id)
}

/// Transitive closure of `cloned`, live nodes only, by creation sequence.
pub fn cloned_closure(graph: &SceneGraph, id: NodeId) -> Result<Vec<NodeId>> {
    let mut out = Vec::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    visited.insert(id);
    let mut stack: Vec<NodeId> = graph.node(id)?.clone_info.cloned.to_vec();
    while let Some(next) = stack.pop() {
        if !visited.insert(next) {
            return Err(Error::BrokenCloneChain { node: next });
        }
        let node = graph.node(next).map_err(|_| Error::BrokenCloneChain { node: next })?;
        stack.extend(node.clone_info.cloned.iter().copied());
        if graph.is_live(next) {
            out.push(next);
        }
    }
    graph.sort_by_seq(&mut out);
    Ok(out)
}

// ============================================================================
// Structural policy
// ============================================================================

/// Where a child requested under `parent` is actually created.
pub fn add_child_clone_target(graph: &SceneGraph, parent: NodeId) -> Result<NodeId> {
    delegate(graph, parent, |mode| mode.is_reference_family())
}

/// Which node a removal of `node` actually removes.
pub fn remove_child_clone_target(graph: &SceneGraph, node: NodeId) -> Result<NodeId> {
    delegate(graph, node, |mode| mode == CloneMode::Reference)
}

/// Which node receives a direct edit made on `node`.
pub fn clone_target(graph: &SceneGraph, node: NodeId) -> Result<NodeId> {
    delegate(graph, node, |mode| mode == CloneMode::Reference)
}

/// Which node receives a write of `key` made on `node`.
pub fn clone_target_for_key(graph: &SceneGraph, node: NodeId, key: &str) -> Result<NodeId> {
    delegate(graph, node, |mode| match mode {
        CloneMode::Reference => true,
        CloneMode::ReferenceRoot => {
            let local = graph
                .models()
                .get(node)
                .and_then(|m| m.schema().category(key))
                .is_some_and(|c| c.is_instance_local());
            !local
        }
        CloneMode::Original | CloneMode::Duplicate | CloneMode::Variant | CloneMode::VariantRoot => false,
    })
}

/// Mode for a child fanned out beneath `member` of a clone family.
pub fn new_child_clone_mode(graph: &SceneGraph, member: NodeId) -> Result<CloneMode> {
    Ok(graph.node(member)?.mode().child_mode())
}

fn delegate(graph: &SceneGraph, start: NodeId, forward: impl Fn(CloneMode) -> bool) -> Result<NodeId> {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut current = start;
    loop {
        if !visited.insert(current) {
            return Err(Error::BrokenCloneChain { node: start });
        }
        let node = graph.node(current)?;
        if !forward(node.mode()) {
            return Ok(current);
        }
        current = node.cloner().ok_or(Error::BrokenCloneChain { node: current })?;
        if !graph.contains(current) {
            return Err(Error::BrokenCloneChain { node: start });
        }
    }
}

// ============================================================================
// Dependency queries
// ============================================================================

/// Nodes that would be broken if `id` vanished: its tree descendants, its
/// clones, and recursively theirs. By creation sequence, `id` excluded.
pub fn dependants(graph: &SceneGraph, id: NodeId) -> Result<Vec<NodeId>> {
    walk(graph, id, |n| {
        let mut next: Vec<NodeId> = n.children.clone();
        next.extend(n.clone_info.cloned.iter().copied());
        next
    })
}

/// Nodes that must exist before `id` can: tree ancestors, cloner chain, and
/// recursively theirs. By creation sequence, `id` excluded.
pub fn dependencies(graph: &SceneGraph, id: NodeId) -> Result<Vec<NodeId>> {
    walk(graph, id, |n| n.parent.into_iter().chain(n.cloner()).collect())
}

/// Nodes to un-cloak, in order, so that `id` becomes live again: every
/// cloaked dependency followed by `id` itself.
pub fn restore_dependencies(graph: &SceneGraph, id: NodeId) -> Result<Vec<NodeId>> {
    let mut out: Vec<NodeId> = dependencies(graph, id)?
        .into_iter()
        .filter(|d| graph.get(*d).is_some_and(|n| n.is_cloaked()))
        .collect();
    out.push(id);
    graph.sort_by_seq(&mut out);
    Ok(out)
}

fn walk(
    graph: &SceneGraph,
    id: NodeId,
    next: impl Fn(&crate::model::SceneNode) -> Vec<NodeId>,
) -> Result<Vec<NodeId>> {
    let mut out = Vec::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    visited.insert(id);
    let mut stack = next(graph.node(id)?);
    while let Some(n) = stack.pop() {
        if !visited.insert(n) {
            continue;
        }
        let node = graph.node(n)?;
        stack.extend(next(node));
        out.push(n);
    }
    graph.sort_by_seq(&mut out);
    Ok(out)
}
