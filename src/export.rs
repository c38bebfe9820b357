//! Descriptor export and import.
//!
//! Serializes the live scene as the node descriptor list the datastore
//! speaks, and rebuilds a graph from such a list.
//!
//! ```text
//! SceneGraph → snapshot() → Vec<NodeDescriptor> → to_json()
//!   → from_json() → import() → SceneGraph
//! ```

use hashbrown::HashSet;

use crate::graph::SceneGraph;
use crate::model::{CloneInfoDescriptor, CloneMode, NodeDescriptor, NodeId, PropertyMap};
use crate::{Error, Result};

/// Descriptor for one node as the datastore should see it: live children
/// and live clones only, own values only.
pub fn describe(graph: &SceneGraph, id: NodeId) -> Result<NodeDescriptor> {
    describe_filtered(graph, id, &|n: NodeId| graph.is_live(n))
}

fn describe_filtered(graph: &SceneGraph, id: NodeId, keep: &dyn Fn(NodeId) -> bool) -> Result<NodeDescriptor> {
    let node = graph.node(id)?;
    let model = graph
        .models()
        .get(id)
        .ok_or(Error::NodeNotFound(id))?;

    let mut clone_info = CloneInfoDescriptor::from(&node.clone_info);
    clone_info.cloned.retain(|c| keep(*c));
    let mut own = model.own_values().clone();

    // A clone whose source is not part of the output is written out as the
    // independent copy it would become on disposal.
    if let Some(cloner) = node.cloner() {
        if !keep(cloner) {
            let schema = model.schema();
            own = graph
                .effective_values(id)?
                .into_iter()
                .filter(|(k, v)| *v != schema.default_value(k))
                .collect::<PropertyMap>();
            clone_info.cloner = None;
            clone_info.clone_mode = CloneMode::Original;
        }
    }

    Ok(NodeDescriptor {
        id,
        name: node.name.clone(),
        created: node.seq,
        node_type: node.node_type.clone(),
        parent: node.parent,
        children: node.children.iter().copied().filter(|c| keep(*c)).collect(),
        model: own,
        clone_info,
        custom_properties: node.custom.clone(),
    })
}

/// Every live node, ordered by creation sequence.
pub fn snapshot(graph: &SceneGraph) -> Result<Vec<NodeDescriptor>> {
    let live: HashSet<NodeId> = graph
        .nodes()
        .into_iter()
        .map(|n| n.id)
        .filter(|id| graph.is_live(*id))
        .collect();
    let mut out = Vec::with_capacity(live.len());
    for node in graph.nodes() {
        if live.contains(&node.id) {
            out.push(describe_filtered(graph, node.id, &|n: NodeId| live.contains(&n))?);
        }
    }
    Ok(out)
}

pub fn to_json(graph: &SceneGraph) -> Result<String> {
    Ok(serde_json::to_string_pretty(&snapshot(graph)?)?)
}

pub fn from_json(json: &str) -> Result<Vec<NodeDescriptor>> {
    Ok(serde_json::from_str(json)?)
}

/// Rebuild nodes from descriptors in two passes: register every node with
/// its links as given, then attach model inheritance for clone modes that
/// inherit. The batch is staged on a copy and only committed if the result
/// passes the integrity check.
pub fn import(graph: &mut SceneGraph, descriptors: &[NodeDescriptor]) -> Result<Vec<NodeId>> {
    let mut ordered: Vec<&NodeDescriptor> = descriptors.iter().collect();
    ordered.sort_by_key(|d| d.created);

    let mut staged = graph.clone();
    for desc in &ordered {
        let node = staged.factory().from_descriptor(desc, desc.created)?;
        staged.register(node)?;
        for (key, value) in &desc.model {
            staged.models_mut().set_own(desc.id, key, Some(value.clone()))?;
        }
    }
    for desc in &ordered {
        let mode = desc.clone_info.clone_mode;
        if let (true, Some(cloner)) = (mode.inherits_model(), desc.clone_info.cloner) {
            staged.models_mut().link(desc.id, cloner, mode == CloneMode::ReferenceRoot)?;
        }
    }
    staged.check_integrity()?;
    *graph = staged;

    tracing::debug!(count = ordered.len(), "imported descriptors");
    Ok(ordered.iter().map(|d| d.id).collect())
}

/// Register a single node reported by a remote peer.
///
/// Returns `false` when the node is already live (an echo of a local
/// create). A cloaked node with the same id is brought back instead of
/// re-created.
pub fn import_node(graph: &mut SceneGraph, desc: &NodeDescriptor) -> Result<bool> {
    if let Some(existing) = graph.get(desc.id) {
        if !existing.is_cloaked() {
            return Ok(false);
        }
        graph.uncloak(desc.id)?;
        return Ok(true);
    }
    for link in desc.parent.into_iter().chain(desc.clone_info.cloner) {
        graph.node(link)?;
    }
    if desc.clone_info.clone_mode.inherits_model() && desc.clone_info.cloner.is_none() {
        return Err(Error::BrokenCloneChain { node: desc.id });
    }

    let seq = graph.next_seq();
    let mut node = graph.factory().from_descriptor(desc, seq)?;
    node.parent = None;
    node.children.clear();
    node.clone_info.cloner = None;
    node.clone_info.cloned.clear();
    let mode = node.clone_info.mode;
    node.clone_info.mode = CloneMode::Original;
    graph.register(node)?;

    for (key, value) in &desc.model {
        graph.models_mut().set_own(desc.id, key, Some(value.clone()))?;
    }
    if let Some(parent) = desc.parent {
        graph.set_parent(desc.id, Some(parent), None)?;
    }
    match desc.clone_info.cloner {
        Some(cloner) => {
            graph.rewire_clone(desc.id, mode, Some(cloner))?;
        }
        None if mode.inherits_model() => return Err(Error::BrokenCloneChain { node: desc.id }),
        None => graph.node_mut(desc.id)?.clone_info.mode = mode,
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::NodeFactory;
    use crate::model::Value;
    use pretty_assertions::assert_eq;

    fn scene() -> (SceneGraph, NodeId, NodeId) {
        let mut g = SceneGraph::new(NodeFactory::with_builtin_types());
        let o = g.create_node("group", Some("O"), None).unwrap();
        let a = g.create_node("sprite", Some("A"), None).unwrap();
        g.set_parent(a, Some(o), None).unwrap();
        g.models_mut().set_value(o, "x", Value::Float(5.0)).unwrap();
        (g, o, a)
    }

    #[test]
    fn test_snapshot_skips_cloaked_nodes() {
        let (mut g, o, a) = scene();
        g.cloak(a).unwrap();
        let snap = snapshot(&g).unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id, o);
        assert!(snap[0].children.is_empty());
    }

    #[test]
    fn test_roundtrip_through_json() {
        let (mut g, o, _) = scene();
        let v = g.clone_node(o, CloneMode::Variant, 0, None, None).unwrap().root;
        g.models_mut().set_value(v, "y", Value::Float(2.0)).unwrap();

        let json = to_json(&g).unwrap();
        let mut fresh = SceneGraph::new(NodeFactory::with_builtin_types());
        import(&mut fresh, &from_json(&json).unwrap()).unwrap();

        assert_eq!(snapshot(&fresh).unwrap(), snapshot(&g).unwrap());
        assert_eq!(fresh.get_value(v, "x").unwrap(), Value::Float(5.0));
        fresh.models_mut().set_value(o, "x", Value::Float(8.0)).unwrap();
        assert_eq!(fresh.get_value(v, "x").unwrap(), Value::Float(8.0));
    }

    #[test]
    fn test_clone_of_cloaked_source_exports_flattened() {
        let (mut g, o, _) = scene();
        let v = g.clone_node(o, CloneMode::Variant, 0, None, None).unwrap().root;
        g.cloak(o).unwrap();
        let snap = snapshot(&g).unwrap();
        let desc = snap.iter().find(|d| d.id == v).unwrap();
        assert_eq!(desc.clone_info.clone_mode, CloneMode::Original);
        assert_eq!(desc.clone_info.cloner, None);
        assert_eq!(desc.model.get("x"), Some(&Value::Float(5.0)));
    }

    #[test]
    fn test_import_rejects_inconsistent_batch() {
        let (g, o, _) = scene();
        let mut snap = snapshot(&g).unwrap();
        snap[0].children.clear();
        let mut fresh = SceneGraph::new(NodeFactory::with_builtin_types());
        assert!(import(&mut fresh, &snap).is_err());
        assert!(fresh.is_empty());
        assert!(!fresh.contains(o));
    }

    #[test]
    fn test_import_node_echo_is_ignored() {
        let (mut g, o, _) = scene();
        let desc = describe(&g, o).unwrap();
        assert!(!import_node(&mut g, &desc).unwrap());
    }
}
