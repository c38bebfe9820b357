//! Serialized node descriptor exchanged with the datastore and export.

use serde::{Deserialize, Serialize};

use super::{CloneInfo, CloneMode, CustomProperties, NodeId, PropertyMap};

/// Wire form of a node.
///
/// ```json
/// { "id": 4, "name": "Door", "created": 4, "type": "sprite", "parent": 1,
///   "children": [], "model": {"x": 5},
///   "cloneInfo": {"cloner": 2, "cloneMode": "Variant", "cloned": []},
///   "customProperties": {"defined": {}, "assigned": {}} }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub id: NodeId,
    pub name: String,
    /// Creation sequence.
    pub created: u64,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub children: Vec<NodeId>,
    /// Own values only; inherited values are not serialized.
    #[serde(default)]
    pub model: PropertyMap,
    #[serde(default)]
    pub clone_info: CloneInfoDescriptor,
    #[serde(default)]
    pub custom_properties: CustomProperties,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneInfoDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloner: Option<NodeId>,
    pub clone_mode: CloneMode,
    #[serde(default)]
    pub cloned: Vec<NodeId>,
}

impl From<&CloneInfo> for CloneInfoDescriptor {
    fn from(info: &CloneInfo) -> Self {
        Self {
            cloner: info.cloner,
            clone_mode: info.mode,
            cloned: info.cloned.to_vec(),
        }
    }
}

impl From<&CloneInfoDescriptor> for CloneInfo {
    fn from(desc: &CloneInfoDescriptor) -> Self {
        Self {
            mode: desc.clone_mode,
            cloner: desc.cloner,
            cloned: desc.cloned.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_parent_and_cloner_are_omitted() {
        let desc = NodeDescriptor {
            id: NodeId(1),
            name: "Root".into(),
            created: 1,
            node_type: "group".into(),
            parent: None,
            children: vec![NodeId(2)],
            model: PropertyMap::new(),
            clone_info: CloneInfoDescriptor::default(),
            custom_properties: CustomProperties::default(),
        };
        let json = serde_json::to_value(&desc).unwrap();
        assert!(json.get("parent").is_none());
        assert!(json["cloneInfo"].get("cloner").is_none());
        assert_eq!(json["cloneInfo"]["cloneMode"], "Original");
        assert_eq!(json["type"], "group");
        assert_eq!(json["children"], serde_json::json!([2]));
    }

    #[test]
    fn test_descriptor_parses_minimal_json() {
        let desc: NodeDescriptor = serde_json::from_str(
            r#"{"id": 7, "name": "Lamp", "created": 3, "type": "sprite",
                "parent": 1, "cloneInfo": {"cloner": 5, "cloneMode": "Reference"}}"#,
        )
        .unwrap();
        assert_eq!(desc.parent, Some(NodeId(1)));
        assert_eq!(desc.clone_info.cloner, Some(NodeId(5)));
        assert_eq!(desc.clone_info.clone_mode, CloneMode::Reference);
        assert!(desc.children.is_empty());
        assert!(desc.custom_properties.is_empty());
    }
}
