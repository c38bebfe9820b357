//! Node factory: type name → schema and construction defaults.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::model::{CloneInfo, NodeDescriptor, NodeId, SceneNode};
use crate::properties::{Constraint, PropertyCategory, PropertySchema, PropertySpec};
use crate::{Error, Result};

/// A registered node type.
#[derive(Debug, Clone)]
pub struct NodeType {
    pub name: String,
    pub schema: Arc<PropertySchema>,
    pub default_name: String,
}

/// Registry of node types.
#[derive(Debug, Clone, Default)]
pub struct NodeFactory {
    types: HashMap<String, NodeType>,
}

impl NodeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory preloaded with `group`, `sprite` and `text`.
    pub fn with_builtin_types() -> Self {
        let mut factory = Self::new();
        factory.register(builtin_group());
        factory.register(builtin_sprite());
        factory.register(builtin_text());
        factory
    }

    /// Register a type under its schema's type name. Replaces any previous
    /// registration with the same name.
    pub fn register(&mut self, schema: PropertySchema) -> &NodeType {
        let name = schema.type_name().to_string();
        let default_name = capitalize(&name);
        self.register_type(NodeType { name, schema: Arc::new(schema), default_name })
    }

    pub fn register_type(&mut self, node_type: NodeType) -> &NodeType {
        let name = node_type.name.clone();
        self.types.insert(name.clone(), node_type);
        &self.types[&name]
    }

    pub fn get(&self, name: &str) -> Result<&NodeType> {
        self.types.get(name).ok_or_else(|| Error::UnknownNodeType(name.to_string()))
    }

    pub fn schema(&self, name: &str) -> Result<Arc<PropertySchema>> {
        self.get(name).map(|t| Arc::clone(&t.schema))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Construct an unattached node of a registered type.
    pub fn instantiate(&self, id: NodeId, type_name: &str, name: Option<&str>, seq: u64) -> Result<SceneNode> {
        let node_type = self.get(type_name)?;
        let name = name.unwrap_or(&node_type.default_name);
        Ok(SceneNode::new(id, type_name, name, seq))
    }

    /// Construct a node from a descriptor. Tree and clone links are copied
    /// verbatim; the caller wires and validates them.
    pub fn from_descriptor(&self, desc: &NodeDescriptor, seq: u64) -> Result<SceneNode> {
        let mut node = self.instantiate(desc.id, &desc.node_type, Some(&desc.name), seq)?;
        node.parent = desc.parent;
        node.children = desc.children.clone();
        node.clone_info = CloneInfo::from(&desc.clone_info);
        node.custom = desc.custom_properties.clone();
        Ok(node)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// Built-in types
// ============================================================================

fn transform(builder: crate::properties::SchemaBuilder) -> crate::properties::SchemaBuilder {
    builder
        .property("x", PropertySpec::new(0.0).category(PropertyCategory::Transform))
        .property("y", PropertySpec::new(0.0).category(PropertyCategory::Transform))
        .property("rotation", PropertySpec::new(0.0).category(PropertyCategory::Transform))
        .property(
            "scale",
            PropertySpec::new(1.0)
                .category(PropertyCategory::Transform)
                .constraint(Constraint::range(0.0, 1000.0)),
        )
}

fn builtin_group() -> PropertySchema {
    transform(PropertySchema::builder("group"))
        .property("visible", PropertySpec::new(true).category(PropertyCategory::Appearance))
        .property("tag", PropertySpec::new("").category(PropertyCategory::Metadata))
        .build()
}

fn builtin_sprite() -> PropertySchema {
    transform(PropertySchema::builder("sprite"))
        .property("visible", PropertySpec::new(true).category(PropertyCategory::Appearance))
        .property(
            "opacity",
            PropertySpec::new(1.0)
                .category(PropertyCategory::Appearance)
                .constraint(Constraint::range(0.0, 1.0)),
        )
        .property("tint", PropertySpec::new("#ffffff").category(PropertyCategory::Appearance))
        .property("image", PropertySpec::new(crate::model::Value::Null).category(PropertyCategory::Content))
        .build()
}

fn builtin_text() -> PropertySchema {
    transform(PropertySchema::builder("text"))
        .property("visible", PropertySpec::new(true).category(PropertyCategory::Appearance))
        .property("text", PropertySpec::new("").category(PropertyCategory::Content))
        .property(
            "font_size",
            PropertySpec::new(16)
                .category(PropertyCategory::Appearance)
                .constraint(Constraint::range(1.0, 512.0)),
        )
        .build()
}
