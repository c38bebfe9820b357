//! Immutable per-type property schema.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::Constraint;
use crate::model::Value;

/// Key under which constraints apply to every property.
pub const WILDCARD: &str = "*";

/// Inspector grouping for a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PropertyCategory {
    Transform,
    Appearance,
    #[default]
    Content,
    Behavior,
    Metadata,
}

impl PropertyCategory {
    /// Instance-local keys may be edited on a reference root without
    /// touching the referenced source.
    pub fn is_instance_local(self) -> bool {
        matches!(self, PropertyCategory::Transform | PropertyCategory::Metadata)
    }
}

/// Declaration of one property key.
#[derive(Debug, Clone)]
pub struct PropertySpec {
    pub default: Value,
    pub category: PropertyCategory,
    pub constraints: SmallVec<[Constraint; 2]>,
}

impl PropertySpec {
    pub fn new(default: impl Into<Value>) -> Self {
        Self {
            default: default.into(),
            category: PropertyCategory::default(),
            constraints: SmallVec::new(),
        }
    }

    pub fn category(mut self, category: PropertyCategory) -> Self {
        self.category = category;
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// Ordered property declarations for one node type.
#[derive(Debug, Clone)]
pub struct PropertySchema {
    type_name: String,
    keys: Vec<String>,
    specs: HashMap<String, PropertySpec>,
    wildcard: SmallVec<[Constraint; 2]>,
}

impl PropertySchema {
    pub fn builder(type_name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            schema: PropertySchema {
                type_name: type_name.into(),
                keys: Vec::new(),
                specs: HashMap::new(),
                wildcard: SmallVec::new(),
            },
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Keys in declaration order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.specs.contains_key(key)
    }

    pub fn spec(&self, key: &str) -> Option<&PropertySpec> {
        self.specs.get(key)
    }

    /// Schema default; `Null` for undeclared keys.
    pub fn default_value(&self, key: &str) -> Value {
        self.specs.get(key).map(|s| s.default.clone()).unwrap_or(Value::Null)
    }

    pub fn category(&self, key: &str) -> Option<PropertyCategory> {
        self.specs.get(key).map(|s| s.category)
    }

    /// Wildcard constraints first, then the key's own.
    pub fn constraints_for<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a Constraint> + 'a {
        let own = self.specs.get(key).map(|s| s.constraints.as_slice()).unwrap_or(&[]);
        self.wildcard.iter().chain(own.iter())
    }
}

/// Builder for [`PropertySchema`]. Declaration order is key order.
pub struct SchemaBuilder {
    schema: PropertySchema,
}

impl SchemaBuilder {
    pub fn property(mut self, key: impl Into<String>, spec: PropertySpec) -> Self {
        let key = key.into();
        if self.schema.specs.insert(key.clone(), spec).is_none() {
            self.schema.keys.push(key);
        }
        self
    }

    /// Shorthand for a content property with only a default.
    pub fn value(self, key: impl Into<String>, default: impl Into<Value>) -> Self {
        self.property(key, PropertySpec::new(default))
    }

    /// Constraint applied to every key before the key's own.
    pub fn wildcard(mut self, constraint: Constraint) -> Self {
        self.schema.wildcard.push(constraint);
        self
    }

    pub fn build(self) -> PropertySchema {
        self.schema
    }
}
