//! # Resource Contract
//!
//! Assets (images, fonts, audio) are referenced from property values by an
//! [`AssetRef`] and fetched lazily through an injected [`ResourceProvider`].
//! Fetching is the only asynchronous edge of the engine: it never touches
//! the graph, and a pending fetch does not change any effective value.

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::model::{NodeId, Value};
use crate::{Error, Result};

/// Typed pointer to a stored asset, kept in a model as
/// `{"kind": ..., "key": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    pub kind: String,
    /// Opaque storage key understood by the provider.
    pub key: String,
}

impl AssetRef {
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self { kind: kind.into(), key: key.into() }
    }

    pub fn to_value(&self) -> Value {
        Value::from(vec![
            ("kind", Value::from(self.kind.as_str())),
            ("key", Value::from(self.key.as_str())),
        ])
    }

    /// Read an asset reference out of a property value.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value.as_map().ok_or_else(|| Error::TypeMismatch {
            expected: "asset".into(),
            got: value.type_name().into(),
        })?;
        let field = |name: &str| {
            map.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::TypeMismatch {
                    expected: format!("asset.{name}: string"),
                    got: map.get(name).map_or("missing", Value::type_name).into(),
                })
        };
        Ok(Self { kind: field("kind")?, key: field("key")? })
    }
}

impl From<AssetRef> for Value {
    fn from(asset: AssetRef) -> Self {
        asset.to_value()
    }
}

/// Injected storage provider.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Decoded handle type (texture id, font object, ...).
    type Handle: Clone + Send + Sync;

    async fn fetch(&self, asset: &AssetRef) -> Result<Self::Handle>;
}

/// Per-node cache of resolved handles.
///
/// A node resolves at most once per asset: a second request for the same
/// asset returns the cached handle, a request after the node's asset
/// changed fetches again.
#[derive(Debug)]
pub struct ResourceCache<H> {
    resolved: HashMap<NodeId, (AssetRef, H)>,
}

impl<H> Default for ResourceCache<H> {
    fn default() -> Self {
        Self { resolved: HashMap::new() }
    }
}

impl<H: Clone + Send + Sync> ResourceCache<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: NodeId) -> Option<&H> {
        self.resolved.get(&node).map(|(_, h)| h)
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    pub fn evict(&mut self, node: NodeId) -> Option<H> {
        self.resolved.remove(&node).map(|(_, h)| h)
    }

    /// Resolve the asset held in `value` for `node`, checking that it is of
    /// `expected_kind`. Kind mismatches are domain errors, fetch failures
    /// are passed through untouched.
    pub async fn get_resource<P>(
        &mut self,
        node: NodeId,
        value: &Value,
        expected_kind: &str,
        provider: &P,
    ) -> Result<H>
    where
        P: ResourceProvider<Handle = H> + ?Sized,
    {
        let asset = AssetRef::from_value(value)?;
        if asset.kind != expected_kind {
            return Err(Error::TypeMismatch { expected: expected_kind.into(), got: asset.kind });
        }
        if let Some((cached, handle)) = self.resolved.get(&node) {
            if *cached == asset {
                return Ok(handle.clone());
            }
        }

        tracing::trace!(%node, key = %asset.key, "fetching resource");
        let handle = provider.fetch(&asset).await?;
        self.resolved.insert(node, (asset, handle.clone()));
        Ok(handle)
    }
}
