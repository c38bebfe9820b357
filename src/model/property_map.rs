//! PropertyMap: the key-value store backing node models.

use std::collections::{BTreeMap, HashMap};
use super::Value;

/// A map of property names to values.
pub type PropertyMap = HashMap<String, Value>;

/// A partial model update: `None` clears the key from own-values.
///
/// Ordered so datastore batches are deterministic.
pub type ModelPatch = BTreeMap<String, Option<Value>>;

/// Convert iterator of (key, value) pairs into a map value.
impl<K, V> From<Vec<(K, V)>> for Value
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from(pairs: Vec<(K, V)>) -> Self {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Build a `PropertyMap` from (key, value) pairs.
pub fn props<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> PropertyMap
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
