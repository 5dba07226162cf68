//! PropertyMap: the key-value stores on nodes, paths and query options.

use std::collections::BTreeMap;
use super::Value;

/// A map of property names to values.
///
/// Ordered so that property iteration (and therefore pivot order) is
/// deterministic across runs.
pub type PropertyMap = BTreeMap<String, Value>;

/// A map of applied tag names to their values (`Value::Null` when unvalued).
pub type TagMap = BTreeMap<String, Value>;

/// Build a PropertyMap from (key, value) pairs.
pub fn props<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> PropertyMap
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
