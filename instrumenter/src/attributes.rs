//! Insertion ordered attribute storage for span records.

use std::borrow::Borrow;
use std::hash::Hash;

use indexmap::IndexMap;

use crate::{Key, KeyValue, Value};

/// Attributes collected on a span, in first-insertion order.
///
/// Setting an attribute under a key that is already present overwrites the
/// value in place and keeps the key's original position, so repeated
/// `set_attribute` calls never grow the map or reorder earlier entries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeMap(IndexMap<Key, Value>);

impl AttributeMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        AttributeMap(IndexMap::new())
    }

    /// Creates an empty map with space for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        AttributeMap(IndexMap::with_capacity(capacity))
    }

    /// Sets an attribute, overwriting any previous value under the same key.
    pub fn insert(&mut self, kv: KeyValue) {
        self.0.insert(kv.key, kv.value);
    }

    /// Returns the value for `key`, if present.
    pub fn get<Q>(&self, key: &Q) -> Option<&Value>
    where
        Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.0.get(key)
    }

    /// Iterates over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.0.iter()
    }

    /// Number of attributes present.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no attributes have been set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Extend<KeyValue> for AttributeMap {
    fn extend<I: IntoIterator<Item = KeyValue>>(&mut self, iter: I) {
        for kv in iter {
            self.insert(kv);
        }
    }
}

impl Extend<(Key, Value)> for AttributeMap {
    fn extend<I: IntoIterator<Item = (Key, Value)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(KeyValue { key, value });
        }
    }
}

impl FromIterator<KeyValue> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = KeyValue>>(iter: I) -> Self {
        let mut map = AttributeMap::new();
        map.extend(iter);
        map
    }
}

impl IntoIterator for AttributeMap {
    type Item = (Key, Value);
    type IntoIter = indexmap::map::IntoIter<Key, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a AttributeMap {
    type Item = (&'a Key, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, Key, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
