use crate::core::{Map, OpId, Sequence};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Value;

/// How a shared type is currently materialized.
///
/// Peers running different code may instantiate the same logical root either
/// way, and a root created by an incoming update has no shape at all until a
/// local code path opens it. The shape is local knowledge and never travels
/// with updates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootShape {
    #[default]
    Unknown,
    Associative,
    Sequential,
}

/// Low-level view of one replicated item, whichever storage it lives in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawItem<'a> {
    pub id: OpId,
    /// `Some` for keyed items, `None` for sequence items.
    pub key: Option<&'a str>,
    /// `None` once the item has been deleted.
    pub content: Option<&'a Value>,
}

impl RawItem<'_> {
    pub fn is_deleted(&self) -> bool {
        self.content.is_none()
    }
}

/// A root or nested shared type.
///
/// Every branch carries both a keyed store and a sequence store. Only one of
/// them is meaningful for the materialized shape; the other collects whatever
/// peers with a different idea of the shape attached to it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Branch {
    shape: RootShape,
    keyed: Map<String, Option<Value>>,
    sequence: Sequence<Value>,
}

impl Branch {
    pub fn with_shape(shape: RootShape) -> Self {
        Self {
            shape,
            keyed: Map::new(),
            sequence: Sequence::new(),
        }
    }

    pub fn shape(&self) -> RootShape {
        self.shape
    }

    pub(crate) fn materialize(&mut self, shape: RootShape) {
        if self.shape == RootShape::Unknown {
            self.shape = shape;
        } else if self.shape != shape {
            debug!(
                materialized = ?self.shape,
                requested = ?shape,
                "shared type opened with a different shape than it was materialized with"
            );
        }
    }

    pub(crate) fn forget_shape(&mut self) {
        self.shape = RootShape::Unknown;
    }

    pub fn has_keyed_items(&self) -> bool {
        !self.keyed.is_empty()
    }

    pub fn has_sequence_items(&self) -> bool {
        !self.sequence.is_empty()
    }

    /// Live value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.keyed.get(&key.to_string()).and_then(Option::as_ref)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Live keyed entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.keyed
            .iter()
            .filter_map(|(key, slot, _)| slot.as_ref().map(|value| (key.as_str(), value)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries().map(|(key, _)| key)
    }

    /// Live sequence values in document order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.sequence.iter()
    }

    pub fn len(&self) -> usize {
        match self.shape {
            RootShape::Sequential => self.sequence.len_visible(),
            _ => self.entries().count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.sequence.iter().nth(index)
    }

    /// Every item ever attached to this branch, deleted ones included:
    /// keyed items in key order first, then sequence items in order.
    pub fn raw_items(&self) -> Vec<RawItem<'_>> {
        let keyed = self.keyed.iter().map(|(key, slot, id)| RawItem {
            id,
            key: Some(key.as_str()),
            content: slot.as_ref(),
        });
        let sequenced = self.sequence.iter_all().map(|elem| RawItem {
            id: elem.id,
            key: None,
            content: elem.value.as_ref(),
        });
        keyed.chain(sequenced).collect()
    }

    /// Plain JSON rendering through the materialized shape.
    pub fn to_json(&self) -> serde_json::Value {
        let as_object = || {
            serde_json::Value::Object(
                self.entries()
                    .map(|(key, value)| (key.to_string(), value.to_json()))
                    .collect(),
            )
        };
        let as_array = || serde_json::Value::Array(self.values().map(Value::to_json).collect());
        match self.shape {
            RootShape::Associative => as_object(),
            RootShape::Sequential => as_array(),
            RootShape::Unknown if self.has_keyed_items() => as_object(),
            RootShape::Unknown => as_array(),
        }
    }

    pub(crate) fn merge_from(&mut self, other: &Branch) {
        if self.shape == RootShape::Unknown {
            self.shape = other.shape;
        }
        for (key, slot, id) in other.keyed.iter() {
            let same_write = self
                .keyed
                .register(key)
                .is_some_and(|register| register.op_id() == id);
            if same_write {
                if let (Some(Some(mine)), Some(theirs)) = (self.keyed.get_mut(key), slot) {
                    mine.merge_from(theirs);
                } else if slot.is_none() {
                    self.keyed.set(key.clone(), None, id);
                }
            } else {
                self.keyed.set(key.clone(), slot.clone(), id);
            }
        }
        self.sequence
            .merge_from(&other.sequence, |mine, theirs| mine.merge_from(theirs));
    }

    pub(crate) fn keyed_mut(&mut self) -> &mut Map<String, Option<Value>> {
        &mut self.keyed
    }

    pub(crate) fn sequence_mut(&mut self) -> &mut Sequence<Value> {
        &mut self.sequence
    }

    pub(crate) fn sequence(&self) -> &Sequence<Value> {
        &self.sequence
    }
}
