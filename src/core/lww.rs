use super::OpId;
use std::collections::BTreeMap;

/// A value plus the id of the write that produced it. A write lands only
/// when its id is at least the current one.
#[derive(Debug, Clone, PartialEq)]
pub struct LwwRegister<T> {
    value: T,
    op_id: OpId,
}

impl<T> LwwRegister<T> {
    pub fn new(value: T, op_id: OpId) -> Self {
        Self { value, op_id }
    }

    /// Returns whether the write won.
    pub fn set(&mut self, value: T, op_id: OpId) -> bool {
        if op_id < self.op_id {
            return false;
        }
        self.value = value;
        self.op_id = op_id;
        true
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn op_id(&self) -> OpId {
        self.op_id
    }
}

/// Keyed last-writer-wins registers.
#[derive(Debug, Clone, PartialEq)]
pub struct Map<K, V> {
    registers: BTreeMap<K, LwwRegister<V>>,
}

impl<K, V> Default for Map<K, V> {
    fn default() -> Self {
        Self {
            registers: BTreeMap::new(),
        }
    }
}

impl<K: Ord, V> Map<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: K, value: V, op_id: OpId) {
        match self.registers.get_mut(&key) {
            Some(register) => {
                register.set(value, op_id);
            }
            None => {
                self.registers.insert(key, LwwRegister::new(value, op_id));
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.registers.get(key).map(LwwRegister::get)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.registers.get_mut(key).map(LwwRegister::get_mut)
    }

    pub fn register(&self, key: &K) -> Option<&LwwRegister<V>> {
        self.registers.get(key)
    }

    /// Entries in key order, with the id of the winning write.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V, OpId)> {
        self.registers
            .iter()
            .map(|(key, register)| (key, register.get(), register.op_id()))
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}
