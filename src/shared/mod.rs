//! Shared collaborative document.
//!
//! A small replicated document in the shape spreadsheet collaboration code
//! expects: named roots that are either associative (keyed) or sequential
//! (ordered), nested shared types, atomic transactions, and state-based
//! update exchange between peers. Built on the RGA [`Sequence`] and LWW
//! [`Map`] from [`crate::core`].
//!
//! [`Sequence`]: crate::core::Sequence
//! [`Map`]: crate::core::Map

use crate::core::{OpId, PeerId, StateVector};
use std::collections::BTreeMap;

mod branch;
mod value;

pub use branch::{Branch, RawItem, RootShape};
pub use value::Value;

#[derive(Debug, Clone)]
struct Clock {
    peer: PeerId,
    counter: u64,
    state: StateVector,
    changed: bool,
}

impl Clock {
    fn next(&mut self) -> OpId {
        self.counter += 1;
        self.changed = true;
        let id = OpId {
            counter: self.counter,
            peer: self.peer,
        };
        self.state.observe(id);
        id
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    peer: PeerId,
    counter: u64,
    version: u64,
    state: StateVector,
    roots: BTreeMap<String, Branch>,
}

/// Full state of a document as exchanged between peers.
///
/// Root shapes are deliberately absent: a receiving peer only learns a root's
/// shape when its own code opens it.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub state: StateVector,
    roots: BTreeMap<String, Branch>,
}

impl Update {
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl Document {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            counter: 0,
            version: 0,
            state: StateVector::new(),
            roots: BTreeMap::new(),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Number of committed transactions or updates that changed the document.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn state_vector(&self) -> &StateVector {
        &self.state
    }

    pub fn root(&self, name: &str) -> Option<&Branch> {
        self.roots.get(name)
    }

    pub fn root_shape(&self, name: &str) -> RootShape {
        self.roots
            .get(name)
            .map(Branch::shape)
            .unwrap_or(RootShape::Unknown)
    }

    pub fn root_names(&self) -> impl Iterator<Item = &str> {
        self.roots.keys().map(String::as_str)
    }

    /// Runs `f` as one transaction. Clock and version only advance when `f`
    /// actually mutated something.
    pub fn transact<T>(&mut self, f: impl FnOnce(&mut Transaction<'_>) -> T) -> T {
        let mut txn = Transaction {
            roots: &mut self.roots,
            clock: Clock {
                peer: self.peer,
                counter: self.counter,
                state: self.state.clone(),
                changed: false,
            },
        };
        let result = f(&mut txn);
        let Transaction { clock, .. } = txn;
        self.commit(clock);
        result
    }

    /// Like [`Document::transact`], but discards every change made by `f`
    /// when it returns an error.
    pub fn try_transact<T, E>(
        &mut self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let snapshot = self.roots.clone();
        let mut txn = Transaction {
            roots: &mut self.roots,
            clock: Clock {
                peer: self.peer,
                counter: self.counter,
                state: self.state.clone(),
                changed: false,
            },
        };
        let result = f(&mut txn);
        let Transaction { clock, .. } = txn;
        match result {
            Ok(value) => {
                self.commit(clock);
                Ok(value)
            }
            Err(err) => {
                self.roots = snapshot;
                Err(err)
            }
        }
    }

    fn commit(&mut self, clock: Clock) {
        if clock.changed {
            self.counter = clock.counter;
            self.state = clock.state;
            self.version += 1;
        }
    }

    pub fn encode_state(&self) -> Update {
        let roots = self
            .roots
            .iter()
            .map(|(name, branch)| {
                let mut branch = branch.clone();
                branch.forget_shape();
                (name.clone(), branch)
            })
            .collect();
        Update {
            state: self.state.clone(),
            roots,
        }
    }

    pub fn apply_update(&mut self, update: &Update) {
        let mut changed = false;
        for (name, remote) in &update.roots {
            let local = self.roots.entry(name.clone()).or_default();
            let before = local.clone();
            local.merge_from(remote);
            changed |= *local != before;
        }
        self.counter = self.counter.max(update.state.max_counter());
        self.state.merge(&update.state);
        if changed {
            self.version += 1;
        }
    }

    /// Plain JSON rendering of every root, keyed by root name.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.roots
                .iter()
                .map(|(name, branch)| (name.clone(), branch.to_json()))
                .collect(),
        )
    }
}

pub struct Transaction<'doc> {
    roots: &'doc mut BTreeMap<String, Branch>,
    clock: Clock,
}

impl Transaction<'_> {
    pub fn root(&self, name: &str) -> Option<&Branch> {
        self.roots.get(name)
    }

    /// Opens `name` as an associative root, materializing it when its shape
    /// is still unknown.
    pub fn root_map(&mut self, name: &str) -> BranchMut<'_> {
        self.open_root(name, RootShape::Associative)
    }

    /// Opens `name` as a sequential root, materializing it when its shape is
    /// still unknown.
    pub fn root_array(&mut self, name: &str) -> BranchMut<'_> {
        self.open_root(name, RootShape::Sequential)
    }

    /// Mutable access to an existing root without touching its shape.
    pub fn root_mut(&mut self, name: &str) -> Option<BranchMut<'_>> {
        let branch = self.roots.get_mut(name)?;
        Some(BranchMut {
            branch,
            clock: &mut self.clock,
        })
    }

    fn open_root(&mut self, name: &str, shape: RootShape) -> BranchMut<'_> {
        let branch = self.roots.entry(name.to_string()).or_default();
        branch.materialize(shape);
        BranchMut {
            branch,
            clock: &mut self.clock,
        }
    }
}

/// Mutable handle to a branch inside a transaction.
pub struct BranchMut<'a> {
    branch: &'a mut Branch,
    clock: &'a mut Clock,
}

impl BranchMut<'_> {
    pub fn branch(&self) -> &Branch {
        self.branch
    }

    pub fn shape(&self) -> RootShape {
        self.branch.shape()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        let id = self.clock.next();
        self.branch
            .keyed_mut()
            .set(key.to_string(), Some(value.into()), id);
    }

    pub fn insert_map(&mut self, key: &str) -> BranchMut<'_> {
        self.insert_nested(key, RootShape::Associative)
    }

    pub fn insert_array(&mut self, key: &str) -> BranchMut<'_> {
        self.insert_nested(key, RootShape::Sequential)
    }

    fn insert_nested(&mut self, key: &str, shape: RootShape) -> BranchMut<'_> {
        let id = self.clock.next();
        let keyed = self.branch.keyed_mut();
        keyed.set(
            key.to_string(),
            Some(Value::Shared(Branch::with_shape(shape))),
            id,
        );
        let nested = keyed
            .get_mut(&key.to_string())
            .and_then(Option::as_mut)
            .and_then(Value::as_branch_mut);
        match nested {
            Some(branch) => BranchMut {
                branch,
                clock: &mut *self.clock,
            },
            // The entry was written above with a fresh id, so it is always present.
            None => unreachable!("nested branch missing right after insertion"),
        }
    }

    /// Deletes a live keyed entry. Returns whether anything was deleted.
    pub fn remove(&mut self, key: &str) -> bool {
        if !self.branch.contains_key(key) {
            return false;
        }
        let id = self.clock.next();
        self.branch.keyed_mut().set(key.to_string(), None, id);
        true
    }

    /// Deletes every live keyed entry.
    pub fn clear(&mut self) {
        let keys: Vec<String> = self.branch.keys().map(str::to_string).collect();
        for key in keys {
            self.remove(&key);
        }
    }

    /// Mutable handle to the nested shared type stored under `key`.
    pub fn get_mut(&mut self, key: &str) -> Option<BranchMut<'_>> {
        let branch = self
            .branch
            .keyed_mut()
            .get_mut(&key.to_string())?
            .as_mut()?
            .as_branch_mut()?;
        Some(BranchMut {
            branch,
            clock: &mut *self.clock,
        })
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        let id = self.clock.next();
        let after = self.branch.sequence().last_id();
        self.branch.sequence_mut().insert(after, value.into(), id);
    }

    pub fn push_map(&mut self) -> BranchMut<'_> {
        let id = self.clock.next();
        let after = self.branch.sequence().last_id();
        self.branch.sequence_mut().insert(
            after,
            Value::Shared(Branch::with_shape(RootShape::Associative)),
            id,
        );
        self.sequence_branch(id)
    }

    pub fn push_array(&mut self) -> BranchMut<'_> {
        let id = self.clock.next();
        let after = self.branch.sequence().last_id();
        self.branch.sequence_mut().insert(
            after,
            Value::Shared(Branch::with_shape(RootShape::Sequential)),
            id,
        );
        self.sequence_branch(id)
    }

    fn sequence_branch(&mut self, id: OpId) -> BranchMut<'_> {
        match self
            .branch
            .sequence_mut()
            .get_mut(&id)
            .and_then(Value::as_branch_mut)
        {
            Some(branch) => BranchMut {
                branch,
                clock: &mut *self.clock,
            },
            None => unreachable!("sequence element missing right after insertion"),
        }
    }

    /// Inserts before the `index`-th visible element, appending when `index`
    /// is past the end.
    pub fn insert_at(&mut self, index: usize, value: impl Into<Value>) {
        let len = self.branch.sequence().len_visible();
        if index >= len {
            self.push(value);
            return;
        }
        let after = match index {
            0 => None,
            _ => self.branch.sequence().visible_id(index - 1),
        };
        let id = self.clock.next();
        self.branch.sequence_mut().insert(after, value.into(), id);
    }

    /// Inserts a nested map before the `index`-th visible element.
    pub fn insert_map_at(&mut self, index: usize) -> BranchMut<'_> {
        let sequence = self.branch.sequence();
        let after = match index {
            0 => None,
            _ if index >= sequence.len_visible() => sequence.last_id(),
            _ => sequence.visible_id(index - 1),
        };
        let id = self.clock.next();
        self.branch.sequence_mut().insert(
            after,
            Value::Shared(Branch::with_shape(RootShape::Associative)),
            id,
        );
        self.sequence_branch(id)
    }

    /// Deletes the `index`-th visible element.
    pub fn delete_at(&mut self, index: usize) -> bool {
        let Some(target) = self.branch.sequence().visible_id(index) else {
            return false;
        };
        let id = self.clock.next();
        self.branch.sequence_mut().delete(target, id);
        true
    }

    /// Deletes `len` visible elements starting at `index`.
    pub fn delete_range(&mut self, index: usize, len: usize) {
        for _ in 0..len {
            if !self.delete_at(index) {
                break;
            }
        }
    }

    /// Mutable handle to the nested shared type at visible position `index`.
    pub fn get_index_mut(&mut self, index: usize) -> Option<BranchMut<'_>> {
        let id = self.branch.sequence().visible_id(index)?;
        let branch = self
            .branch
            .sequence_mut()
            .get_mut(&id)?
            .as_branch_mut()?;
        Some(BranchMut {
            branch,
            clock: &mut *self.clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transaction_without_changes_keeps_version() {
        let mut doc = Document::new(1);
        doc.transact(|txn| {
            txn.root_map("cells");
        });
        assert_eq!(doc.version(), 0);
        assert_eq!(doc.root_shape("cells"), RootShape::Associative);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let mut doc = Document::new(1);
        let result: Result<(), &str> = doc.try_transact(|txn| {
            txn.root_map("metadata").insert("title", json!("Budget"));
            Err("abort")
        });
        assert!(result.is_err());
        assert!(doc.root("metadata").is_none());
        assert_eq!(doc.version(), 0);
    }

    #[test]
    fn test_nested_types_render_as_json() {
        let mut doc = Document::new(1);
        doc.transact(|txn| {
            let mut sheets = txn.root_array("sheets");
            let mut sheet = sheets.push_map();
            sheet.insert("id", json!("s1"));
            let mut runs = sheet.insert_array("runs");
            runs.push(json!(1));
            runs.push(json!(2));
        });
        assert_eq!(
            doc.to_json(),
            json!({"sheets": [{"id": "s1", "runs": [1, 2]}]})
        );
    }

    #[test]
    fn test_array_insert_and_delete_positions() {
        let mut doc = Document::new(1);
        doc.transact(|txn| {
            let mut list = txn.root_array("list");
            list.push(json!("a"));
            list.push(json!("c"));
            list.insert_at(1, json!("b"));
            list.insert_at(0, json!("start"));
            list.delete_at(2);
        });
        assert_eq!(doc.to_json(), json!({"list": ["start", "a", "c"]}));
    }

    #[test]
    fn test_update_does_not_carry_root_shape() {
        let mut old_peer = Document::new(1);
        old_peer.transact(|txn| {
            txn.root_array("comments").push(json!({"id": "c1"}));
        });

        let mut new_peer = Document::new(2);
        new_peer.apply_update(&old_peer.encode_state());
        assert_eq!(new_peer.root_shape("comments"), RootShape::Unknown);
        assert!(new_peer.root("comments").is_some_and(Branch::has_sequence_items));
    }

    #[test]
    fn test_concurrent_keyed_writes_converge() {
        let mut a = Document::new(1);
        let mut b = Document::new(2);
        a.transact(|txn| txn.root_map("metadata").insert("k", json!("from-a")));
        b.transact(|txn| txn.root_map("metadata").insert("k", json!("from-b")));

        let from_a = a.encode_state();
        let from_b = b.encode_state();
        a.apply_update(&from_b);
        b.apply_update(&from_a);

        let read = |doc: &Document| doc.root("metadata").and_then(|root| root.get("k")).cloned();
        assert_eq!(read(&a), read(&b));
        assert_eq!(read(&a), Some(Value::Any(json!("from-b"))));
    }
}
