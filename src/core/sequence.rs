//! RGA list with tombstones.
//!
//! Each element hangs off the element it was inserted after. Siblings of one
//! parent are ordered by their right origin (the element that followed the
//! parent when the insert happened), then by descending id, which keeps
//! concurrent runs from interleaving. Ops whose dependency has not arrived
//! yet wait in `blocked` and are replayed once it does.

use super::OpId;
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, PartialEq)]
pub struct Element<T> {
    pub id: OpId,
    /// `None` once deleted.
    pub value: Option<T>,
    pub after: Option<OpId>,
    pub right_origin: Option<OpId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SequenceOp<T> {
    Insert {
        after: Option<OpId>,
        id: OpId,
        value: T,
        right_origin: Option<OpId>,
    },
    Delete {
        target: OpId,
        id: OpId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sequence<T> {
    nodes: BTreeMap<OpId, Element<T>>,
    /// Children of each parent, in sibling order.
    children: BTreeMap<Option<OpId>, Vec<OpId>>,
    /// Document order, tombstones included.
    order: Vec<OpId>,
    /// Ops keyed by the missing element they depend on.
    blocked: BTreeMap<OpId, Vec<SequenceOp<T>>>,
}

impl<T> Default for Sequence<T> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            children: BTreeMap::new(),
            order: Vec::new(),
            blocked: BTreeMap::new(),
        }
    }
}

impl<T: Clone> Sequence<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local insert after `after` (or at the front).
    pub fn insert(&mut self, after: Option<OpId>, value: T, id: OpId) {
        let next = match after {
            None => 0,
            Some(anchor) => self.index_of(anchor).map_or(self.order.len(), |pos| pos + 1),
        };
        let right_origin = self.order.get(next).copied();
        self.apply(SequenceOp::Insert {
            after,
            id,
            value,
            right_origin,
        });
    }

    pub fn delete(&mut self, target: OpId, id: OpId) {
        self.apply(SequenceOp::Delete { target, id });
    }

    /// Applies a local or remote op. Re-applying an op is a no-op.
    pub fn apply(&mut self, op: SequenceOp<T>) {
        let mut ready = VecDeque::from([op]);
        while let Some(op) = ready.pop_front() {
            match op {
                SequenceOp::Insert {
                    after,
                    id,
                    value,
                    right_origin,
                } => {
                    if let Some(anchor) = after.filter(|anchor| !self.nodes.contains_key(anchor)) {
                        self.block(
                            anchor,
                            SequenceOp::Insert {
                                after,
                                id,
                                value,
                                right_origin,
                            },
                        );
                        continue;
                    }
                    if self.nodes.contains_key(&id) {
                        continue;
                    }
                    self.nodes.insert(
                        id,
                        Element {
                            id,
                            value: Some(value),
                            after,
                            right_origin,
                        },
                    );
                    self.integrate(id, after);
                    ready.extend(self.blocked.remove(&id).into_iter().flatten());
                }
                SequenceOp::Delete { target, id } => match self.nodes.get_mut(&target) {
                    Some(node) => node.value = None,
                    None => self.block(target, SequenceOp::Delete { target, id }),
                },
            }
        }
    }

    fn block(&mut self, dependency: OpId, op: SequenceOp<T>) {
        self.blocked.entry(dependency).or_default().push(op);
    }

    /// Visible values in document order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.iter_all().filter_map(|elem| elem.value.as_ref())
    }

    /// Every element in document order, tombstones included.
    pub fn iter_all(&self) -> impl Iterator<Item = &Element<T>> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    pub fn len_visible(&self) -> usize {
        self.iter().count()
    }

    /// True when no element was ever inserted.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Id of the `index`-th visible element.
    pub fn visible_id(&self, index: usize) -> Option<OpId> {
        self.iter_all()
            .filter(|elem| elem.value.is_some())
            .nth(index)
            .map(|elem| elem.id)
    }

    /// Id of the last element, tombstones included. Appends anchor here.
    pub fn last_id(&self) -> Option<OpId> {
        self.order.last().copied()
    }

    pub fn get_mut(&mut self, id: &OpId) -> Option<&mut T> {
        self.nodes.get_mut(id)?.value.as_mut()
    }

    /// Folds `other` into `self`. Elements known to both sides are combined
    /// with `merge_value`; a deletion on either side sticks.
    pub fn merge_from(&mut self, other: &Sequence<T>, mut merge_value: impl FnMut(&mut T, &T)) {
        let mut reordered = false;
        for theirs in other.nodes.values() {
            match self.nodes.get_mut(&theirs.id) {
                Some(mine) => {
                    if theirs.value.is_none() {
                        mine.value = None;
                    } else if let (Some(value), Some(incoming)) =
                        (mine.value.as_mut(), theirs.value.as_ref())
                    {
                        merge_value(value, incoming);
                    }
                }
                None => {
                    self.nodes.insert(theirs.id, theirs.clone());
                    reordered = true;
                }
            }
        }
        if !reordered {
            return;
        }
        self.relink();

        let unblocked: Vec<OpId> = self
            .blocked
            .keys()
            .filter(|id| self.nodes.contains_key(id))
            .copied()
            .collect();
        for id in unblocked {
            for op in self.blocked.remove(&id).into_iter().flatten() {
                self.apply(op);
            }
        }
    }

    fn index_of(&self, id: OpId) -> Option<usize> {
        self.order.iter().rposition(|candidate| *candidate == id)
    }

    /// Last element of the subtree rooted at `id` in document order.
    fn subtree_last(&self, mut id: OpId) -> OpId {
        while let Some(&child) = self.children.get(&Some(id)).and_then(|kids| kids.last()) {
            id = child;
        }
        id
    }

    /// Places a new leaf whose parent is already ordered: right after the
    /// subtree of the sibling sorting before it, or right after the parent.
    fn integrate(&mut self, id: OpId, after: Option<OpId>) {
        let mut siblings = self.children.remove(&after).unwrap_or_default();
        let slot = siblings
            .partition_point(|sibling| self.sibling_order(sibling, &id) == Ordering::Less);
        let predecessor = match slot.checked_sub(1) {
            Some(prev) => Some(self.subtree_last(siblings[prev])),
            None => after,
        };
        let pos = match predecessor {
            Some(anchor) => self.index_of(anchor).map_or(self.order.len(), |pos| pos + 1),
            None => 0,
        };
        siblings.insert(slot, id);
        self.children.insert(after, siblings);
        self.order.insert(pos, id);
    }

    fn sibling_order(&self, a: &OpId, b: &OpId) -> Ordering {
        let origin = |id: &OpId| self.nodes.get(id).and_then(|node| node.right_origin);
        match (origin(a), origin(b)) {
            (Some(ra), Some(rb)) if ra != rb => ra.cmp(&rb),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            _ => b.cmp(a),
        }
    }

    /// Recomputes sibling lists and document order from scratch with a
    /// pre-order walk of the insert tree.
    fn relink(&mut self) {
        let mut children: BTreeMap<Option<OpId>, Vec<OpId>> = BTreeMap::new();
        for node in self.nodes.values() {
            children.entry(node.after).or_default().push(node.id);
        }
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| self.sibling_order(a, b));
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<OpId> = children
            .get(&None)
            .map(|roots| roots.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(kids) = children.get(&Some(id)) {
                stack.extend(kids.iter().rev());
            }
        }

        self.children = children;
        self.order = order;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(counter: u64, peer: u64) -> OpId {
        OpId { counter, peer }
    }

    #[test]
    fn test_local_inserts_keep_position() {
        let mut seq = Sequence::new();
        seq.insert(None, 'a', id(1, 1));
        seq.insert(Some(id(1, 1)), 'c', id(2, 1));
        seq.insert(Some(id(1, 1)), 'b', id(3, 1));
        assert_eq!(seq.to_vec(), vec!['a', 'b', 'c']);
        assert_eq!(seq.visible_id(1), Some(id(3, 1)));
        assert_eq!(seq.last_id(), Some(id(2, 1)));
    }

    #[test]
    fn test_concurrent_runs_do_not_interleave() {
        let mut base = Sequence::new();
        base.insert(None, 'x', id(1, 1));

        let mut left = base.clone();
        left.insert(Some(id(1, 1)), 'a', id(2, 1));
        left.insert(Some(id(2, 1)), 'b', id(3, 1));
        let mut right = base.clone();
        right.insert(Some(id(1, 1)), 'c', id(2, 2));
        right.insert(Some(id(2, 2)), 'd', id(3, 2));

        let mut merged = left.clone();
        merged.merge_from(&right, |_, _| {});
        let mut other = right.clone();
        other.merge_from(&left, |_, _| {});
        assert_eq!(merged.to_vec(), vec!['x', 'c', 'd', 'a', 'b']);
        assert_eq!(merged.to_vec(), other.to_vec());
    }

    #[test]
    fn test_ops_wait_for_dependencies() {
        let mut seq = Sequence::new();
        seq.apply(SequenceOp::Delete {
            target: id(2, 1),
            id: id(3, 2),
        });
        seq.apply(SequenceOp::Insert {
            after: Some(id(1, 1)),
            id: id(2, 1),
            value: 'b',
            right_origin: None,
        });
        assert!(seq.is_empty());

        seq.apply(SequenceOp::Insert {
            after: None,
            id: id(1, 1),
            value: 'a',
            right_origin: None,
        });
        assert_eq!(seq.to_vec(), vec!['a']);
        assert_eq!(seq.iter_all().count(), 2);
    }

    #[test]
    fn test_incremental_order_matches_rebuild() {
        let mut seq = Sequence::new();
        seq.insert(None, 'a', id(1, 1));
        seq.insert(Some(id(1, 1)), 'b', id(2, 1));
        seq.insert(Some(id(2, 1)), 'c', id(3, 1));
        seq.apply(SequenceOp::Insert {
            after: Some(id(1, 1)),
            id: id(2, 2),
            value: 'x',
            right_origin: Some(id(2, 1)),
        });
        seq.apply(SequenceOp::Insert {
            after: Some(id(1, 1)),
            id: id(3, 3),
            value: 'y',
            right_origin: None,
        });
        seq.insert(None, 'z', id(4, 1));

        let mut rebuilt = seq.clone();
        rebuilt.relink();
        assert_eq!(seq.order, rebuilt.order);
        assert_eq!(seq.children, rebuilt.children);
        assert_eq!(seq.to_vec(), vec!['z', 'a', 'x', 'y', 'b', 'c']);
    }

    #[test]
    fn test_long_chain_does_not_recurse() {
        let mut seq = Sequence::new();
        let mut prev = None;
        for counter in 1..=5_000 {
            seq.insert(prev, counter, id(counter, 1));
            prev = Some(id(counter, 1));
        }
        assert_eq!(seq.len_visible(), 5_000);
    }
}
