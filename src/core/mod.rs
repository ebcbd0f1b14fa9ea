//! Replicated building blocks under the shared document.
//!
//! Every write is stamped with an [`OpId`]; ids are totally ordered by
//! `(counter, peer)` so concurrent writes resolve the same way on every
//! replica. [`Sequence`] orders list roots (sheet order, legacy comment
//! lists) and [`Map`] holds keyed roots such as the cell map.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod lww;
mod sequence;

pub use lww::{LwwRegister, Map};
pub use sequence::{Element, Sequence, SequenceOp};

pub type PeerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpId {
    pub counter: u64,
    pub peer: PeerId,
}

/// Highest counter seen from each peer.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVector {
    seen: BTreeMap<PeerId, u64>,
}

impl StateVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn get(&self, peer: PeerId) -> Option<u64> {
        self.seen.get(&peer).copied()
    }

    pub fn set(&mut self, peer: PeerId, counter: u64) {
        self.seen.insert(peer, counter);
    }

    pub fn observe(&mut self, id: OpId) {
        let seen = self.seen.entry(id.peer).or_default();
        *seen = (*seen).max(id.counter);
    }

    pub fn merge(&mut self, other: &StateVector) {
        for (&peer, &counter) in &other.seen {
            self.observe(OpId { counter, peer });
        }
    }

    /// Largest counter of any peer; new local ids start above it.
    pub fn max_counter(&self) -> u64 {
        self.seen.values().max().copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_id_orders_by_counter_then_peer() {
        let a = OpId { counter: 1, peer: 9 };
        let b = OpId { counter: 2, peer: 1 };
        let c = OpId { counter: 2, peer: 3 };
        assert!(a < b && b < c);
    }

    #[test]
    fn test_state_vector_merge_keeps_maximum() {
        let mut left = StateVector::new();
        left.set(1, 5);
        left.set(2, 1);
        let mut right = StateVector::new();
        right.set(1, 3);
        right.set(3, 7);

        left.merge(&right);
        assert_eq!(left.get(1), Some(5));
        assert_eq!(left.get(3), Some(7));
        assert_eq!(left.max_counter(), 7);
        assert!(StateVector::new().is_empty());
    }
}
