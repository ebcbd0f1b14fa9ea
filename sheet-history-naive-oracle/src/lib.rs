//! Naive reference implementations for differential testing.
//!
//! Each oracle trades speed for obviousness: a quadratic LCS table instead of
//! Myers, a per-cell scan of every format run instead of the row index, and a
//! rebuild-from-scratch RGA instead of the indexed sequence.

use serde_json::{Map, Value};
use sheet_history::core::{OpId, SequenceOp};
use sheet_history::{DiffOp, DiffOpKind, FormatLayers};
use std::collections::BTreeMap;

/// Minimal edit script via a full LCS table. Ties prefer deletions before
/// insertions, matching the order Myers emits.
pub fn lcs_edit_script(old: &[String], new: &[String]) -> Vec<DiffOp<String>> {
    let (n, m) = (old.len(), new.len());
    // lcs[i][j] = LCS length of old[i..] and new[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut ops: Vec<DiffOp<String>> = Vec::new();
    let mut push = |kind: DiffOpKind, token: &String| match ops.last_mut() {
        Some(last) if last.kind == kind => last.tokens.push(token.clone()),
        _ => ops.push(DiffOp::new(kind, vec![token.clone()])),
    };
    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m && old[i] == new[j] {
            push(DiffOpKind::Equal, &old[i]);
            i += 1;
            j += 1;
        } else if i < n && (j == m || lcs[i + 1][j] >= lcs[i][j + 1]) {
            push(DiffOpKind::Delete, &old[i]);
            i += 1;
        } else {
            push(DiffOpKind::Insert, &new[j]);
            j += 1;
        }
    }
    ops
}

/// Applies an edit script to `old`, returning the reconstructed new side.
pub fn apply_edit_script(old: &[String], ops: &[DiffOp<String>]) -> Option<Vec<String>> {
    let mut out = Vec::new();
    let mut pos = 0;
    for op in ops {
        match op.kind {
            DiffOpKind::Equal | DiffOpKind::Delete => {
                let end = pos + op.tokens.len();
                if old.get(pos..end)? != op.tokens.as_slice() {
                    return None;
                }
                if op.kind == DiffOpKind::Equal {
                    out.extend(op.tokens.iter().cloned());
                }
                pos = end;
            }
            DiffOpKind::Insert => out.extend(op.tokens.iter().cloned()),
        }
    }
    (pos == old.len()).then_some(out)
}

pub fn edit_count(ops: &[DiffOp<String>]) -> usize {
    ops.iter()
        .filter(|op| op.kind != DiffOpKind::Equal)
        .map(|op| op.tokens.len())
        .sum()
}

/// Effective format by testing every layer against the cell.
pub fn naive_effective_format(
    layers: &FormatLayers,
    row: u32,
    col: u32,
    cell_format: Option<&Value>,
) -> Option<Value> {
    let mut stack: Vec<&Value> = Vec::new();
    stack.extend(layers.sheet_default.iter());
    stack.extend(layers.cols.get(&col));
    stack.extend(layers.rows.get(&row));
    for run in &layers.runs {
        if run.start_row <= row && row <= run.end_row && run.start_col <= col && col <= run.end_col {
            stack.push(&run.format);
        }
    }
    stack.extend(cell_format);

    let mut merged = Value::Object(Map::new());
    for layer in stack {
        if layer.is_object() {
            merged = merge(merged, layer);
        }
    }
    let pruned = prune(merged);
    match pruned {
        Value::Object(map) if map.is_empty() => None,
        other => Some(other),
    }
}

fn merge(base: Value, layer: &Value) -> Value {
    match (base, layer) {
        (Value::Object(mut base), Value::Object(layer)) => {
            for (key, value) in layer {
                let existing = base.remove(key).unwrap_or(Value::Null);
                let merged = if existing.is_object() && value.is_object() {
                    merge(existing, value)
                } else {
                    value.clone()
                };
                base.insert(key.clone(), merged);
            }
            Value::Object(base)
        }
        (_, layer) => layer.clone(),
    }
}

fn prune(value: Value) -> Value {
    let Value::Object(map) = value else {
        return value;
    };
    let mut out = Map::new();
    for (key, value) in map {
        let value = prune(value);
        if value.as_object().is_some_and(Map::is_empty) {
            continue;
        }
        out.insert(key, value);
    }
    Value::Object(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node<T> {
    value: Option<T>,
    after: Option<OpId>,
    right_origin: Option<OpId>,
}

/// RGA sequence that recomputes the whole order after every insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaiveSequence<T> {
    nodes: BTreeMap<OpId, Node<T>>,
}

impl<T> Default for NaiveSequence<T> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }
}

impl<T: Clone> NaiveSequence<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts and deletes arriving before their dependencies are dropped,
    /// so callers must deliver ops in causal order.
    pub fn apply(&mut self, op: SequenceOp<T>) {
        match op {
            SequenceOp::Insert {
                after,
                id,
                value,
                right_origin,
            } => {
                self.nodes.entry(id).or_insert(Node {
                    value: Some(value),
                    after,
                    right_origin,
                });
            }
            SequenceOp::Delete { target, .. } => {
                if let Some(node) = self.nodes.get_mut(&target) {
                    node.value = None;
                }
            }
        }
    }

    pub fn values(&self) -> Vec<T> {
        let mut children: BTreeMap<Option<OpId>, Vec<OpId>> = BTreeMap::new();
        for (id, node) in &self.nodes {
            children.entry(node.after).or_default().push(*id);
        }
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| {
                let ra = self.nodes.get(a).and_then(|node| node.right_origin);
                let rb = self.nodes.get(b).and_then(|node| node.right_origin);
                match (ra, rb) {
                    (Some(ra), Some(rb)) if ra != rb => ra.cmp(&rb),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    _ => b.cmp(a),
                }
            });
        }

        let mut out = Vec::new();
        let mut stack: Vec<OpId> = children.get(&None).into_iter().flatten().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if let Some(value) = self.nodes.get(&id).and_then(|node| node.value.clone()) {
                out.push(value);
            }
            if let Some(kids) = children.get(&Some(id)) {
                stack.extend(kids.iter().rev().copied());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(text: &str) -> Vec<String> {
        text.chars().map(String::from).collect()
    }

    #[test]
    fn test_lcs_script_rebuilds_target() {
        let (old, new) = (strs("abcabba"), strs("cbabac"));
        let ops = lcs_edit_script(&old, &new);
        assert_eq!(apply_edit_script(&old, &ops), Some(new));
        assert_eq!(edit_count(&ops), 5);
    }

    #[test]
    fn test_naive_sequence_orders_concurrent_inserts() {
        let mut seq = NaiveSequence::new();
        let a = OpId { counter: 1, peer: 1 };
        let b = OpId { counter: 1, peer: 2 };
        seq.apply(SequenceOp::Insert {
            after: None,
            id: a,
            value: 'a',
            right_origin: None,
        });
        seq.apply(SequenceOp::Insert {
            after: None,
            id: b,
            value: 'b',
            right_origin: None,
        });
        // Higher id first among siblings.
        assert_eq!(seq.values(), vec!['b', 'a']);
        seq.apply(SequenceOp::Delete {
            target: b,
            id: OpId { counter: 2, peer: 1 },
        });
        assert_eq!(seq.values(), vec!['a']);
    }
}
