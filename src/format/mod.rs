//! Layered cell formats.
//!
//! A cell's effective style is the deep merge of, lowest precedence first:
//! the sheet default, the column default, the row default, every range run
//! covering the cell (in run order) and the cell's own format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

mod layers;

pub use layers::parse_layers;
pub(crate) use layers::{is_layer_field, sheet_default_cleared};

/// A rectangular format run. Bounds are zero-based and inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatRun {
    pub start_row: u32,
    pub end_row: u32,
    pub start_col: u32,
    pub end_col: u32,
    pub format: Value,
}

impl FormatRun {
    pub fn contains(&self, row: u32, col: u32) -> bool {
        (self.start_row..=self.end_row).contains(&row)
            && (self.start_col..=self.end_col).contains(&col)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FormatLayers {
    pub sheet_default: Option<Value>,
    pub cols: BTreeMap<u32, Value>,
    pub rows: BTreeMap<u32, Value>,
    pub runs: Vec<FormatRun>,
}

impl FormatLayers {
    pub fn is_empty(&self) -> bool {
        self.sheet_default.is_none()
            && self.cols.is_empty()
            && self.rows.is_empty()
            && self.runs.is_empty()
    }

    /// Effective format of one cell. Empty results normalize to `None`.
    pub fn resolve(&self, row: u32, col: u32, cell_format: Option<&Value>) -> Option<Value> {
        let runs = self.runs.iter().filter(|run| run.contains(row, col));
        self.merge_layers(row, col, runs, cell_format)
    }

    /// Effective formats for every stored cell of a sheet.
    ///
    /// When runs are sparse relative to the number of stored cells, each run
    /// is binary-searched against the sorted row index instead of testing
    /// every (cell, run) pair.
    pub fn resolve_all(
        &self,
        cells: &BTreeMap<(u32, u32), Option<Value>>,
    ) -> BTreeMap<(u32, u32), Option<Value>> {
        if self.runs.len() >= cells.len() {
            return cells
                .iter()
                .map(|(&(row, col), format)| ((row, col), self.resolve(row, col, format.as_ref())))
                .collect();
        }

        let mut row_index: Vec<u32> = cells.keys().map(|(row, _)| *row).collect();
        row_index.dedup();

        let mut covering: BTreeMap<(u32, u32), Vec<usize>> = BTreeMap::new();
        for (run_idx, run) in self.runs.iter().enumerate() {
            if run.start_row > run.end_row || run.start_col > run.end_col {
                continue;
            }
            let first = row_index.partition_point(|row| *row < run.start_row);
            let last = row_index.partition_point(|row| *row <= run.end_row);
            for &row in &row_index[first..last] {
                let in_row = cells.range((row, run.start_col)..=(row, run.end_col));
                for (&key, _) in in_row {
                    covering.entry(key).or_default().push(run_idx);
                }
            }
        }

        cells
            .iter()
            .map(|(&(row, col), format)| {
                let runs = covering
                    .get(&(row, col))
                    .into_iter()
                    .flatten()
                    .filter_map(|idx| self.runs.get(*idx));
                ((row, col), self.merge_layers(row, col, runs, format.as_ref()))
            })
            .collect()
    }

    fn merge_layers<'a>(
        &'a self,
        row: u32,
        col: u32,
        runs: impl Iterator<Item = &'a FormatRun>,
        cell_format: Option<&Value>,
    ) -> Option<Value> {
        let mut merged = Map::new();
        let layers = self
            .sheet_default
            .iter()
            .chain(self.cols.get(&col))
            .chain(self.rows.get(&row))
            .chain(runs.map(|run| &run.format))
            .chain(cell_format);
        for layer in layers {
            if let Value::Object(layer) = layer {
                deep_merge(&mut merged, layer);
            }
        }
        normalize_format(Value::Object(merged))
    }
}

/// Merges `layer` over `base`. Keys present in `layer` win; keys it lacks
/// leave `base` untouched. Nested objects merge recursively.
pub fn deep_merge(base: &mut Map<String, Value>, layer: &Map<String, Value>) {
    for (key, value) in layer {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Prunes empty nested objects; an empty format becomes `None`.
pub fn normalize_format(format: Value) -> Option<Value> {
    match prune_empty(format) {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        other => Some(other),
    }
}

fn prune_empty(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter_map(|(key, value)| match prune_empty(value) {
                    Value::Object(inner) if inner.is_empty() => None,
                    other => Some((key, other)),
                })
                .collect(),
        ),
        other => other,
    }
}
