//! Semantic diffs over spreadsheet snapshots.
//!
//! Snapshots come either from a live document ([`WorkbookState::from_document_state`])
//! or from stored version bytes ([`WorkbookState::from_snapshot_bytes`]). Cell
//! formats in a snapshot are already resolved through every format layer, so
//! a style change on a column shows up as format-only changes on the cells it
//! covers.

use crate::state::address::index_to_a1;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

mod history;
mod sheet;
mod snapshot;
mod workbook;

pub use history::{
    DirVersionStore, InMemoryVersionStore, VersionRecord, VersionStore,
    diff_sheet_version_against_current, diff_sheet_versions,
    diff_workbook_version_against_current, diff_workbook_versions,
};
pub use sheet::{diff_sheet_states, diff_sheet_states_with};
pub use workbook::{
    KeyedChange, KeyedDiff, KeyedEntry, SheetDiffEntry, SheetInfo, SheetRef, SheetRename,
    SheetsDiff, WorkbookDiff, WorkbookState, diff_workbooks, diff_workbooks_with,
};

/// Diff behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiffConfig {
    /// Compare formulas by their normalized form, so `=B1+A1` against
    /// `=a1+b1` is not a modification.
    pub semantic_formulas: bool,
    /// Pair equal-content removed and added cells into moves.
    pub move_detection: bool,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            semantic_formulas: true,
            move_detection: true,
        }
    }
}

/// Zero-based cell coordinates, ordered row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellCoord {
    pub row: u32,
    pub col: u32,
}

impl CellCoord {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    pub fn a1(&self) -> String {
        index_to_a1(self.row, self.col)
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.a1())
    }
}

/// A cell as the differ sees it. `format` is the effective format.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellSnapshot {
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
}

impl CellSnapshot {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn formula(formula: impl Into<String>) -> Self {
        Self {
            formula: Some(formula.into()),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: Value) -> Self {
        self.format = Some(format);
        self
    }

    pub fn has_content(&self) -> bool {
        !self.value.is_null() || self.formula.is_some() || self.enc.is_some()
    }
}

/// Cells of one sheet keyed by coordinates.
pub type SheetState = BTreeMap<CellCoord, CellSnapshot>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellChange {
    pub cell: CellCoord,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<CellSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<CellSnapshot>,
}

impl CellChange {
    fn new(cell: CellCoord, before: Option<&CellSnapshot>, after: Option<&CellSnapshot>) -> Self {
        Self {
            cell,
            address: cell.a1(),
            before: before.cloned(),
            after: after.cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveChange {
    pub from: CellCoord,
    pub to: CellCoord,
    pub from_address: String,
    pub to_address: String,
    pub before: CellSnapshot,
    pub after: CellSnapshot,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetDiff {
    pub added: Vec<CellChange>,
    pub removed: Vec<CellChange>,
    pub modified: Vec<CellChange>,
    pub format_only: Vec<CellChange>,
    pub moved: Vec<MoveChange>,
}

impl SheetDiff {
    pub fn is_empty(&self) -> bool {
        self.change_count() == 0
    }

    pub fn change_count(&self) -> usize {
        self.added.len()
            + self.removed.len()
            + self.modified.len()
            + self.format_only.len()
            + self.moved.len()
    }
}
