//! Canonical document state.
//!
//! [`DocumentState`] is the diffable, independently owned snapshot extracted
//! from a live shared document by [`read_document_state`] and written back by
//! [`apply_document_state`]. Cells are addressed in A1 notation here; the
//! shared document uses zero-based `sheetId:row:col` keys.

use crate::format::{FormatLayers, FormatRun};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

pub mod address;
mod reader;
mod writer;

pub use reader::{ReaderOptions, probe_root_shape, read_document_state, read_document_state_with};
pub use writer::apply_document_state;

pub const SCHEMA_VERSION: u32 = 1;

/// Names of the shared document roots.
pub mod roots {
    pub const SHEETS: &str = "sheets";
    pub const CELLS: &str = "cells";
    pub const NAMED_RANGES: &str = "namedRanges";
    pub const METADATA: &str = "metadata";
    pub const COMMENTS: &str = "comments";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    pub schema_version: u32,
    pub sheets: SheetsState,
    /// sheet id → A1 address → cell
    pub cells: BTreeMap<String, BTreeMap<String, Cell>>,
    #[serde(default)]
    pub named_ranges: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub comments: BTreeMap<String, Value>,
}

impl Default for DocumentState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            sheets: SheetsState::default(),
            cells: BTreeMap::new(),
            named_ranges: BTreeMap::new(),
            metadata: BTreeMap::new(),
            comments: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetsState {
    pub order: Vec<String>,
    pub meta_by_id: BTreeMap<String, SheetMeta>,
}

impl SheetsState {
    /// Sheet ids in display order: explicit order first, then any sheet with
    /// metadata but no position, sorted by id.
    pub fn ordered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in &self.order {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        for id in self.meta_by_id.keys() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
    VeryHidden,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Visible => "visible",
            Visibility::Hidden => "hidden",
            Visibility::VeryHidden => "veryHidden",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "visible" => Some(Visibility::Visible),
            "hidden" => Some(Visibility::Hidden),
            "veryHidden" | "very_hidden" | "veryhidden" => Some(Visibility::VeryHidden),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_color: Option<String>,
    #[serde(default)]
    pub view: SheetView,
}

impl SheetMeta {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            visibility: Visibility::Visible,
            tab_color: None,
            view: SheetView::default(),
        }
    }
}

/// A field where an explicit `null` ("cleared") differs from "not specified".
#[derive(Debug, Default, Clone, PartialEq)]
pub enum Nullable<T> {
    #[default]
    Absent,
    Null,
    Value(T),
}

impl<T> Nullable<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Nullable::Absent)
    }

    pub fn as_value(&self) -> Option<&T> {
        match self {
            Nullable::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl<T: Serialize> Serialize for Nullable<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Nullable::Value(value) => value.serialize(serializer),
            _ => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Nullable<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => Nullable::Value(value),
            None => Nullable::Null,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedRange {
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: u32,
    pub end_col: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetView {
    #[serde(default)]
    pub frozen_rows: u32,
    #[serde(default)]
    pub frozen_cols: u32,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub default_format: Nullable<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub row_formats: BTreeMap<u32, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub col_formats: BTreeMap<u32, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub format_runs: Vec<FormatRun>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub merged_ranges: Nullable<Vec<MergedRange>>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub drawings: Nullable<Value>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub background_image_id: Nullable<String>,
}

impl SheetView {
    pub fn layers(&self) -> FormatLayers {
        FormatLayers {
            sheet_default: self.default_format.as_value().cloned(),
            cols: self.col_formats.clone(),
            rows: self.row_formats.clone(),
            runs: self.format_runs.clone(),
        }
    }
}

/// What a cell holds. Exactly one of value, formula or ciphertext.
#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    Value(Value),
    Formula(String),
    /// Opaque ciphertext; takes precedence over plaintext fields on read.
    Encrypted(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CellRepr", into = "CellRepr")]
pub struct Cell {
    pub content: CellContent,
    pub format: Option<Value>,
}

impl Cell {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            content: CellContent::Value(value.into()),
            format: None,
        }
    }

    pub fn formula(formula: impl Into<String>) -> Self {
        Self {
            content: CellContent::Formula(formula.into()),
            format: None,
        }
    }

    pub fn encrypted(payload: Value) -> Self {
        Self {
            content: CellContent::Encrypted(payload),
            format: None,
        }
    }

    pub fn with_format(mut self, format: Value) -> Self {
        self.format = Some(format);
        self
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.content, CellContent::Encrypted(_))
    }

    /// A cell with no content and no format carries nothing worth keeping.
    pub fn is_empty(&self) -> bool {
        self.format.is_none() && matches!(self.content, CellContent::Value(Value::Null))
    }

    /// Builds a cell from loose fields, applying `enc` > `formula` > `value`.
    pub fn from_fields(
        value: Option<Value>,
        formula: Option<String>,
        enc: Option<Value>,
        format: Option<Value>,
    ) -> Self {
        let content = match (enc.filter(|enc| !enc.is_null()), formula) {
            (Some(enc), _) => CellContent::Encrypted(enc),
            (None, Some(formula)) if !formula.trim().is_empty() => CellContent::Formula(formula),
            _ => CellContent::Value(value.unwrap_or(Value::Null)),
        };
        Self {
            content,
            format: format.filter(|format| !format.is_null()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CellRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enc: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
}

impl From<CellRepr> for Cell {
    fn from(repr: CellRepr) -> Self {
        Cell::from_fields(repr.value, repr.formula, repr.enc, repr.format)
    }
}

impl From<Cell> for CellRepr {
    fn from(cell: Cell) -> Self {
        let (value, formula, enc) = match cell.content {
            CellContent::Value(value) => (Some(value), None, None),
            CellContent::Formula(formula) => (None, Some(formula), None),
            CellContent::Encrypted(enc) => (None, None, Some(enc)),
        };
        Self {
            value,
            formula,
            enc,
            format: cell.format,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cell_precedence_on_deserialize() {
        let cell: Cell = serde_json::from_value(json!({
            "value": 1, "formula": "=A1", "enc": {"iv": "x"}
        }))
        .unwrap();
        assert_eq!(cell.content, CellContent::Encrypted(json!({"iv": "x"})));

        let cell: Cell = serde_json::from_value(json!({"value": 1, "formula": "=A1"})).unwrap();
        assert_eq!(cell.content, CellContent::Formula("=A1".into()));

        let cell: Cell = serde_json::from_value(json!({"value": 1, "formula": ""})).unwrap();
        assert_eq!(cell.content, CellContent::Value(json!(1)));
    }

    #[test]
    fn test_nullable_distinguishes_null_from_absent() {
        let view: SheetView = serde_json::from_value(json!({
            "frozenRows": 1,
            "backgroundImageId": null,
        }))
        .unwrap();
        assert_eq!(view.background_image_id, Nullable::Null);
        assert_eq!(view.drawings, Nullable::Absent);

        let round_trip = serde_json::to_value(&view).unwrap();
        assert_eq!(
            round_trip,
            json!({"frozenRows": 1, "frozenCols": 0, "backgroundImageId": null})
        );
    }

    #[test]
    fn test_ordered_ids_appends_unordered_sheets() {
        let sheets = SheetsState {
            order: vec!["b".into(), "a".into(), "b".into()],
            meta_by_id: BTreeMap::from([
                ("a".into(), SheetMeta::new("a", "A")),
                ("c".into(), SheetMeta::new("c", "C")),
            ]),
        };
        assert_eq!(sheets.ordered_ids(), vec!["b", "a", "c"]);
    }
}
