//! Extraction of a [`WorkbookState`] from stored snapshot bytes.
//!
//! Stored versions are JSON documents of the shape
//! `{sheets: [{id, name, cells: [{row, col, value, formula, format}], ...}],
//! sheetOrder?, namedRanges, metadata, comments}`. Field names have drifted
//! over time, so every lookup tries a list of synonyms.

use super::workbook::{SheetInfo, WorkbookState, apply_layers};
use super::CellSnapshot;
use crate::error::{HistoryError, Result};
use crate::format::parse_layers;
use crate::state::Visibility;
use crate::state::address::a1_to_index;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

impl WorkbookState {
    /// Parses stored snapshot bytes. Bytes that are not JSON, or JSON that is
    /// not a workbook object, are [`HistoryError::MalformedSnapshot`].
    pub fn from_snapshot_bytes(bytes: &[u8]) -> Result<Self> {
        let root: Value = serde_json::from_slice(bytes)
            .map_err(|err| HistoryError::MalformedSnapshot(err.to_string()))?;
        let Value::Object(root) = root else {
            return Err(HistoryError::MalformedSnapshot(
                "expected a JSON object at the top level".to_string(),
            ));
        };

        let sheet_entries: Vec<&Map<String, Value>> = match root.get("sheets") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
            Some(Value::Object(by_id)) => by_id.values().filter_map(Value::as_object).collect(),
            Some(_) => {
                return Err(HistoryError::MalformedSnapshot(
                    "`sheets` must be an array or an object".to_string(),
                ));
            }
        };

        let mut state = WorkbookState::default();
        for entry in sheet_entries {
            let Some(id) = string_field(entry, &["id", "sheetId", "sheet_id"]) else {
                debug!("skipping snapshot sheet without an id");
                continue;
            };
            if state.sheet(&id).is_some() {
                continue;
            }
            let name = string_field(entry, &["name", "title", "sheetName"]).unwrap_or_else(|| id.clone());
            state.sheets.push(SheetInfo {
                visibility: visibility(entry),
                tab_color: string_field(entry, &["tabColor", "tab_color", "color"]),
                id: id.clone(),
                name,
            });
            state.cells_by_sheet.insert(id, sheet_cells(entry));
        }

        let explicit_order: Vec<String> = root
            .get("sheetOrder")
            .or_else(|| root.get("sheet_order"))
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();
        let mut order: Vec<String> = explicit_order
            .into_iter()
            .filter(|id| state.sheet(id).is_some())
            .collect();
        for sheet in &state.sheets {
            if !order.contains(&sheet.id) {
                order.push(sheet.id.clone());
            }
        }
        state.sheet_order = order;

        state.named_ranges = keyed_collection(&root, &["namedRanges", "named_ranges"], &["id", "name"]);
        state.metadata = keyed_collection(&root, &["metadata", "meta"], &["id", "key"]);
        state.comments = keyed_collection(&root, &["comments"], &["id"]);
        for (id, comment) in state.comments.iter_mut() {
            if let Value::Object(obj) = comment {
                obj.entry("id").or_insert_with(|| Value::String(id.clone()));
            }
        }
        Ok(state)
    }
}

fn string_field(obj: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| match obj.get(*field)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn visibility(entry: &Map<String, Value>) -> Visibility {
    if let Some(parsed) = entry
        .get("visibility")
        .and_then(Value::as_str)
        .and_then(Visibility::parse)
    {
        return parsed;
    }
    if entry.get("hidden").and_then(Value::as_bool) == Some(true) {
        Visibility::Hidden
    } else {
        Visibility::Visible
    }
}

fn sheet_cells(entry: &Map<String, Value>) -> super::SheetState {
    let mut source = entry.clone();
    if let Some(Value::Object(view)) = entry.get("view") {
        for (key, value) in view {
            source.insert(key.clone(), value.clone());
        }
    }
    let layers = parse_layers(&Value::Object(source));

    let mut contents = BTreeMap::new();
    let mut formats = BTreeMap::new();
    let cells = ["cells", "cellData", "data"]
        .iter()
        .find_map(|field| entry.get(*field));
    let mut add = |row: u32, col: u32, cell: &Value| {
        let (snapshot, format) = snapshot_cell(cell);
        contents.insert((row, col), snapshot);
        formats.insert((row, col), format);
    };
    match cells {
        Some(Value::Array(items)) => {
            for item in items {
                match cell_position(item) {
                    Some((row, col)) => add(row, col, item),
                    None => debug!("skipping snapshot cell without a position"),
                }
            }
        }
        Some(Value::Object(by_key)) => {
            for (key, item) in by_key {
                match key_position(key) {
                    Some((row, col)) => add(row, col, item),
                    None => debug!(key = %key, "skipping snapshot cell with an unknown key"),
                }
            }
        }
        _ => {}
    }
    apply_layers(&layers, contents, &formats)
}

fn snapshot_cell(cell: &Value) -> (CellSnapshot, Option<Value>) {
    let Value::Object(obj) = cell else {
        return (CellSnapshot::value(cell.clone()), None);
    };
    let mut snapshot = CellSnapshot::default();
    if let Some(enc) = obj.get("enc").filter(|enc| !enc.is_null()) {
        snapshot.enc = Some(enc.clone());
    } else if let Some(formula) = obj
        .get("formula")
        .and_then(Value::as_str)
        .filter(|formula| !formula.trim().is_empty())
    {
        snapshot.formula = Some(formula.to_string());
    } else {
        snapshot.value = obj
            .get("value")
            .or_else(|| obj.get("v"))
            .cloned()
            .unwrap_or(Value::Null);
    }
    let format = ["format", "style", "fmt"]
        .iter()
        .find_map(|field| obj.get(*field))
        .filter(|format| !format.is_null())
        .cloned();
    (snapshot, format)
}

fn index_field(obj: &Map<String, Value>, fields: &[&str]) -> Option<u32> {
    fields
        .iter()
        .find_map(|field| obj.get(*field).and_then(Value::as_u64))
        .and_then(|index| u32::try_from(index).ok())
}

fn cell_position(cell: &Value) -> Option<(u32, u32)> {
    let obj = cell.as_object()?;
    if let (Some(row), Some(col)) = (
        index_field(obj, &["row", "r", "rowIndex"]),
        index_field(obj, &["col", "c", "column", "colIndex"]),
    ) {
        return Some((row, col));
    }
    ["address", "a1", "ref"]
        .iter()
        .find_map(|field| obj.get(*field).and_then(Value::as_str))
        .and_then(a1_to_index)
}

/// Object-keyed cells use A1 addresses or `row:col` / `row,col` pairs.
fn key_position(key: &str) -> Option<(u32, u32)> {
    if let Some((row, col)) = key.split_once([':', ',']) {
        return Some((row.trim().parse().ok()?, col.trim().parse().ok()?));
    }
    a1_to_index(key)
}

fn keyed_collection(
    root: &Map<String, Value>,
    fields: &[&str],
    id_fields: &[&str],
) -> BTreeMap<String, Value> {
    let Some(source) = fields.iter().find_map(|field| root.get(*field)) else {
        return BTreeMap::new();
    };
    match source {
        Value::Object(by_id) => by_id
            .iter()
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let obj = item.as_object()?;
                let id = string_field(obj, id_fields)?;
                Some((id, item.clone()))
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::CellCoord;
    use serde_json::json;

    #[test]
    fn test_rejects_invalid_json() {
        let err = WorkbookState::from_snapshot_bytes(b"{not json").unwrap_err();
        assert!(matches!(err, HistoryError::MalformedSnapshot(_)));
        let err = WorkbookState::from_snapshot_bytes(b"[1, 2]").unwrap_err();
        assert!(matches!(err, HistoryError::MalformedSnapshot(_)));
    }

    #[test]
    fn test_reads_cells_and_layers() {
        let bytes = serde_json::to_vec(&json!({
            "sheets": [{
                "id": "s1",
                "name": "Budget",
                "defaultFormat": {"font": {"size": 10}},
                "view": {"rowFormats": [[1, {"bold": true}]]},
                "cells": [
                    {"row": 0, "col": 0, "value": 5},
                    {"row": 1, "col": 0, "formula": "=A1*2", "format": {"italic": true}},
                    {"address": "C3", "value": "x"},
                ],
            }],
            "namedRanges": [{"name": "Total", "ref": "s1!A2"}],
            "metadata": {"title": "Q3"},
        }))
        .unwrap();
        let state = WorkbookState::from_snapshot_bytes(&bytes).unwrap();
        let cells = &state.cells_by_sheet["s1"];
        assert_eq!(cells.len(), 3);
        assert_eq!(
            cells[&CellCoord::new(1, 0)],
            CellSnapshot::formula("=A1*2")
                .with_format(json!({"font": {"size": 10}, "bold": true, "italic": true}))
        );
        assert_eq!(
            cells[&CellCoord::new(0, 0)].format,
            Some(json!({"font": {"size": 10}}))
        );
        assert_eq!(state.sheet_order, vec!["s1"]);
        assert!(state.named_ranges.contains_key("Total"));
        assert_eq!(state.metadata["title"], json!("Q3"));
    }

    #[test]
    fn test_sheet_order_drops_unknown_ids() {
        let bytes = br#"{"sheets": [{"id": "a"}, {"id": "b"}], "sheetOrder": ["b", "zzz"]}"#;
        let state = WorkbookState::from_snapshot_bytes(bytes).unwrap();
        assert_eq!(state.sheet_order, vec!["b", "a"]);
        assert_eq!(state.sheets[0].name, "a");
    }

    #[test]
    fn test_object_keyed_cells() {
        let bytes = br#"{"sheets": [{"id": "s", "cells": {"B2": {"value": 1}, "3,4": 7, "bad key": 1}}]}"#;
        let state = WorkbookState::from_snapshot_bytes(bytes).unwrap();
        let cells = &state.cells_by_sheet["s"];
        assert_eq!(cells[&CellCoord::new(1, 1)].value, json!(1));
        assert_eq!(cells[&CellCoord::new(3, 4)].value, json!(7));
        assert_eq!(cells.len(), 2);
    }
}
