//! Extraction of a canonical [`DocumentState`] from a live shared document.

use super::address::{CellKey, KeyEncoding, a1_to_index};
use super::{
    Cell, DocumentState, MergedRange, Nullable, SCHEMA_VERSION, SheetMeta, SheetView,
    SheetsState, Visibility, roots,
};
use crate::format::{parse_layers, sheet_default_cleared};
use crate::shared::{Branch, Document, RootShape};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReaderOptions {
    /// Sheet that `rNcM` cell keys refer to.
    pub default_sheet_id: String,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            default_sheet_id: "Sheet1".to_string(),
        }
    }
}

pub(crate) const COMMENT_ID_FIELDS: &[&str] = &["id"];
/// List comments written without an id are keyed `comment-<index>`.
pub(crate) const COMMENT_ID_PREFIX: &str = "comment";
pub(crate) const NAMED_RANGE_ID_FIELDS: &[&str] = &["id", "name"];
pub(crate) const METADATA_ID_FIELDS: &[&str] = &["id", "key"];
pub(crate) const CELL_ID_FIELDS: &[&str] = &["key", "id"];

/// Shape a root is currently realized as.
///
/// A materialized shape is authoritative. A root that arrived through an
/// update but was never opened locally is inferred from the storage that
/// holds items; anything else is `Unknown` and reads as empty.
pub fn probe_root_shape(doc: &Document, name: &str) -> RootShape {
    doc.root(name).map(branch_shape).unwrap_or_default()
}

pub(crate) fn branch_shape(branch: &Branch) -> RootShape {
    match branch.shape() {
        RootShape::Unknown if branch.has_keyed_items() => RootShape::Associative,
        RootShape::Unknown if branch.has_sequence_items() => RootShape::Sequential,
        shape => shape,
    }
}

pub fn read_document_state(doc: &Document) -> DocumentState {
    read_document_state_with(doc, &ReaderOptions::default())
}

pub fn read_document_state_with(doc: &Document, options: &ReaderOptions) -> DocumentState {
    let mut sheets = read_sheets(doc);
    let cells = read_cells(doc, options);

    let implicit: BTreeSet<&String> = cells
        .keys()
        .filter(|sheet_id| !sheets.meta_by_id.contains_key(*sheet_id))
        .collect();
    for sheet_id in implicit {
        debug!(sheet_id = %sheet_id, "synthesizing sheet referenced only by cell keys");
        sheets.order.push(sheet_id.clone());
        sheets
            .meta_by_id
            .insert(sheet_id.clone(), SheetMeta::new(sheet_id.clone(), sheet_id.clone()));
    }

    let mut comments = collect_records(
        doc.root(roots::COMMENTS),
        COMMENT_ID_FIELDS,
        Some(COMMENT_ID_PREFIX),
    );
    for (id, comment) in comments.iter_mut() {
        if let Value::Object(obj) = comment {
            obj.entry("id").or_insert_with(|| Value::String(id.clone()));
        }
    }

    DocumentState {
        schema_version: SCHEMA_VERSION,
        sheets,
        cells,
        named_ranges: collect_records(doc.root(roots::NAMED_RANGES), NAMED_RANGE_ID_FIELDS, None),
        metadata: collect_records(doc.root(roots::METADATA), METADATA_ID_FIELDS, None),
        comments,
    }
}

/// Live entries of a keyed root as plain JSON, keyed by id.
///
/// Entries are read through the materialized shape first. A second pass over
/// the raw items of the other storage recovers entries attached by peers that
/// opened the root with the other shape; materialized entries win on id
/// collision. List entries without an id field are keyed by
/// `<positional_prefix>-<index>` when a prefix is given and skipped
/// otherwise.
pub(crate) fn collect_records(
    branch: Option<&Branch>,
    id_fields: &[&str],
    positional_prefix: Option<&str>,
) -> BTreeMap<String, Value> {
    let mut records = BTreeMap::new();
    let Some(branch) = branch else {
        return records;
    };
    let keyed_primary = match branch_shape(branch) {
        RootShape::Associative => true,
        RootShape::Sequential => false,
        RootShape::Unknown => return records,
    };

    let mut recovered = Vec::new();
    let mut listed = 0;
    for item in branch.raw_items() {
        let Some(content) = item.content else {
            continue;
        };
        let json = content.to_json();
        let id = match item.key {
            Some(key) => Some(key.to_string()),
            None => {
                listed += 1;
                listed_record_id(&json, listed - 1, id_fields, positional_prefix)
            }
        };
        let Some(id) = id else {
            debug!(item = ?item.id, "skipping sequence entry without an id");
            continue;
        };
        if item.key.is_some() == keyed_primary {
            records.entry(id).or_insert(json);
        } else {
            recovered.push((id, json));
        }
    }

    for (id, json) in recovered {
        if let std::collections::btree_map::Entry::Vacant(slot) = records.entry(id) {
            debug!(id = %slot.key(), "recovered entry stored under the other root shape");
            slot.insert(json);
        }
    }
    records
}

/// Id of the live list entry at `index`.
pub(crate) fn listed_record_id(
    record: &Value,
    index: usize,
    id_fields: &[&str],
    positional_prefix: Option<&str>,
) -> Option<String> {
    record_id(record, id_fields)
        .or_else(|| positional_prefix.map(|prefix| format!("{prefix}-{index}")))
}

pub(crate) fn record_id(record: &Value, id_fields: &[&str]) -> Option<String> {
    let obj = record.as_object()?;
    id_fields.iter().find_map(|field| match obj.get(*field)? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    })
}

fn read_sheets(doc: &Document) -> SheetsState {
    let mut sheets = SheetsState::default();
    let Some(branch) = doc.root(roots::SHEETS) else {
        return sheets;
    };
    let keyed_primary = match branch_shape(branch) {
        RootShape::Associative => true,
        RootShape::Sequential => false,
        RootShape::Unknown => return sheets,
    };

    let (mut primary, mut other) = (Vec::new(), Vec::new());
    for item in branch.raw_items() {
        let Some(content) = item.content else {
            continue;
        };
        let mut json = content.to_json();
        if let (Some(key), Value::Object(obj)) = (item.key, &mut json) {
            obj.entry("id").or_insert_with(|| Value::String(key.to_string()));
        }
        if item.key.is_some() == keyed_primary {
            primary.push(json);
        } else {
            other.push(json);
        }
    }

    for (entry, recovered) in primary
        .iter()
        .map(|entry| (entry, false))
        .chain(other.iter().map(|entry| (entry, true)))
    {
        let Some(meta) = parse_sheet(entry) else {
            debug!("skipping sheet entry without an id");
            continue;
        };
        if sheets.meta_by_id.contains_key(&meta.id) {
            continue;
        }
        if recovered {
            debug!(sheet_id = %meta.id, "recovered sheet stored under the other root shape");
        }
        sheets.order.push(meta.id.clone());
        sheets.meta_by_id.insert(meta.id.clone(), meta);
    }
    sheets
}

fn parse_sheet(entry: &Value) -> Option<SheetMeta> {
    let obj = entry.as_object()?;
    let id = string_field(obj, &["id", "sheetId", "sheet_id"])?;
    let name = string_field(obj, &["name", "title", "sheetName"]).unwrap_or_else(|| id.clone());

    let visibility = obj
        .get("visibility")
        .and_then(Value::as_str)
        .and_then(Visibility::parse)
        .unwrap_or_else(|| {
            if obj.get("veryHidden").and_then(Value::as_bool) == Some(true) {
                Visibility::VeryHidden
            } else if obj.get("hidden").and_then(Value::as_bool) == Some(true) {
                Visibility::Hidden
            } else {
                Visibility::Visible
            }
        });

    let tab_color = ["tabColor", "tab_color", "color"]
        .iter()
        .find_map(|field| match obj.get(*field)? {
            Value::String(color) if !color.is_empty() => Some(color.clone()),
            Value::Object(color) => color.get("rgb").and_then(Value::as_str).map(String::from),
            _ => None,
        });

    Some(SheetMeta {
        id,
        name,
        visibility,
        tab_color,
        view: parse_view(obj),
    })
}

/// Reads view settings from the nested `view` object, falling back to the
/// top-level fields older clients wrote.
fn parse_view(entry: &Map<String, Value>) -> SheetView {
    let mut merged = entry.clone();
    if let Some(Value::Object(view)) = entry.get("view") {
        for (key, value) in view {
            merged.insert(key.clone(), value.clone());
        }
    }
    let source = Value::Object(merged);
    let layers = parse_layers(&source);
    let default_format = match layers.sheet_default {
        Some(format) => Nullable::Value(format),
        None if sheet_default_cleared(&source) => Nullable::Null,
        None => Nullable::Absent,
    };

    let Value::Object(merged) = &source else {
        return SheetView::default();
    };
    SheetView {
        frozen_rows: count_field(merged, &["frozenRows", "frozen_rows", "frozenRowCount"]),
        frozen_cols: count_field(merged, &["frozenCols", "frozen_cols", "frozenColCount"]),
        default_format,
        row_formats: layers.rows,
        col_formats: layers.cols,
        format_runs: layers.runs,
        merged_ranges: nullable_field(merged, &["mergedRanges", "merged_ranges", "merges"], |value| {
            value.as_array().map(|ranges| ranges.iter().filter_map(parse_merged_range).collect())
        }),
        drawings: nullable_field(merged, &["drawings"], |value| Some(value.clone())),
        background_image_id: nullable_field(
            merged,
            &["backgroundImageId", "background_image_id"],
            |value| value.as_str().map(String::from),
        ),
    }
}

fn string_field(obj: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| match obj.get(*field)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn count_field(obj: &Map<String, Value>, fields: &[&str]) -> u32 {
    fields
        .iter()
        .find_map(|field| obj.get(*field).and_then(Value::as_u64))
        .and_then(|count| u32::try_from(count).ok())
        .unwrap_or(0)
}

fn nullable_field<T>(
    obj: &Map<String, Value>,
    fields: &[&str],
    parse: impl Fn(&Value) -> Option<T>,
) -> Nullable<T> {
    for field in fields {
        match obj.get(*field) {
            None => continue,
            Some(Value::Null) => return Nullable::Null,
            Some(value) => {
                if let Some(parsed) = parse(value) {
                    return Nullable::Value(parsed);
                }
            }
        }
    }
    Nullable::Absent
}

fn parse_merged_range(value: &Value) -> Option<MergedRange> {
    if let Some(range) = value.as_str() {
        let (start, end) = range.split_once(':').unwrap_or((range, range));
        let (r0, c0) = a1_to_index(start)?;
        let (r1, c1) = a1_to_index(end)?;
        return Some(MergedRange {
            start_row: r0.min(r1),
            start_col: c0.min(c1),
            end_row: r0.max(r1),
            end_col: c0.max(c1),
        });
    }
    serde_json::from_value(value.clone()).ok()
}

struct Candidate {
    key: String,
    encoding: KeyEncoding,
    cell: Cell,
}

fn read_cells(doc: &Document, options: &ReaderOptions) -> BTreeMap<String, BTreeMap<String, Cell>> {
    let records = collect_records(doc.root(roots::CELLS), CELL_ID_FIELDS, None);

    let mut candidates: BTreeMap<CellKey, Vec<Candidate>> = BTreeMap::new();
    for (key, record) in records {
        let Some((cell_key, encoding)) = CellKey::parse(&key, &options.default_sheet_id) else {
            debug!(key = %key, "skipping unparsable cell key");
            continue;
        };
        candidates.entry(cell_key).or_default().push(Candidate {
            cell: parse_cell(&record),
            key,
            encoding,
        });
    }

    let mut cells: BTreeMap<String, BTreeMap<String, Cell>> = BTreeMap::new();
    for (cell_key, found) in candidates {
        let Some(cell) = resolve_collision(&cell_key, found) else {
            continue;
        };
        if cell.is_empty() {
            continue;
        }
        cells
            .entry(cell_key.sheet_id.clone())
            .or_default()
            .insert(cell_key.a1(), cell);
    }
    cells
}

pub(crate) fn parse_cell(record: &Value) -> Cell {
    match record {
        Value::Object(obj) => Cell::from_fields(
            obj.get("value").cloned(),
            obj.get("formula").and_then(Value::as_str).map(String::from),
            obj.get("enc").cloned(),
            obj.get("format").or_else(|| obj.get("style")).cloned(),
        ),
        other => Cell::value(other.clone()),
    }
}

/// Picks one cell among entries that decode to the same coordinates.
///
/// Ciphertext beats plaintext unless the plaintext sits under the canonical
/// key. Without ciphertext the canonical key wins, then the first key in
/// order. A losing entry can still supply a missing format.
fn resolve_collision(cell_key: &CellKey, mut found: Vec<Candidate>) -> Option<Cell> {
    if found.len() <= 1 {
        return found.pop().map(|candidate| candidate.cell);
    }

    let canonical = found
        .iter()
        .position(|candidate| candidate.encoding == KeyEncoding::Canonical);
    let encrypted = found
        .iter()
        .position(|candidate| candidate.cell.is_encrypted());
    let winner = match (canonical, encrypted) {
        (Some(canonical), Some(_)) if !found[canonical].cell.is_encrypted() => canonical,
        (_, Some(first_encrypted)) => {
            let winner = found
                .iter()
                .position(|candidate| {
                    candidate.cell.is_encrypted() && candidate.encoding == KeyEncoding::Canonical
                })
                .unwrap_or(first_encrypted);
            if found.iter().any(|candidate| !candidate.cell.is_encrypted()) {
                warn!(
                    cell = %cell_key,
                    key = %found[winner].key,
                    "encrypted entry shadows a plaintext duplicate"
                );
            }
            winner
        }
        (Some(canonical), None) => canonical,
        (None, None) => 0,
    };

    let backfill = found
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != winner)
        .find_map(|(_, candidate)| candidate.cell.format.clone());
    let mut cell = found.swap_remove(winner).cell;
    if cell.format.is_none() {
        cell.format = backfill;
    }
    debug!(cell = %cell_key, duplicates = found.len(), "resolved colliding cell keys");
    Some(cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CellContent;
    use serde_json::json;

    fn doc_with_cells(entries: &[(&str, Value)]) -> Document {
        let mut doc = Document::new(1);
        doc.transact(|txn| {
            let mut cells = txn.root_map(roots::CELLS);
            for (key, value) in entries {
                cells.insert(key, value.clone());
            }
        });
        doc
    }

    #[test]
    fn test_unknown_root_reads_as_empty() {
        let doc = Document::new(1);
        assert_eq!(probe_root_shape(&doc, roots::COMMENTS), RootShape::Unknown);
        let state = read_document_state(&doc);
        assert!(state.comments.is_empty());
        assert!(state.sheets.order.is_empty());
    }

    #[test]
    fn test_reads_all_key_encodings() {
        let doc = doc_with_cells(&[
            ("Sheet1:0:0", json!({"value": 1})),
            ("Sheet1:1,1", json!({"formula": "=A1*2"})),
            ("r2c2", json!({"value": "x"})),
            ("garbage", json!({"value": 0})),
        ]);
        let state = read_document_state(&doc);
        let sheet = &state.cells["Sheet1"];
        assert_eq!(sheet.len(), 3);
        assert_eq!(sheet["A1"], Cell::value(json!(1)));
        assert_eq!(sheet["B2"], Cell::formula("=A1*2"));
        assert_eq!(sheet["C3"], Cell::value(json!("x")));
        assert_eq!(state.sheets.order, vec!["Sheet1"]);
    }

    #[test]
    fn test_canonical_plaintext_beats_legacy_ciphertext() {
        let doc = doc_with_cells(&[
            ("Sheet1:0:0", json!({"value": "plain"})),
            ("Sheet1:0,0", json!({"enc": {"iv": "x"}, "format": {"bold": true}})),
        ]);
        let cell = &read_document_state(&doc).cells["Sheet1"]["A1"];
        assert_eq!(cell.content, CellContent::Value(json!("plain")));
        assert_eq!(cell.format, Some(json!({"bold": true})));
    }

    #[test]
    fn test_ciphertext_beats_non_canonical_plaintext() {
        let doc = doc_with_cells(&[
            ("Sheet1:0,0", json!({"enc": {"iv": "x"}})),
            ("r0c0", json!({"value": "plain"})),
        ]);
        let cell = &read_document_state(&doc).cells["Sheet1"]["A1"];
        assert!(cell.is_encrypted());
    }

    #[test]
    fn test_tombstones_are_skipped() {
        let doc = doc_with_cells(&[("Sheet1:0:0", json!({"value": null, "formula": null}))]);
        assert!(read_document_state(&doc).cells.is_empty());
    }

    #[test]
    fn test_sheet_synonyms_and_view() {
        let mut doc = Document::new(1);
        doc.transact(|txn| {
            let mut sheets = txn.root_array(roots::SHEETS);
            sheets.push(json!({
                "sheetId": "s1",
                "title": "Budget",
                "hidden": true,
                "tab_color": {"rgb": "FF0000"},
                "frozenRows": 2,
                "view": {"frozenCols": 1, "backgroundImageId": null},
                "colFormats": {"0": {"bold": true}},
            }));
        });
        let state = read_document_state(&doc);
        let meta = &state.sheets.meta_by_id["s1"];
        assert_eq!(meta.name, "Budget");
        assert_eq!(meta.visibility, Visibility::Hidden);
        assert_eq!(meta.tab_color.as_deref(), Some("FF0000"));
        assert_eq!(meta.view.frozen_rows, 2);
        assert_eq!(meta.view.frozen_cols, 1);
        assert_eq!(meta.view.background_image_id, Nullable::Null);
        assert_eq!(meta.view.drawings, Nullable::Absent);
        assert_eq!(meta.view.col_formats.get(&0), Some(&json!({"bold": true})));
    }

    #[test]
    fn test_implicit_sheets_are_appended_sorted() {
        let mut doc = doc_with_cells(&[
            ("zeta:0:0", json!({"value": 1})),
            ("alpha:0:0", json!({"value": 2})),
        ]);
        doc.transact(|txn| {
            txn.root_array(roots::SHEETS)
                .push(json!({"id": "main", "name": "Main"}));
        });
        let state = read_document_state(&doc);
        assert_eq!(state.sheets.order, vec!["main", "alpha", "zeta"]);
        assert_eq!(state.sheets.meta_by_id["zeta"].name, "zeta");
    }

    #[test]
    fn test_listed_comments_without_id_are_keyed_by_position() {
        let mut doc = Document::new(1);
        doc.transact(|txn| {
            let mut comments = txn.root_array(roots::COMMENTS);
            comments.push(json!({"id": "c1", "content": "first"}));
            comments.push(json!({"content": "anonymous"}));
            comments.push(json!({"id": "", "content": "blank id"}));
        });
        let comments = read_document_state(&doc).comments;
        assert_eq!(comments.len(), 3);
        assert_eq!(comments["comment-1"], json!({"id": "comment-1", "content": "anonymous"}));
        assert_eq!(comments["comment-2"]["content"], json!("blank id"));
    }

    #[test]
    fn test_materialized_entries_win_over_recovered() {
        let mut old_peer = Document::new(1);
        old_peer.transact(|txn| {
            let mut comments = txn.root_array(roots::COMMENTS);
            comments.push(json!({"id": "c1", "content": "old"}));
            comments.push(json!({"id": "c2", "content": "only in sequence"}));
        });

        let mut doc = Document::new(2);
        doc.apply_update(&old_peer.encode_state());
        doc.transact(|txn| {
            txn.root_map(roots::COMMENTS)
                .insert("c1", json!({"content": "new"}));
        });

        let comments = read_document_state(&doc).comments;
        assert_eq!(comments["c1"], json!({"id": "c1", "content": "new"}));
        assert_eq!(comments["c2"]["content"], json!("only in sequence"));
    }
}
