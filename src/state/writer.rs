//! Writing a canonical [`DocumentState`] back into a live shared document.

use super::address::{CellKey, KeyEncoding, a1_to_index};
use super::reader::{
    CELL_ID_FIELDS, COMMENT_ID_FIELDS, COMMENT_ID_PREFIX, METADATA_ID_FIELDS,
    NAMED_RANGE_ID_FIELDS, ReaderOptions, branch_shape, collect_records, listed_record_id,
    record_id,
};
use super::{Cell, CellContent, DocumentState, SheetMeta, roots};
use crate::error::{HistoryError, Result};
use crate::format::is_layer_field;
use crate::shared::{BranchMut, Document, RootShape, Transaction, Value as SharedValue};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Sheet-entry fields owned by the canonical schema. Everything else is
/// carried forward untouched when an entry is rebuilt.
const OWNED_SHEET_FIELDS: &[&str] = &[
    "id",
    "sheetId",
    "sheet_id",
    "name",
    "title",
    "sheetName",
    "visibility",
    "hidden",
    "veryHidden",
    "tabColor",
    "tab_color",
    "color",
    "view",
    "frozenRows",
    "frozen_rows",
    "frozenRowCount",
    "frozenCols",
    "frozen_cols",
    "frozenColCount",
    "mergedRanges",
    "merged_ranges",
    "merges",
    "drawings",
    "backgroundImageId",
    "background_image_id",
];

fn is_owned_sheet_field(field: &str) -> bool {
    OWNED_SHEET_FIELDS.contains(&field) || is_layer_field(field)
}

/// Applies `state` to `doc` in a single transaction.
///
/// Only fields that differ from what is stored are written, so applying the
/// same state twice leaves the document untouched the second time. On error
/// nothing is applied.
pub fn apply_document_state(doc: &mut Document, state: &DocumentState) -> Result<()> {
    let wanted_cells = canonical_cells(state)?;
    let comments_shape = doc
        .root(roots::COMMENTS)
        .map(branch_shape)
        .unwrap_or_default();

    doc.try_transact(|txn| {
        write_sheets(txn, state);
        write_cells(txn, &wanted_cells);
        write_keyed_root(txn, roots::NAMED_RANGES, &state.named_ranges, NAMED_RANGE_ID_FIELDS);
        write_keyed_root(txn, roots::METADATA, &state.metadata, METADATA_ID_FIELDS);
        write_comments(txn, comments_shape, &state.comments);
        Ok(())
    })
}

fn canonical_cells(state: &DocumentState) -> Result<BTreeMap<String, &Cell>> {
    let mut wanted = BTreeMap::new();
    for (sheet_id, cells) in &state.cells {
        for (address, cell) in cells {
            let (row, col) = a1_to_index(address)
                .ok_or_else(|| HistoryError::InvalidCellAddress(address.clone()))?;
            wanted.insert(CellKey::new(sheet_id.clone(), row, col).to_string(), cell);
        }
    }
    Ok(wanted)
}

/// Writes `value` under `key` unless an equal value is already stored.
fn set_if_changed(map: &mut BranchMut<'_>, key: &str, value: Value) {
    let current = map.branch().get(key).map(SharedValue::to_json);
    if current.as_ref() != Some(&value) {
        map.insert(key, value);
    }
}

/// Writes a JSON field, building nested shared arrays of maps for lists of
/// objects so composite fields match the existing schema.
fn write_field(map: &mut BranchMut<'_>, key: &str, value: &Value) {
    let current = map.branch().get(key).map(SharedValue::to_json);
    if current.as_ref() == Some(value) {
        return;
    }
    match value {
        Value::Array(items) if items.iter().any(Value::is_object) => {
            let mut list = map.insert_array(key);
            for item in items {
                match item {
                    Value::Object(fields) => {
                        let mut nested = list.push_map();
                        for (field, field_value) in fields {
                            nested.insert(field, field_value.clone());
                        }
                    }
                    other => list.push(other.clone()),
                }
            }
        }
        other => map.insert(key, other.clone()),
    }
}

/// Makes the map's keyed entries equal `fields`, dropping keys for which
/// `drop_stale` holds and that `fields` does not carry.
fn write_object(
    map: &mut BranchMut<'_>,
    fields: &Map<String, Value>,
    drop_stale: impl Fn(&str) -> bool,
) {
    let stale: Vec<String> = map
        .branch()
        .keys()
        .filter(|key| !fields.contains_key(*key) && drop_stale(*key))
        .map(str::to_string)
        .collect();
    for key in stale {
        map.remove(&key);
    }
    for (key, value) in fields {
        write_field(map, key, value);
    }
}

fn sheet_fields(meta: &SheetMeta) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("id".into(), Value::String(meta.id.clone()));
    fields.insert("name".into(), Value::String(meta.name.clone()));
    fields.insert(
        "visibility".into(),
        Value::String(meta.visibility.as_str().to_string()),
    );
    if let Some(color) = &meta.tab_color {
        fields.insert("tabColor".into(), Value::String(color.clone()));
    }
    let view = serde_json::to_value(&meta.view).unwrap_or(Value::Null);
    fields.insert("view".into(), view);
    fields
}

fn write_sheets(txn: &mut Transaction<'_>, state: &DocumentState) {
    let wanted: Vec<SheetMeta> = state
        .sheets
        .ordered_ids()
        .into_iter()
        .map(|id| {
            state
                .sheets
                .meta_by_id
                .get(&id)
                .cloned()
                .unwrap_or_else(|| SheetMeta::new(id.clone(), id))
        })
        .collect();

    let Some(shape) = txn.root(roots::SHEETS).map(branch_shape) else {
        if !wanted.is_empty() {
            rebuild_sheets(&mut txn.root_array(roots::SHEETS), &wanted, BTreeMap::new());
        }
        return;
    };
    let mut root = txn.root_array(roots::SHEETS);
    let existing: Vec<Value> = root.branch().values().map(SharedValue::to_json).collect();
    let existing_ids: Vec<Option<String>> = existing
        .iter()
        .map(|entry| record_id(entry, &["id", "sheetId", "sheet_id"]))
        .collect();
    let same_order = existing_ids.len() == wanted.len()
        && existing_ids
            .iter()
            .zip(&wanted)
            .all(|(existing, meta)| existing.as_deref() == Some(meta.id.as_str()));
    let all_maps = root
        .branch()
        .values()
        .all(|entry| entry.as_map().is_some());
    // The list is the only storage that keeps sheet order. Keyed entries
    // shadow it on an associative root, so they are folded in and retired.
    let keyed: Vec<(String, Value)> = root
        .branch()
        .entries()
        .map(|(key, entry)| (key.to_string(), entry.to_json()))
        .collect();

    if same_order && all_maps && keyed.is_empty() {
        for (index, meta) in wanted.iter().enumerate() {
            if let Some(mut entry) = root.get_index_mut(index) {
                write_object(&mut entry, &sheet_fields(meta), is_owned_sheet_field);
            }
        }
        return;
    }

    debug!(
        existing = existing.len(),
        keyed = keyed.len(),
        wanted = wanted.len(),
        ?shape,
        "rebuilding sheets list"
    );
    let listed = existing
        .into_iter()
        .zip(existing_ids)
        .filter_map(|(entry, id)| Some((id?, entry)));
    let keyed = keyed.into_iter();
    let sources: Vec<(String, Value)> = match shape {
        RootShape::Associative => keyed.chain(listed).collect(),
        _ => listed.chain(keyed).collect(),
    };
    let mut previous: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
    for (id, entry) in sources {
        if let Value::Object(fields) = entry {
            previous.entry(id).or_insert(fields);
        }
    }

    root.clear();
    let len = root.branch().values().count();
    root.delete_range(0, len);
    rebuild_sheets(&mut root, &wanted, previous);
}

/// Appends one map per sheet, carrying forward fields the canonical schema
/// does not own from `previous`.
fn rebuild_sheets(
    root: &mut BranchMut<'_>,
    wanted: &[SheetMeta],
    previous: BTreeMap<String, Map<String, Value>>,
) {
    for meta in wanted {
        let mut entry = root.push_map();
        if let Some(old) = previous.get(&meta.id) {
            for (key, value) in old.iter().filter(|(key, _)| !is_owned_sheet_field(key)) {
                write_field(&mut entry, key, value);
            }
        }
        for (key, value) in &sheet_fields(meta) {
            write_field(&mut entry, key, value);
        }
    }
}

fn is_tombstone(entry: Option<&SharedValue>) -> bool {
    let Some(entry) = entry else {
        return false;
    };
    match entry.to_json() {
        Value::Object(fields) => {
            fields.get("value").is_none_or(Value::is_null)
                && fields.get("formula").is_none_or(Value::is_null)
                && fields.get("format").is_none_or(Value::is_null)
                && fields.get("enc").is_none_or(Value::is_null)
        }
        Value::Null => true,
        _ => false,
    }
}

fn write_cells(txn: &mut Transaction<'_>, wanted: &BTreeMap<String, &Cell>) {
    if wanted.is_empty() && txn.root(roots::CELLS).is_none() {
        return;
    }
    let default_sheet_id = ReaderOptions::default().default_sheet_id;
    let mut root = txn.root_map(roots::CELLS);

    let existing: Vec<String> = root.branch().keys().map(str::to_string).collect();
    let (mut legacy, mut tombstoned) = (0usize, 0usize);
    for key in existing {
        let Some((_, encoding)) = CellKey::parse(&key, &default_sheet_id) else {
            continue;
        };
        if encoding != KeyEncoding::Canonical {
            root.remove(&key);
            legacy += 1;
        } else if !wanted.contains_key(&key) && !is_tombstone(root.branch().get(&key)) {
            // A tombstone is an ordered write, unlike a key delete, so a
            // concurrent write to the same cell resolves against it.
            write_cell(&mut root, &key, None);
            tombstoned += 1;
        }
    }
    // Cells attached to the list storage by peers that opened the root as a
    // list would shadow the keyed entries, or resurface once removed here.
    // Their content already reached `wanted` through the reader.
    let listed: Vec<usize> = root
        .branch()
        .values()
        .enumerate()
        .filter(|(_, entry)| {
            record_id(&entry.to_json(), CELL_ID_FIELDS)
                .is_some_and(|key| CellKey::parse(&key, &default_sheet_id).is_some())
        })
        .map(|(index, _)| index)
        .collect();
    for index in listed.iter().rev() {
        root.delete_at(*index);
    }
    if legacy > 0 || tombstoned > 0 || !listed.is_empty() {
        debug!(legacy, tombstoned, listed = listed.len(), "cleaned up cell keys");
    }

    for (key, cell) in wanted {
        write_cell(&mut root, key, Some(cell));
    }
}

/// Upserts one cell map. `None` writes a tombstone.
fn write_cell(root: &mut BranchMut<'_>, key: &str, cell: Option<&Cell>) {
    let (value, formula, enc) = match cell.map(|cell| &cell.content) {
        Some(CellContent::Value(value)) => (value.clone(), Value::Null, None),
        Some(CellContent::Formula(formula)) => (Value::Null, Value::String(formula.clone()), None),
        Some(CellContent::Encrypted(enc)) => (Value::Null, Value::Null, Some(enc.clone())),
        None => (Value::Null, Value::Null, None),
    };
    let format = cell.and_then(|cell| cell.format.clone());

    let is_map = root
        .branch()
        .get(key)
        .is_some_and(|entry| entry.as_map().is_some());
    if !is_map {
        root.insert_map(key);
    }
    let Some(mut entry) = root.get_mut(key) else {
        return;
    };

    set_if_changed(&mut entry, "value", value);
    set_if_changed(&mut entry, "formula", formula);
    match enc {
        Some(enc) => set_if_changed(&mut entry, "enc", enc),
        None => {
            entry.remove("enc");
        }
    }
    match format {
        Some(format) => set_if_changed(&mut entry, "format", format),
        None => {
            entry.remove("format");
        }
    }
}

/// Clears and rewrites an associative root when its content differs.
fn write_keyed_root(
    txn: &mut Transaction<'_>,
    name: &str,
    wanted: &BTreeMap<String, Value>,
    id_fields: &[&str],
) {
    if collect_records(txn.root(name), id_fields, None) == *wanted {
        return;
    }
    debug!(root = name, entries = wanted.len(), "rewriting root");
    let mut root = txn.root_map(name);
    root.clear();
    let len = root.branch().values().count();
    root.delete_range(0, len);
    for (id, value) in wanted {
        root.insert(id, value.clone());
    }
}

fn comment_with_id(id: &str, comment: &Value) -> Value {
    let mut comment = comment.clone();
    if let Value::Object(fields) = &mut comment {
        fields
            .entry("id")
            .or_insert_with(|| Value::String(id.to_string()));
    }
    comment
}

fn write_comment(entry: &mut BranchMut<'_>, comment: &Value) {
    if let Value::Object(fields) = comment {
        write_object(entry, fields, |_| true);
    }
}

/// Writes comments through whichever shape the root is realized as. An
/// unrealized root is created associative.
fn write_comments(
    txn: &mut Transaction<'_>,
    shape: RootShape,
    wanted: &BTreeMap<String, Value>,
) {
    match shape {
        RootShape::Sequential => write_comments_sequential(txn, wanted),
        RootShape::Associative | RootShape::Unknown => write_comments_associative(txn, wanted),
    }
}

fn write_comments_associative(txn: &mut Transaction<'_>, wanted: &BTreeMap<String, Value>) {
    if wanted.is_empty() && txn.root(roots::COMMENTS).is_none() {
        return;
    }
    let mut root = txn.root_map(roots::COMMENTS);

    let stale: Vec<String> = root
        .branch()
        .keys()
        .filter(|key| !wanted.contains_key(*key))
        .map(str::to_string)
        .collect();
    for key in stale {
        root.remove(&key);
    }

    for (id, comment) in wanted {
        let comment = comment_with_id(id, comment);
        let current = root.branch().get(id).map(SharedValue::to_json);
        if current.as_ref() == Some(&comment) {
            continue;
        }
        let is_map = root
            .branch()
            .get(id)
            .is_some_and(|entry| entry.as_map().is_some());
        match (&comment, is_map) {
            (Value::Object(_), true) => {
                if let Some(mut entry) = root.get_mut(id) {
                    write_comment(&mut entry, &comment);
                }
            }
            (Value::Object(_), false) => {
                let mut entry = root.insert_map(id);
                write_comment(&mut entry, &comment);
            }
            (other, _) => root.insert(id, other.clone()),
        }
    }

    // Entries other peers appended to the sequence storage would otherwise
    // resurface through recovery after being removed here.
    let unwanted: Vec<usize> = root
        .branch()
        .values()
        .enumerate()
        .filter(|(_, entry)| {
            record_id(&entry.to_json(), COMMENT_ID_FIELDS).is_none_or(|id| !wanted.contains_key(&id))
        })
        .map(|(index, _)| index)
        .collect();
    for index in unwanted.into_iter().rev() {
        root.delete_at(index);
    }
}

fn write_comments_sequential(txn: &mut Transaction<'_>, wanted: &BTreeMap<String, Value>) {
    let mut root = txn.root_array(roots::COMMENTS);

    let mut seen = BTreeSet::new();
    let mut replace = Vec::new();
    let mut unwanted = Vec::new();
    for (index, entry) in root.branch().values().enumerate() {
        let current = entry.to_json();
        match listed_record_id(&current, index, COMMENT_ID_FIELDS, Some(COMMENT_ID_PREFIX)) {
            Some(id) if wanted.contains_key(&id) && seen.insert(id.clone()) => {
                let comment = comment_with_id(&id, &wanted[&id]);
                if current != comment {
                    replace.push((index, comment));
                }
            }
            _ => unwanted.push(index),
        }
    }

    for (index, comment) in &replace {
        if !comment.is_object() {
            continue;
        }
        let in_place = root
            .branch()
            .get_index(*index)
            .is_some_and(|entry| entry.as_map().is_some());
        if in_place && let Some(mut entry) = root.get_index_mut(*index) {
            write_comment(&mut entry, comment);
        }
    }
    // Replacements shift no positions when processed back to front.
    let mut positional: Vec<(usize, Option<&Value>)> = replace
        .iter()
        .filter(|(index, comment)| {
            !comment.is_object()
                || root
                    .branch()
                    .get_index(*index)
                    .is_none_or(|entry| entry.as_map().is_none())
        })
        .map(|(index, comment)| (*index, Some(comment)))
        .chain(unwanted.into_iter().map(|index| (index, None)))
        .collect();
    positional.sort_by_key(|(index, _)| std::cmp::Reverse(*index));
    for (index, replacement) in positional {
        root.delete_at(index);
        match replacement {
            Some(comment) if comment.is_object() => {
                let mut entry = root.insert_map_at(index);
                write_comment(&mut entry, comment);
            }
            Some(other) => root.insert_at(index, other.clone()),
            None => {}
        }
    }

    for (id, comment) in wanted.iter().filter(|(id, _)| !seen.contains(*id)) {
        let comment = comment_with_id(id, comment);
        match &comment {
            Value::Object(_) => {
                let mut entry = root.push_map();
                write_comment(&mut entry, &comment);
            }
            other => root.push(other.clone()),
        }
    }

    // Keyed entries would resurface through recovery after removal.
    let stale: Vec<String> = root
        .branch()
        .keys()
        .filter(|key| !wanted.contains_key(*key))
        .map(str::to_string)
        .collect();
    for key in stale {
        root.remove(&key);
    }
}
