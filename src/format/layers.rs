//! Parsing of layered-format fields across historical schema variants.
//!
//! Each layer has been written under several field names and shapes over
//! time. Candidates are tried in order and the first non-empty match wins.

use super::{FormatLayers, FormatRun};
use crate::state::address::a1_to_index;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const SHEET_DEFAULT_FIELDS: &[&str] = &[
    "defaultFormat",
    "default_format",
    "sheetDefaultFormat",
    "sheetFormat",
    "sheet_format",
    "defaultStyle",
    "sheetStyle",
];

const COL_FIELDS: &[&str] = &[
    "colFormats",
    "col_formats",
    "columnFormats",
    "column_formats",
    "colDefaults",
    "columnDefaults",
    "colStyles",
    "columnStyles",
    "formatsByCol",
    "colFormatById",
];

const ROW_FIELDS: &[&str] = &[
    "rowFormats",
    "row_formats",
    "rowDefaults",
    "rowStyles",
    "formatsByRow",
    "rowFormatById",
];

const RUN_FIELDS: &[&str] = &[
    "formatRuns",
    "format_runs",
    "rangeFormats",
    "range_formats",
    "rangeFormatRuns",
    "formatRanges",
    "rangeRuns",
    "styleRuns",
];

const RUNS_BY_COL_FIELDS: &[&str] = &["formatRunsByCol", "format_runs_by_col", "runsByCol"];

const COL_INDEX_KEYS: &[&str] = &["col", "index", "column", "c", "colIndex", "columnIndex", "idx"];
const ROW_INDEX_KEYS: &[&str] = &["row", "index", "r", "rowIndex", "idx"];
const FORMAT_KEYS: &[&str] = &["format", "style", "fmt", "value"];

/// Reads every layer from a sheet-view-like object. Unknown shapes are
/// ignored rather than rejected.
pub fn parse_layers(source: &Value) -> FormatLayers {
    let Some(obj) = source.as_object() else {
        return FormatLayers::default();
    };

    let sheet_default = SHEET_DEFAULT_FIELDS
        .iter()
        .filter_map(|field| obj.get(*field))
        .find(|value| is_non_empty_object(value))
        .cloned();

    let cols = first_non_empty(obj, COL_FIELDS, |value| parse_index_map(value, COL_INDEX_KEYS));
    let rows = first_non_empty(obj, ROW_FIELDS, |value| parse_index_map(value, ROW_INDEX_KEYS));

    let mut runs = first_non_empty(obj, RUN_FIELDS, parse_runs);
    if runs.is_empty() {
        runs = first_non_empty(obj, RUNS_BY_COL_FIELDS, parse_runs_by_col);
    }

    FormatLayers {
        sheet_default,
        cols,
        rows,
        runs,
    }
}

/// Whether the sheet default is explicitly cleared (`null`) rather than absent.
pub(crate) fn sheet_default_cleared(source: &Value) -> bool {
    source.as_object().is_some_and(|obj| {
        SHEET_DEFAULT_FIELDS
            .iter()
            .any(|field| obj.get(*field).is_some_and(Value::is_null))
    })
}

/// Whether `field` names any historical layered-format field.
pub(crate) fn is_layer_field(field: &str) -> bool {
    [
        SHEET_DEFAULT_FIELDS,
        COL_FIELDS,
        ROW_FIELDS,
        RUN_FIELDS,
        RUNS_BY_COL_FIELDS,
    ]
    .iter()
    .any(|fields| fields.contains(&field))
}

fn first_non_empty<T: Default + IsEmpty>(
    obj: &Map<String, Value>,
    fields: &[&str],
    parse: impl Fn(&Value) -> T,
) -> T {
    fields
        .iter()
        .filter_map(|field| obj.get(*field))
        .map(parse)
        .find(|parsed| !parsed.is_empty())
        .unwrap_or_default()
}

trait IsEmpty {
    fn is_empty(&self) -> bool;
}

impl<K, V> IsEmpty for BTreeMap<K, V> {
    fn is_empty(&self) -> bool {
        BTreeMap::is_empty(self)
    }
}

impl<T> IsEmpty for Vec<T> {
    fn is_empty(&self) -> bool {
        Vec::is_empty(self)
    }
}

fn is_non_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(|obj| !obj.is_empty())
}

fn non_negative(value: Option<&Value>) -> Option<u32> {
    let value = value?;
    let n = value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))?;
    u32::try_from(n).ok()
}

fn lookup<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| obj.get(*key))
}

/// Index → format maps. Accepted shapes:
/// - `{"0": {...}, "3": {...}}`
/// - `[[0, {...}], [3, {...}]]`
/// - `[{"col": 0, "format": {...}}, ...]` with varying key names
fn parse_index_map(value: &Value, index_keys: &[&str]) -> BTreeMap<u32, Value> {
    let mut out = BTreeMap::new();
    match value {
        Value::Object(obj) => {
            for (key, format) in obj {
                if let (Ok(index), true) = (key.trim().parse::<u32>(), is_non_empty_object(format)) {
                    out.insert(index, format.clone());
                }
            }
        }
        Value::Array(entries) => {
            for entry in entries {
                let parsed = match entry {
                    Value::Array(pair) if pair.len() == 2 => {
                        non_negative(pair.first()).zip(pair.get(1))
                    }
                    Value::Object(obj) => {
                        non_negative(lookup(obj, index_keys)).zip(lookup(obj, FORMAT_KEYS))
                    }
                    _ => None,
                };
                if let Some((index, format)) = parsed
                    && is_non_empty_object(format)
                {
                    out.insert(index, format.clone());
                }
            }
        }
        _ => {}
    }
    out
}

fn parse_runs(value: &Value) -> Vec<FormatRun> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(Value::as_object)
        .filter_map(parse_run)
        .collect()
}

fn parse_run(obj: &Map<String, Value>) -> Option<FormatRun> {
    let format = lookup(obj, FORMAT_KEYS).filter(|format| is_non_empty_object(format))?;
    let (start_row, end_row, start_col, end_col) = match obj.get("range") {
        Some(Value::String(range)) => parse_a1_range(range)?,
        Some(Value::Object(range)) => run_bounds(range)?,
        _ => run_bounds(obj)?,
    };
    Some(FormatRun {
        start_row,
        end_row,
        start_col,
        end_col,
        format: format.clone(),
    })
}

fn run_bounds(obj: &Map<String, Value>) -> Option<(u32, u32, u32, u32)> {
    let start_row = non_negative(lookup(obj, &["startRow", "start_row", "r0", "top"]))?;
    let end_row = inclusive_end(
        obj,
        &["endRow", "end_row", "r1", "bottom"],
        &["endRowExclusive", "end_row_exclusive"],
    )?;
    let start_col = non_negative(lookup(obj, &["startCol", "start_col", "c0", "left"]))?;
    let end_col = inclusive_end(
        obj,
        &["endCol", "end_col", "c1", "right"],
        &["endColExclusive", "end_col_exclusive"],
    )?;
    ordered_bounds(start_row, end_row, start_col, end_col)
}

fn inclusive_end(
    obj: &Map<String, Value>,
    inclusive_keys: &[&str],
    exclusive_keys: &[&str],
) -> Option<u32> {
    match non_negative(lookup(obj, exclusive_keys)) {
        Some(0) => None,
        Some(exclusive) => Some(exclusive - 1),
        None => non_negative(lookup(obj, inclusive_keys)),
    }
}

fn ordered_bounds(r0: u32, r1: u32, c0: u32, c1: u32) -> Option<(u32, u32, u32, u32)> {
    Some((r0.min(r1), r0.max(r1), c0.min(c1), c0.max(c1)))
}

fn parse_a1_range(range: &str) -> Option<(u32, u32, u32, u32)> {
    let (start, end) = range.split_once(':').unwrap_or((range, range));
    let (r0, c0) = a1_to_index(start)?;
    let (r1, c1) = a1_to_index(end)?;
    ordered_bounds(r0, r1, c0, c1)
}

/// Column-scoped row runs:
/// `[{"col": 2, "runs": [{"startRow": 0, "endRowExclusive": 5, "format": {...}}]}]`
/// or `{"2": [{...}]}`.
fn parse_runs_by_col(value: &Value) -> Vec<FormatRun> {
    let mut per_col: Vec<(u32, &Vec<Value>)> = match value {
        Value::Array(entries) => entries
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|entry| {
                let col = non_negative(lookup(entry, COL_INDEX_KEYS))?;
                let runs = entry.get("runs").and_then(Value::as_array)?;
                Some((col, runs))
            })
            .collect(),
        Value::Object(obj) => obj
            .iter()
            .filter_map(|(key, runs)| Some((key.trim().parse().ok()?, runs.as_array()?)))
            .collect(),
        _ => Vec::new(),
    };
    per_col.sort_by_key(|(col, _)| *col);

    let mut out = Vec::new();
    for (col, runs) in per_col {
        for run in runs.iter().filter_map(Value::as_object) {
            let Some(format) = lookup(run, FORMAT_KEYS).filter(|format| is_non_empty_object(format))
            else {
                continue;
            };
            let Some(start_row) = non_negative(lookup(run, &["startRow", "start_row"])) else {
                continue;
            };
            let Some(end_row) = inclusive_end(
                run,
                &["endRow", "end_row"],
                &["endRowExclusive", "end_row_exclusive"],
            ) else {
                continue;
            };
            if end_row < start_row {
                continue;
            }
            out.push(FormatRun {
                start_row,
                end_row,
                start_col: col,
                end_col: col,
                format: format.clone(),
            });
        }
    }
    out
}
