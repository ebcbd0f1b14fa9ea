use super::sheet::diff_sheet_states_with;
use super::{CellCoord, CellSnapshot, DiffConfig, SheetDiff, SheetState};
use crate::format::FormatLayers;
use crate::shared::Document;
use crate::state::address::a1_to_index;
use crate::state::{CellContent, DocumentState, Visibility, read_document_state};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetInfo {
    pub id: String,
    pub name: String,
    pub visibility: Visibility,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_color: Option<String>,
}

/// Diff-oriented projection of a whole workbook.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WorkbookState {
    pub sheets: Vec<SheetInfo>,
    pub sheet_order: Vec<String>,
    pub metadata: BTreeMap<String, Value>,
    pub named_ranges: BTreeMap<String, Value>,
    pub comments: BTreeMap<String, Value>,
    pub cells_by_sheet: BTreeMap<String, SheetState>,
}

impl WorkbookState {
    pub fn from_document(doc: &Document) -> Self {
        Self::from_document_state(&read_document_state(doc))
    }

    /// Projects a document state, resolving every cell's effective format.
    pub fn from_document_state(state: &DocumentState) -> Self {
        let sheet_order = state.sheets.ordered_ids();
        let sheets = sheet_order
            .iter()
            .map(|id| match state.sheets.meta_by_id.get(id) {
                Some(meta) => SheetInfo {
                    id: meta.id.clone(),
                    name: meta.name.clone(),
                    visibility: meta.visibility,
                    tab_color: meta.tab_color.clone(),
                },
                None => SheetInfo {
                    id: id.clone(),
                    name: id.clone(),
                    visibility: Visibility::Visible,
                    tab_color: None,
                },
            })
            .collect();

        let mut cells_by_sheet = BTreeMap::new();
        for (sheet_id, cells) in &state.cells {
            let layers = state
                .sheets
                .meta_by_id
                .get(sheet_id)
                .map(|meta| meta.view.layers())
                .unwrap_or_default();

            let mut contents = BTreeMap::new();
            let mut formats = BTreeMap::new();
            for (address, cell) in cells {
                let Some((row, col)) = a1_to_index(address) else {
                    debug!(sheet_id = %sheet_id, address = %address, "skipping invalid cell address");
                    continue;
                };
                let mut snapshot = CellSnapshot::default();
                match &cell.content {
                    CellContent::Value(value) => snapshot.value = value.clone(),
                    CellContent::Formula(formula) => snapshot.formula = Some(formula.clone()),
                    CellContent::Encrypted(enc) => snapshot.enc = Some(enc.clone()),
                }
                contents.insert((row, col), snapshot);
                formats.insert((row, col), cell.format.clone());
            }
            cells_by_sheet.insert(sheet_id.clone(), apply_layers(&layers, contents, &formats));
        }

        Self {
            sheets,
            sheet_order,
            metadata: state.metadata.clone(),
            named_ranges: state.named_ranges.clone(),
            comments: state.comments.clone(),
            cells_by_sheet,
        }
    }

    pub fn sheet(&self, id: &str) -> Option<&SheetInfo> {
        self.sheets.iter().find(|sheet| sheet.id == id)
    }

    /// Cells of one sheet; an unknown sheet reads as empty.
    pub fn sheet_cells(&self, id: &str) -> SheetState {
        self.cells_by_sheet.get(id).cloned().unwrap_or_default()
    }
}

/// Attaches effective formats to cell contents keyed by `(row, col)`.
pub(crate) fn apply_layers(
    layers: &FormatLayers,
    contents: BTreeMap<(u32, u32), CellSnapshot>,
    formats: &BTreeMap<(u32, u32), Option<Value>>,
) -> SheetState {
    let mut effective = layers.resolve_all(formats);
    contents
        .into_iter()
        .map(|((row, col), mut snapshot)| {
            snapshot.format = effective.remove(&(row, col)).flatten();
            (CellCoord::new(row, col), snapshot)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetRename {
    pub id: String,
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetsDiff {
    pub added: Vec<SheetRef>,
    pub removed: Vec<SheetRef>,
    pub renamed: Vec<SheetRename>,
    /// Sheets present on both sides appear in a different relative order.
    pub reordered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetDiffEntry {
    pub sheet_id: String,
    pub sheet_name: String,
    pub diff: SheetDiff,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyedEntry {
    pub id: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyedChange {
    pub id: String,
    pub before: Value,
    pub after: Value,
}

/// Added, removed and modified entries of an id-keyed collection, each
/// sorted by id.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct KeyedDiff {
    pub added: Vec<KeyedEntry>,
    pub removed: Vec<KeyedEntry>,
    pub modified: Vec<KeyedChange>,
}

impl KeyedDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    fn compute(
        before: &BTreeMap<String, Value>,
        after: &BTreeMap<String, Value>,
        same: impl Fn(&Value, &Value) -> bool,
    ) -> Self {
        let mut diff = Self::default();
        let ids: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
        for id in ids {
            match (before.get(id), after.get(id)) {
                (Some(old), Some(new)) if !same(old, new) => diff.modified.push(KeyedChange {
                    id: id.clone(),
                    before: old.clone(),
                    after: new.clone(),
                }),
                (Some(old), None) => diff.removed.push(KeyedEntry {
                    id: id.clone(),
                    value: old.clone(),
                }),
                (None, Some(new)) => diff.added.push(KeyedEntry {
                    id: id.clone(),
                    value: new.clone(),
                }),
                _ => {}
            }
        }
        diff
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkbookDiff {
    pub sheets: SheetsDiff,
    pub cells_by_sheet: Vec<SheetDiffEntry>,
    pub comments: KeyedDiff,
    pub named_ranges: KeyedDiff,
    pub metadata: KeyedDiff,
}

impl WorkbookDiff {
    pub fn is_empty(&self) -> bool {
        self.sheets.added.is_empty()
            && self.sheets.removed.is_empty()
            && self.sheets.renamed.is_empty()
            && !self.sheets.reordered
            && self.cells_by_sheet.is_empty()
            && self.comments.is_empty()
            && self.named_ranges.is_empty()
            && self.metadata.is_empty()
    }
}

pub fn diff_workbooks(before: &WorkbookState, after: &WorkbookState) -> WorkbookDiff {
    diff_workbooks_with(before, after, &DiffConfig::default())
}

pub fn diff_workbooks_with(
    before: &WorkbookState,
    after: &WorkbookState,
    config: &DiffConfig,
) -> WorkbookDiff {
    let sheets = diff_sheets(before, after);

    let mut sheet_ids: Vec<&String> = after.sheet_order.iter().collect();
    for id in before.sheet_order.iter().chain(before.cells_by_sheet.keys()) {
        if !sheet_ids.contains(&id) {
            sheet_ids.push(id);
        }
    }
    for id in after.cells_by_sheet.keys() {
        if !sheet_ids.contains(&id) {
            sheet_ids.push(id);
        }
    }

    let empty = SheetState::new();
    let mut cells_by_sheet = Vec::new();
    for id in sheet_ids {
        let old = before.cells_by_sheet.get(id).unwrap_or(&empty);
        let new = after.cells_by_sheet.get(id).unwrap_or(&empty);
        let diff = diff_sheet_states_with(old, new, config);
        if diff.is_empty() {
            continue;
        }
        let sheet_name = after
            .sheet(id)
            .or_else(|| before.sheet(id))
            .map(|sheet| sheet.name.clone())
            .unwrap_or_else(|| id.clone());
        cells_by_sheet.push(SheetDiffEntry {
            sheet_id: id.clone(),
            sheet_name,
            diff,
        });
    }

    WorkbookDiff {
        sheets,
        cells_by_sheet,
        comments: KeyedDiff::compute(&before.comments, &after.comments, |old, new| {
            CommentSummary::of(old) == CommentSummary::of(new)
        }),
        named_ranges: KeyedDiff::compute(&before.named_ranges, &after.named_ranges, |old, new| old == new),
        metadata: KeyedDiff::compute(&before.metadata, &after.metadata, |old, new| old == new),
    }
}

fn diff_sheets(before: &WorkbookState, after: &WorkbookState) -> SheetsDiff {
    let mut diff = SheetsDiff::default();
    for sheet in &after.sheets {
        match before.sheet(&sheet.id) {
            None => diff.added.push(SheetRef {
                id: sheet.id.clone(),
                name: sheet.name.clone(),
            }),
            Some(old) if old.name != sheet.name => diff.renamed.push(SheetRename {
                id: sheet.id.clone(),
                old_name: old.name.clone(),
                new_name: sheet.name.clone(),
            }),
            Some(_) => {}
        }
    }
    for sheet in &before.sheets {
        if after.sheet(&sheet.id).is_none() {
            diff.removed.push(SheetRef {
                id: sheet.id.clone(),
                name: sheet.name.clone(),
            });
        }
    }
    diff.added.sort_by(|a, b| a.id.cmp(&b.id));
    diff.removed.sort_by(|a, b| a.id.cmp(&b.id));
    diff.renamed.sort_by(|a, b| a.id.cmp(&b.id));

    let common = |order: &[String], other: &WorkbookState| -> Vec<String> {
        order
            .iter()
            .filter(|id| other.sheet(id).is_some())
            .cloned()
            .collect()
    };
    diff.reordered = common(&before.sheet_order, after) != common(&after.sheet_order, before);
    diff
}

/// The parts of a comment a reviewer cares about.
#[derive(Debug, PartialEq)]
struct CommentSummary<'a> {
    cell_ref: Option<&'a Value>,
    content: Option<&'a Value>,
    resolved: bool,
    replies: usize,
}

impl<'a> CommentSummary<'a> {
    fn of(comment: &'a Value) -> Self {
        Self {
            cell_ref: field(comment, &["cellRef", "cell", "ref", "address"]),
            content: field(comment, &["content", "text", "body"]),
            resolved: field(comment, &["resolved", "isResolved", "done"])
                .and_then(Value::as_bool)
                .unwrap_or(false),
            replies: field(comment, &["replies", "thread"])
                .and_then(Value::as_array)
                .map_or(0, Vec::len),
        }
    }
}

fn field<'a>(comment: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| comment.get(*name))
}
