use super::{CellChange, CellCoord, CellSnapshot, DiffConfig, MoveChange, SheetDiff, SheetState};
use crate::formula::normalize_formula;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub fn diff_sheet_states(before: &SheetState, after: &SheetState) -> SheetDiff {
    diff_sheet_states_with(before, after, &DiffConfig::default())
}

/// Classifies every cell present in either snapshot.
///
/// Move pairing is deterministic but not spatially aware: removed cells are
/// visited in row-major order and each takes the first remaining added cell
/// with identical content.
pub fn diff_sheet_states_with(
    before: &SheetState,
    after: &SheetState,
    config: &DiffConfig,
) -> SheetDiff {
    let mut diff = SheetDiff::default();
    let coords: BTreeSet<CellCoord> = before.keys().chain(after.keys()).copied().collect();

    let mut removed = Vec::new();
    let mut added = Vec::new();
    for coord in coords {
        match (before.get(&coord), after.get(&coord)) {
            (Some(old), Some(new)) => {
                if !same_content(old, new, config) {
                    diff.modified.push(CellChange::new(coord, Some(old), Some(new)));
                } else if old.format != new.format {
                    diff.format_only.push(CellChange::new(coord, Some(old), Some(new)));
                }
            }
            (Some(old), None) => removed.push((coord, old)),
            (None, Some(new)) => added.push((coord, new)),
            (None, None) => {}
        }
    }

    if config.move_detection {
        let mut by_content: BTreeMap<String, VecDeque<(CellCoord, &CellSnapshot)>> =
            BTreeMap::new();
        for (coord, cell) in &added {
            if cell.has_content() {
                by_content
                    .entry(content_key(cell))
                    .or_default()
                    .push_back((*coord, *cell));
            }
        }

        let mut moved_to = BTreeSet::new();
        removed.retain(|(from, old)| {
            if !old.has_content() {
                return true;
            }
            let Some((to, new)) = by_content
                .get_mut(&content_key(old))
                .and_then(VecDeque::pop_front)
            else {
                return true;
            };
            moved_to.insert(to);
            diff.moved.push(MoveChange {
                from: *from,
                to,
                from_address: from.a1(),
                to_address: to.a1(),
                before: (*old).clone(),
                after: new.clone(),
            });
            false
        });
        added.retain(|(coord, _)| !moved_to.contains(coord));
    }

    diff.added = added
        .into_iter()
        .map(|(coord, new)| CellChange::new(coord, None, Some(new)))
        .collect();
    diff.removed = removed
        .into_iter()
        .map(|(coord, old)| CellChange::new(coord, Some(old), None))
        .collect();
    diff.moved.sort_by_key(|change| (change.from, change.to));
    diff
}

fn same_content(old: &CellSnapshot, new: &CellSnapshot, config: &DiffConfig) -> bool {
    if old.enc != new.enc || old.value != new.value {
        return false;
    }
    match (&old.formula, &new.formula) {
        (Some(a), Some(b)) if config.semantic_formulas => normalize_formula(a) == normalize_formula(b),
        (a, b) => a == b,
    }
}

fn content_key(cell: &CellSnapshot) -> String {
    serde_json::json!([cell.value, cell.formula, cell.enc]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sheet(cells: &[((u32, u32), CellSnapshot)]) -> SheetState {
        cells
            .iter()
            .map(|((row, col), cell)| (CellCoord::new(*row, *col), cell.clone()))
            .collect()
    }

    #[test]
    fn test_single_move() {
        let before = sheet(&[((0, 0), CellSnapshot::value(json!(1)))]);
        let after = sheet(&[((0, 1), CellSnapshot::value(json!(1)))]);
        let diff = diff_sheet_states(&before, &after);
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        assert_eq!(diff.moved.len(), 1);
        assert_eq!(diff.moved[0].from_address, "A1");
        assert_eq!(diff.moved[0].to_address, "B1");
        assert_eq!(diff.moved[0].after.value, json!(1));
    }

    #[test]
    fn test_move_detection_can_be_disabled() {
        let before = sheet(&[((0, 0), CellSnapshot::value(json!(1)))]);
        let after = sheet(&[((0, 1), CellSnapshot::value(json!(1)))]);
        let config = DiffConfig {
            move_detection: false,
            ..DiffConfig::default()
        };
        let diff = diff_sheet_states_with(&before, &after, &config);
        assert_eq!((diff.added.len(), diff.removed.len(), diff.moved.len()), (1, 1, 0));
    }

    #[test]
    fn test_duplicate_values_pair_in_key_order() {
        let before = sheet(&[
            ((0, 0), CellSnapshot::value(json!("x"))),
            ((5, 0), CellSnapshot::value(json!("x"))),
        ]);
        let after = sheet(&[
            ((1, 1), CellSnapshot::value(json!("x"))),
            ((9, 9), CellSnapshot::value(json!("x"))),
            ((9, 10), CellSnapshot::value(json!("x"))),
        ]);
        let diff = diff_sheet_states(&before, &after);
        let pairs: Vec<_> = diff.moved.iter().map(|m| (m.from, m.to)).collect();
        assert_eq!(
            pairs,
            vec![
                (CellCoord::new(0, 0), CellCoord::new(1, 1)),
                (CellCoord::new(5, 0), CellCoord::new(9, 9)),
            ]
        );
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].address, "K10");
    }

    #[test]
    fn test_format_only_and_modified() {
        let before = sheet(&[
            ((0, 0), CellSnapshot::value(json!(1)).with_format(json!({"bold": true}))),
            ((0, 1), CellSnapshot::value(json!(2))),
        ]);
        let after = sheet(&[
            ((0, 0), CellSnapshot::value(json!(1)).with_format(json!({"bold": false}))),
            ((0, 1), CellSnapshot::value(json!(3))),
        ]);
        let diff = diff_sheet_states(&before, &after);
        assert_eq!(diff.format_only.len(), 1);
        assert_eq!(diff.format_only[0].address, "A1");
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].address, "B1");
    }

    #[test]
    fn test_equivalent_formulas_are_not_modified() {
        let before = sheet(&[((0, 0), CellSnapshot::formula("=A2+B2"))]);
        let after = sheet(&[((0, 0), CellSnapshot::formula("=b2 + a2"))]);
        assert!(diff_sheet_states(&before, &after).is_empty());

        let literal = DiffConfig {
            semantic_formulas: false,
            ..DiffConfig::default()
        };
        assert_eq!(diff_sheet_states_with(&before, &after, &literal).modified.len(), 1);
    }

    #[test]
    fn test_format_only_cells_never_move() {
        let styled = CellSnapshot::default().with_format(json!({"fill": "red"}));
        let before = sheet(&[((0, 0), styled.clone())]);
        let after = sheet(&[((3, 3), styled)]);
        let diff = diff_sheet_states(&before, &after);
        assert!(diff.moved.is_empty());
        assert_eq!((diff.added.len(), diff.removed.len()), (1, 1));
    }
}
