use proptest::prelude::*;
use sheet_history::{DiffOpKind, diff_tokens};
use sheet_history_naive_oracle::{apply_edit_script, edit_count, lcs_edit_script};
mod proptest_config;

fn tokens() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop::sample::select(vec!["A1", "B1", "+", "*", "(", ")", "SUM", ","]),
        0..40,
    )
    .prop_map(|tokens| tokens.into_iter().map(String::from).collect())
}

fn no_adjacent_same_kind(kinds: &[DiffOpKind]) -> bool {
    kinds.windows(2).all(|pair| pair[0] != pair[1])
}

#[test]
fn test_guardrail_replaces_middle_only() {
    let old: Vec<String> = ["=", "A1", "+", "B1"].map(String::from).to_vec();
    let new: Vec<String> = ["=", "A2", "-", "B1"].map(String::from).to_vec();
    let ops = diff_tokens(&old, &new, |a, b| a == b, 2);
    let kinds: Vec<DiffOpKind> = ops.iter().map(|op| op.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DiffOpKind::Equal,
            DiffOpKind::Delete,
            DiffOpKind::Insert,
            DiffOpKind::Equal,
        ]
    );
    assert_eq!(ops[1].tokens, vec!["A1".to_string(), "+".to_string()]);
    assert_eq!(apply_edit_script(&old, &ops), Some(new));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(proptest_config::cases()))]

    #[test]
    fn prop_edit_count_matches_lcs(old in tokens(), new in tokens()) {
        let ops = diff_tokens(&old, &new, |a, b| a == b, usize::MAX);
        let oracle = lcs_edit_script(&old, &new);
        prop_assert_eq!(edit_count(&ops), edit_count(&oracle));
        prop_assert_eq!(apply_edit_script(&old, &ops), Some(new.clone()));
        prop_assert_eq!(apply_edit_script(&old, &oracle), Some(new));
    }

    #[test]
    fn prop_ops_are_coalesced(old in tokens(), new in tokens()) {
        let ops = diff_tokens(&old, &new, |a, b| a == b, usize::MAX);
        let kinds: Vec<DiffOpKind> = ops.iter().map(|op| op.kind).collect();
        prop_assert!(no_adjacent_same_kind(&kinds), "{:?}", kinds);
        prop_assert!(ops.iter().all(|op| !op.tokens.is_empty()));
    }

    #[test]
    fn prop_guardrail_still_rebuilds_target(old in tokens(), new in tokens(), limit in 0usize..8) {
        let ops = diff_tokens(&old, &new, |a, b| a == b, limit);
        prop_assert_eq!(apply_edit_script(&old, &ops), Some(new.clone()));
        // Over the limit the middle is replaced wholesale, so the edit
        // count can only grow relative to the minimal script.
        let minimal = edit_count(&lcs_edit_script(&old, &new));
        prop_assert!(edit_count(&ops) >= minimal);
    }

    #[test]
    fn prop_identical_inputs_are_one_equal_run(old in tokens()) {
        let ops = diff_tokens(&old, &old, |a, b| a == b, 0);
        prop_assert!(ops.len() <= 1);
        prop_assert!(ops.iter().all(|op| op.kind == DiffOpKind::Equal));
    }
}
