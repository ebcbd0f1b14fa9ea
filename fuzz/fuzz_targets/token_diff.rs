#![no_main]

use libfuzzer_sys::fuzz_target;
use sheet_history::{DiffOpKind, TokenDiffOptions, diff_formula};

fuzz_target!(|data: &[u8]| {
    let input = String::from_utf8_lossy(data);
    let (old, new) = input.split_once('\n').unwrap_or((&input, ""));
    let diff = diff_formula(old, new, &TokenDiffOptions::default());

    let rebuilt: String = diff
        .ops
        .iter()
        .filter(|op| op.kind != DiffOpKind::Delete)
        .flat_map(|op| op.tokens.iter().map(String::as_str))
        .collect();
    let kept: String = diff
        .ops
        .iter()
        .filter(|op| op.kind != DiffOpKind::Insert)
        .flat_map(|op| op.tokens.iter().map(String::as_str))
        .collect();
    assert_eq!(kept, old);
    assert_eq!(rebuilt, new);
});
