#![no_main]

use libfuzzer_sys::fuzz_target;
use sheet_history::{normalize_formula, parse_formula};

fuzz_target!(|data: &[u8]| {
    let input = String::from_utf8_lossy(data);
    let once = normalize_formula(&input);
    if parse_formula(&input).is_ok() {
        assert!(parse_formula(&once).is_ok(), "{once}");
        assert_eq!(normalize_formula(&once), once);
    }
});
