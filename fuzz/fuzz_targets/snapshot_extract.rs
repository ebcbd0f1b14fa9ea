#![no_main]

use libfuzzer_sys::fuzz_target;
use sheet_history::{WorkbookState, diff_workbooks};

fuzz_target!(|data: &[u8]| {
    if let Ok(state) = WorkbookState::from_snapshot_bytes(data) {
        assert!(diff_workbooks(&state, &state).is_empty());
    }
});
