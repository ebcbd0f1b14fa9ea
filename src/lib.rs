//! sheet-history: canonical snapshots and semantic diffs for collaborative
//! spreadsheet documents.
//!
//! The crate reconciles a live replicated document into an owned, diffable
//! [`DocumentState`] and back, and computes the diffs a version-history UI
//! shows:
//!
//! - **State reader/writer** - schema-tolerant extraction and change-minimal
//!   write-back over a shared CRDT document
//! - **Semantic differ** - added/removed/modified/moved/format-only cells,
//!   plus sheet, comment, named range and metadata changes
//! - **Layered formats** - effective cell styles from sheet, column, row,
//!   range and cell layers
//! - **Formulas** - normalization for equivalence checks and token-level
//!   edit scripts for display
//!
//! # Quick Start
//!
//! ```rust
//! use sheet_history::{DiffConfig, WorkbookState, diff_workbooks_with, normalize_formula};
//!
//! let before = WorkbookState::from_snapshot_bytes(
//!     br#"{"sheets":[{"id":"s1","cells":[{"row":0,"col":0,"formula":"=A2+B2"}]}]}"#,
//! )
//! .unwrap();
//! let after = WorkbookState::from_snapshot_bytes(
//!     br#"{"sheets":[{"id":"s1","cells":[{"row":0,"col":0,"formula":"=b2 + a2"}]}]}"#,
//! )
//! .unwrap();
//!
//! assert!(diff_workbooks_with(&before, &after, &DiffConfig::default()).is_empty());
//! assert_eq!(normalize_formula("=b2 + a2"), "=A2+B2");
//! ```

// CRDT primitives
pub mod core;

// Shared document the reader and writer operate on
pub mod shared;

// Canonical document state, reader and writer
pub mod state;

// Layered format resolution
pub mod format;

// Semantic differ and version history
pub mod diff;

// Formula normalization and token diffs
pub mod formula;

pub mod error;

pub use core::{LwwRegister, Map, OpId, PeerId, Sequence, StateVector};

pub use shared::{Branch, BranchMut, Document, RawItem, RootShape, Transaction, Update, Value};

pub use state::address::{CellKey, KeyEncoding, a1_to_index, index_to_a1};
pub use state::{
    Cell, CellContent, DocumentState, MergedRange, Nullable, ReaderOptions, SheetMeta,
    SheetView, SheetsState, Visibility, apply_document_state, probe_root_shape,
    read_document_state, read_document_state_with,
};

pub use format::{FormatLayers, FormatRun, deep_merge, parse_layers};

pub use diff::{
    CellChange, CellCoord, CellSnapshot, DiffConfig, DirVersionStore, InMemoryVersionStore,
    MoveChange, SheetDiff, SheetState, VersionRecord, VersionStore, WorkbookDiff, WorkbookState,
    diff_sheet_states, diff_sheet_states_with, diff_sheet_version_against_current,
    diff_sheet_versions, diff_workbook_version_against_current, diff_workbook_versions,
    diff_workbooks, diff_workbooks_with,
};

pub use formula::{
    DiffOp, DiffOpKind, FormulaDiff, FormulaParseError, TokenDiffOptions, diff_formula,
    diff_tokens, normalize_formula, parse_formula, tokenize,
};

pub use error::{HistoryError, Result};
