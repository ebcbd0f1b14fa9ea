//! Version-history diffs against stored snapshots.

use super::sheet::diff_sheet_states_with;
use super::workbook::{WorkbookDiff, WorkbookState, diff_workbooks_with};
use super::{DiffConfig, SheetDiff};
use crate::error::{HistoryError, Result};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub id: String,
    pub snapshot: Vec<u8>,
}

/// Source of stored workbook versions.
pub trait VersionStore {
    /// Returns `Ok(None)` when no version has this id.
    fn get_version(&self, id: &str) -> Result<Option<VersionRecord>>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryVersionStore {
    versions: BTreeMap<String, Vec<u8>>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, snapshot: impl Into<Vec<u8>>) {
        self.versions.insert(id.into(), snapshot.into());
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl VersionStore for InMemoryVersionStore {
    fn get_version(&self, id: &str) -> Result<Option<VersionRecord>> {
        Ok(self.versions.get(id).map(|snapshot| VersionRecord {
            id: id.to_string(),
            snapshot: snapshot.clone(),
        }))
    }
}

/// Versions stored as `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct DirVersionStore {
    dir: PathBuf,
}

impl DirVersionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\'])
            && !id.contains('\0');
        valid.then(|| self.dir.join(format!("{id}.json")))
    }
}

impl VersionStore for DirVersionStore {
    fn get_version(&self, id: &str) -> Result<Option<VersionRecord>> {
        let Some(path) = self.path_for(id) else {
            debug!(id, "rejecting version id that is not a plain file name");
            return Ok(None);
        };
        match std::fs::read(&path) {
            Ok(snapshot) => Ok(Some(VersionRecord {
                id: id.to_string(),
                snapshot,
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(HistoryError::Io(err)),
        }
    }
}

fn load_version(store: &dyn VersionStore, id: &str) -> Result<WorkbookState> {
    debug!(id, "loading version");
    let record = store
        .get_version(id)?
        .ok_or_else(|| HistoryError::VersionNotFound { id: id.to_string() })?;
    WorkbookState::from_snapshot_bytes(&record.snapshot)
}

/// Diffs one sheet of a stored version (before) against the current state
/// (after).
pub fn diff_sheet_version_against_current(
    store: &dyn VersionStore,
    version_id: &str,
    current: &WorkbookState,
    sheet_id: &str,
    config: &DiffConfig,
) -> Result<SheetDiff> {
    let before = load_version(store, version_id)?;
    Ok(diff_sheet_states_with(
        &before.sheet_cells(sheet_id),
        &current.sheet_cells(sheet_id),
        config,
    ))
}

pub fn diff_sheet_versions(
    store: &dyn VersionStore,
    before_id: &str,
    after_id: &str,
    sheet_id: &str,
    config: &DiffConfig,
) -> Result<SheetDiff> {
    let before = load_version(store, before_id)?;
    let after = load_version(store, after_id)?;
    Ok(diff_sheet_states_with(
        &before.sheet_cells(sheet_id),
        &after.sheet_cells(sheet_id),
        config,
    ))
}

pub fn diff_workbook_version_against_current(
    store: &dyn VersionStore,
    version_id: &str,
    current: &WorkbookState,
    config: &DiffConfig,
) -> Result<WorkbookDiff> {
    let before = load_version(store, version_id)?;
    Ok(diff_workbooks_with(&before, current, config))
}

pub fn diff_workbook_versions(
    store: &dyn VersionStore,
    before_id: &str,
    after_id: &str,
    config: &DiffConfig,
) -> Result<WorkbookDiff> {
    let before = load_version(store, before_id)?;
    let after = load_version(store, after_id)?;
    Ok(diff_workbooks_with(&before, &after, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_version_reports_id() {
        let store = InMemoryVersionStore::new();
        let err = diff_workbook_versions(&store, "v1", "v2", &DiffConfig::default()).unwrap_err();
        match err {
            HistoryError::VersionNotFound { id } => assert_eq!(id, "v1"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_dir_store_rejects_path_like_ids() {
        let store = DirVersionStore::new("/nonexistent");
        assert!(store.get_version("../secret").unwrap().is_none());
        assert!(store.get_version("missing").unwrap().is_none());
    }

    #[test]
    fn test_sheet_versions() {
        let mut store = InMemoryVersionStore::new();
        store.insert(
            "v1",
            r#"{"sheets":[{"id":"s1","cells":[{"row":0,"col":0,"value":1}]}]}"#,
        );
        store.insert(
            "v2",
            r#"{"sheets":[{"id":"s1","cells":[{"row":0,"col":0,"value":2}]}]}"#,
        );
        let diff = diff_sheet_versions(&store, "v1", "v2", "s1", &DiffConfig::default()).unwrap();
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].address, "A1");
    }
}
