use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

const BEFORE: &str = r#"{
    "sheets": [{"id": "s1", "name": "Budget", "cells": [
        {"row": 0, "col": 0, "value": 10},
        {"row": 1, "col": 0, "formula": "=A1*2"}
    ]}]
}"#;

const AFTER: &str = r#"{
    "sheets": [{"id": "s1", "name": "Budget", "cells": [
        {"row": 0, "col": 0, "value": 12},
        {"row": 1, "col": 0, "formula": "=2 * a1"}
    ]}]
}"#;

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
#[allow(deprecated)]
fn test_diff_identical_snapshots() {
    let dir = tempdir().unwrap();
    let before = write(dir.path(), "before.json", BEFORE);

    let mut cmd = Command::cargo_bin("sheet-history").unwrap();
    cmd.arg("diff").arg(&before).arg(&before);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No differences."));
}

#[test]
#[allow(deprecated)]
fn test_diff_reports_modified_cell_json() {
    let dir = tempdir().unwrap();
    let before = write(dir.path(), "before.json", BEFORE);
    let after = write(dir.path(), "after.json", AFTER);

    let mut cmd = Command::cargo_bin("sheet-history").unwrap();
    cmd.arg("diff").arg(&before).arg(&after).arg("--json");

    let output = cmd.output().unwrap();
    assert_eq!(output.status.code(), Some(1));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let sheets = json.get("cellsBySheet").unwrap().as_array().unwrap();
    assert_eq!(sheets.len(), 1);
    let modified = sheets[0]["diff"]["modified"].as_array().unwrap();
    // The formula only changed operand order and case.
    assert_eq!(modified.len(), 1);
    assert_eq!(modified[0]["address"], "A1");
}

#[test]
#[allow(deprecated)]
fn test_diff_single_sheet_text() {
    let dir = tempdir().unwrap();
    let before = write(dir.path(), "before.json", BEFORE);
    let after = write(dir.path(), "after.json", AFTER);

    let mut cmd = Command::cargo_bin("sheet-history").unwrap();
    cmd.arg("diff")
        .arg(&before)
        .arg(&after)
        .arg("--sheet")
        .arg("s1");

    cmd.assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("~ A1 10 -> 12"));
}

#[test]
#[allow(deprecated)]
fn test_diff_malformed_snapshot() {
    let dir = tempdir().unwrap();
    let before = write(dir.path(), "before.json", BEFORE);
    let broken = write(dir.path(), "broken.json", "{\"sheets\": [");

    let mut cmd = Command::cargo_bin("sheet-history").unwrap();
    cmd.arg("diff").arg(&before).arg(&broken);

    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("malformed snapshot"));
}

#[test]
#[allow(deprecated)]
fn test_diff_version_between_stored_versions() {
    let dir = tempdir().unwrap();
    write(dir.path(), "v1.json", BEFORE);
    write(dir.path(), "v2.json", AFTER);

    let mut cmd = Command::cargo_bin("sheet-history").unwrap();
    cmd.arg("diff-version")
        .arg("--store")
        .arg(dir.path())
        .arg("v1")
        .arg("v2");

    cmd.assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("sheet Budget:"));
}

#[test]
#[allow(deprecated)]
fn test_diff_version_against_current_file() {
    let dir = tempdir().unwrap();
    write(dir.path(), "v1.json", BEFORE);
    let current = write(dir.path(), "current.json", BEFORE);

    let mut cmd = Command::cargo_bin("sheet-history").unwrap();
    cmd.arg("diff-version")
        .arg("--store")
        .arg(dir.path())
        .arg("v1")
        .arg("--current")
        .arg(&current);

    cmd.assert().success();
}

#[test]
#[allow(deprecated)]
fn test_diff_version_missing_version() {
    let dir = tempdir().unwrap();
    write(dir.path(), "v1.json", BEFORE);

    let mut cmd = Command::cargo_bin("sheet-history").unwrap();
    cmd.arg("diff-version")
        .arg("--store")
        .arg(dir.path())
        .arg("v1")
        .arg("nope");

    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("version not found: nope"));
}

#[test]
#[allow(deprecated)]
fn test_normalize_prints_canonical_form() {
    let mut cmd = Command::cargo_bin("sheet-history").unwrap();
    cmd.arg("normalize").arg("=b1 + a1");

    cmd.assert().success().stdout("=A1+B1\n");
}

#[test]
#[allow(deprecated)]
fn test_formula_diff_normalized_json() {
    let mut cmd = Command::cargo_bin("sheet-history").unwrap();
    cmd.arg("formula-diff")
        .arg("=A1+B1")
        .arg("=a1+b1")
        .arg("--normalize")
        .arg("--json");

    let output = cmd.output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["equal"], true);
    assert_eq!(json["ops"][0]["type"], "equal");
}

#[test]
#[allow(deprecated)]
fn test_formula_diff_exact_reports_changes() {
    let mut cmd = Command::cargo_bin("sheet-history").unwrap();
    cmd.arg("formula-diff").arg("=A1+B1").arg("=a1+b1");

    cmd.assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("- A1").and(predicate::str::contains("+ a1")))
        .stdout(predicate::str::contains("equivalent: no"));
}
