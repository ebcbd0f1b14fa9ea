use clap::{Parser, Subcommand};
use serde::Serialize;
use sheet_history::diff::KeyedDiff;
use sheet_history::{
    CellSnapshot, DiffConfig, DiffOpKind, DirVersionStore, SheetDiff,
    TokenDiffOptions, WorkbookDiff, WorkbookState, diff_formula, diff_sheet_states_with,
    diff_sheet_version_against_current, diff_sheet_versions, diff_workbook_version_against_current,
    diff_workbook_versions, diff_workbooks_with, normalize_formula,
};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Diffs two workbook snapshot files
    Diff {
        before: PathBuf,
        after: PathBuf,
        /// Only diff the cells of this sheet id
        #[arg(long)]
        sheet: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Diffs a stored version against another version or a snapshot file
    DiffVersion {
        /// Directory holding `<id>.json` snapshots
        #[arg(long)]
        store: PathBuf,
        version: String,
        #[arg(required_unless_present = "current", conflicts_with = "current")]
        other: Option<String>,
        /// Snapshot file to use as the newer side
        #[arg(long)]
        current: Option<PathBuf>,
        #[arg(long)]
        sheet: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Prints the canonical form of a formula
    Normalize {
        #[arg(allow_hyphen_values = true)]
        formula: String,
    },
    /// Token-level diff of two formulas
    FormulaDiff {
        #[arg(allow_hyphen_values = true)]
        old: String,
        #[arg(allow_hyphen_values = true)]
        new: String,
        /// Ignore whitespace and identifier case
        #[arg(long)]
        normalize: bool,
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Diff {
            before,
            after,
            sheet,
            json,
        } => diff_command(&before, &after, sheet.as_deref(), json),
        Commands::DiffVersion {
            store,
            version,
            other,
            current,
            sheet,
            json,
        } => diff_version_command(
            &DirVersionStore::new(store),
            &version,
            other.as_deref(),
            current.as_deref(),
            sheet.as_deref(),
            json,
        ),
        Commands::Normalize { formula } => {
            println!("{}", normalize_formula(&formula));
            Ok(false)
        }
        Commands::FormulaDiff {
            old,
            new,
            normalize,
            json,
        } => formula_diff_command(&old, &new, normalize, json),
    };

    match result {
        Ok(false) => process::exit(0),
        Ok(true) => process::exit(1),
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(2);
        }
    }
}

fn read_snapshot(path: &Path) -> CliResult<WorkbookState> {
    let bytes = fs::read(path).map_err(|err| format!("{}: {err}", path.display()))?;
    Ok(WorkbookState::from_snapshot_bytes(&bytes)?)
}

/// Returns whether any difference was found.
fn diff_command(before: &Path, after: &Path, sheet: Option<&str>, json: bool) -> CliResult<bool> {
    let before = read_snapshot(before)?;
    let after = read_snapshot(after)?;
    let config = DiffConfig::default();
    match sheet {
        Some(sheet) => {
            let diff = diff_sheet_states_with(
                &before.sheet_cells(sheet),
                &after.sheet_cells(sheet),
                &config,
            );
            report_sheet(&diff, json)
        }
        None => report_workbook(&diff_workbooks_with(&before, &after, &config), json),
    }
}

fn diff_version_command(
    store: &DirVersionStore,
    version: &str,
    other: Option<&str>,
    current: Option<&Path>,
    sheet: Option<&str>,
    json: bool,
) -> CliResult<bool> {
    let config = DiffConfig::default();
    let current = current.map(read_snapshot).transpose()?;
    match (other, &current, sheet) {
        (Some(other), _, Some(sheet)) => {
            report_sheet(&diff_sheet_versions(store, version, other, sheet, &config)?, json)
        }
        (Some(other), _, None) => {
            report_workbook(&diff_workbook_versions(store, version, other, &config)?, json)
        }
        (None, Some(current), Some(sheet)) => report_sheet(
            &diff_sheet_version_against_current(store, version, current, sheet, &config)?,
            json,
        ),
        (None, Some(current), None) => report_workbook(
            &diff_workbook_version_against_current(store, version, current, &config)?,
            json,
        ),
        (None, None, _) => Err("either another version id or --current is required".into()),
    }
}

fn formula_diff_command(old: &str, new: &str, normalize: bool, json: bool) -> CliResult<bool> {
    let options = TokenDiffOptions {
        normalize,
        ..TokenDiffOptions::default()
    };
    let diff = diff_formula(old, new, &options);
    if json {
        print_json(&diff)?;
    } else {
        for op in &diff.ops {
            let marker = match op.kind {
                DiffOpKind::Equal => ' ',
                DiffOpKind::Delete => '-',
                DiffOpKind::Insert => '+',
            };
            println!("{marker} {}", op.tokens.concat());
        }
        println!("equivalent: {}", if diff.equal { "yes" } else { "no" });
    }
    Ok(!diff.equal)
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_sheet(diff: &SheetDiff, json: bool) -> CliResult<bool> {
    if json {
        print_json(diff)?;
    } else if diff.is_empty() {
        println!("No differences.");
    } else {
        print_sheet_diff(diff, "");
    }
    Ok(!diff.is_empty())
}

fn report_workbook(diff: &WorkbookDiff, json: bool) -> CliResult<bool> {
    if json {
        print_json(diff)?;
        return Ok(!diff.is_empty());
    }
    if diff.is_empty() {
        println!("No differences.");
        return Ok(false);
    }

    for sheet in &diff.sheets.added {
        println!("sheet added: {} ({})", sheet.name, sheet.id);
    }
    for sheet in &diff.sheets.removed {
        println!("sheet removed: {} ({})", sheet.name, sheet.id);
    }
    for rename in &diff.sheets.renamed {
        println!("sheet renamed: {} -> {}", rename.old_name, rename.new_name);
    }
    if diff.sheets.reordered {
        println!("sheet order changed");
    }
    for entry in &diff.cells_by_sheet {
        println!("sheet {}:", entry.sheet_name);
        print_sheet_diff(&entry.diff, "  ");
    }
    for (label, keyed) in [
        ("comment", &diff.comments),
        ("named range", &diff.named_ranges),
        ("metadata", &diff.metadata),
    ] {
        print_keyed(label, keyed);
    }
    Ok(true)
}

fn print_keyed(label: &str, diff: &KeyedDiff) {
    for entry in &diff.added {
        println!("{label} added: {}", entry.id);
    }
    for entry in &diff.removed {
        println!("{label} removed: {}", entry.id);
    }
    for change in &diff.modified {
        println!("{label} modified: {}", change.id);
    }
}

fn print_sheet_diff(diff: &SheetDiff, indent: &str) {
    for change in &diff.added {
        println!("{indent}+ {} {}", change.address, describe(change.after.as_ref()));
    }
    for change in &diff.removed {
        println!("{indent}- {} {}", change.address, describe(change.before.as_ref()));
    }
    for change in &diff.modified {
        println!(
            "{indent}~ {} {} -> {}",
            change.address,
            describe(change.before.as_ref()),
            describe(change.after.as_ref())
        );
    }
    for change in &diff.format_only {
        println!("{indent}* {} format", change.address);
    }
    for moved in &diff.moved {
        println!("{indent}> {} -> {}", moved.from_address, moved.to_address);
    }
}

fn describe(cell: Option<&CellSnapshot>) -> String {
    match cell {
        None => String::new(),
        Some(cell) if cell.enc.is_some() => "<encrypted>".to_string(),
        Some(cell) => match &cell.formula {
            Some(formula) => formula.clone(),
            None => cell.value.to_string(),
        },
    }
}
