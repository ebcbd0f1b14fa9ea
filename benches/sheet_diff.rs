use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;
use sheet_history::{
    CellCoord, CellSnapshot, FormatLayers, FormatRun, SheetState, diff_sheet_states,
};
use std::collections::BTreeMap;

/// A `rows` x 10 sheet of values and formulas.
fn create_sheet(rows: u32) -> SheetState {
    let mut sheet = SheetState::new();
    for row in 0..rows {
        for col in 0..10 {
            let cell = if col == 9 {
                CellSnapshot::formula(format!("=SUM(A{0}:I{0})", row + 1))
            } else {
                CellSnapshot::value(row * 10 + col)
            };
            sheet.insert(CellCoord::new(row, col), cell);
        }
    }
    sheet
}

fn bench_sheet_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("sheet_diff");

    for rows in [10u32, 100, 1_000, 10_000] {
        let before = create_sheet(rows);
        let mut after = before.clone();
        // Edit one row, shift another down by one.
        after.insert(CellCoord::new(0, 0), CellSnapshot::value("edited"));
        for col in 0..10 {
            if let Some(cell) = after.remove(&CellCoord::new(rows / 2, col)) {
                after.insert(CellCoord::new(rows, col), cell);
            }
        }
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| black_box(diff_sheet_states(black_box(&before), black_box(&after))));
        });
    }

    group.finish();
}

fn bench_resolve_formats(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_formats");

    for rows in [100u32, 1_000, 10_000] {
        let layers = FormatLayers {
            sheet_default: Some(json!({"font": {"size": 10}})),
            cols: BTreeMap::from([(0, json!({"bold": true}))]),
            rows: BTreeMap::new(),
            runs: (0..rows / 10)
                .map(|i| FormatRun {
                    start_row: i * 10,
                    end_row: i * 10 + 4,
                    start_col: 0,
                    end_col: 3,
                    format: json!({"fill": "#eee"}),
                })
                .collect(),
        };
        let cells: BTreeMap<(u32, u32), Option<serde_json::Value>> = (0..rows)
            .flat_map(|row| (0..10).map(move |col| ((row, col), None)))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| black_box(layers.resolve_all(black_box(&cells))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sheet_diff, bench_resolve_formats);
criterion_main!(benches);
