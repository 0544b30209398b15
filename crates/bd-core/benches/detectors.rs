//! Criterion benchmarks for the per-entity detectors and a full MACD run.
//!
//! Benchmarks `KleinbergDetector::detect` (with and without smoothing),
//! `MacdDetector::detect`, and `BurstOrchestrator::run_method` against an
//! in-memory store.

use bd_common::{EntityKey, EntityRegistry, KleinbergParams, MacdParams, Method};
use bd_config::DetectConfig;
use bd_core::kleinberg::KleinbergDetector;
use bd_core::macd::MacdDetector;
use bd_core::matrix::{MatrixRow, TimeSeriesMatrix};
use bd_core::orchestrator::{BurstOrchestrator, RunOptions};
use bd_store::SqliteStore;
use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

// ── Helpers ──────────────────────────────────────────────────────────

/// Deterministic counts with a burst in the middle third.
fn series(n: usize, seed: u64) -> Vec<f64> {
    (0..n)
        .map(|t| {
            let base = ((t as u64 * 7 + seed * 13) % 11) as f64;
            if (n / 3..2 * n / 3).contains(&t) {
                base * 4.0 + 20.0
            } else {
                base
            }
        })
        .collect()
}

fn totals(n: usize) -> Vec<f64> {
    (0..n).map(|t| 1_000.0 + (t % 17) as f64 * 10.0).collect()
}

fn matrix(entities: usize, periods: usize) -> TimeSeriesMatrix {
    let start = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
    let dates = (0..periods)
        .map(|i| start + chrono::Months::new(3 * i as u32))
        .collect();
    let rows = (0..entities)
        .map(|i| MatrixRow {
            key: EntityKey::new(
                format!("term {i}"),
                format!("domain {}", i % 4),
                format!("field {}", i % 26),
                "subfield",
            ),
            counts: series(periods, i as u64),
        })
        .collect();
    TimeSeriesMatrix::new(dates, rows).unwrap()
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_kleinberg(c: &mut Criterion) {
    let mut group = c.benchmark_group("kleinberg_detect");
    for &n in &[40usize, 100, 400] {
        let r = series(n, 1);
        let d = totals(n);
        for window in [1usize, 5] {
            let detector = KleinbergDetector::new(KleinbergParams {
                smoothing_window: window,
                ..KleinbergParams::default()
            });
            group.bench_with_input(
                BenchmarkId::new(format!("window_{window}"), n),
                &n,
                |b, _| b.iter(|| detector.detect(black_box(&r), black_box(&d))),
            );
        }
    }
    group.finish();
}

fn bench_macd(c: &mut Criterion) {
    let detector = MacdDetector::new(MacdParams::default());
    let mut group = c.benchmark_group("macd_detect");
    for &n in &[40usize, 100, 400] {
        let row = series(n, 2);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| detector.detect(black_box(&row)))
        });
    }
    group.finish();
}

fn bench_run_method(c: &mut Criterion) {
    let m = matrix(2_000, 40);
    let orchestrator = BurstOrchestrator::new(DetectConfig::default());
    let opts = RunOptions::default().force_rerun(true);

    let mut store = SqliteStore::open_in_memory().unwrap();
    store.register_entities(&m.keys()).unwrap();
    let index = store.entity_index().unwrap();

    let mut group = c.benchmark_group("run_method");
    group.sample_size(10);
    group.bench_function("macd_2000x40", |b| {
        b.iter(|| orchestrator.run_method(Method::Macd, &m, &index, &mut store, &opts))
    });
    group.finish();
}

criterion_group!(benches, bench_kleinberg, bench_macd, bench_run_method);
criterion_main!(benches);
