//! Criterion benchmarks for `bd-math`.
//!
//! The fit cost runs four times per period in the Viterbi lattice; the EMA
//! runs three times per row in the MACD pass.

use bd_math::{ema, fit_cost, positive_percentile};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_fit_cost(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit_cost");

    for (name, d, r, p) in [
        ("quiet", 10_000.0, 3.0, 0.0004),
        ("burst", 10_000.0, 40.0, 0.0023),
        ("fractional", 812.4, 17.3, 0.02),
        ("penalty", 10.0, 11.0, 0.5),
    ] {
        group.bench_with_input(BenchmarkId::new("fit_cost", name), &(d, r, p), |b, &(d, r, p)| {
            b.iter(|| black_box(fit_cost(black_box(d), black_box(r), black_box(p))));
        });
    }

    group.finish();
}

fn bench_row_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("row");

    for n in [40usize, 120, 480] {
        let row: Vec<f64> = (0..n).map(|i| ((i * 37) % 11) as f64).collect();
        group.bench_with_input(BenchmarkId::new("ema", n), &row, |b, row| {
            b.iter(|| black_box(ema(black_box(row), 16)));
        });
        group.bench_with_input(BenchmarkId::new("positive_percentile", n), &row, |b, row| {
            b.iter(|| black_box(positive_percentile(black_box(row), 99.5)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fit_cost, bench_row_kernels);
criterion_main!(benches);
