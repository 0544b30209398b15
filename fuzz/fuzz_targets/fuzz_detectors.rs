//! Fuzz target for both detectors on arbitrary series.
//!
//! Counts, totals, and parameters are unconstrained: negative, NaN, and
//! infinite values included. Detection may decline (`None`) but must not
//! panic, and every produced point must line up with the input.

#![no_main]

use arbitrary::Arbitrary;
use bd_common::{DenominatorMode, KleinbergParams, MacdParams};
use bd_core::kleinberg::KleinbergDetector;
use bd_core::macd::MacdDetector;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    series: Vec<(f64, f64)>,
    s: f64,
    gamma: f64,
    smoothing_window: u8,
    spans: (u8, u8, u8),
    sqrt_max: bool,
    percentile: f64,
}

fuzz_target!(|input: Input| {
    let r: Vec<f64> = input.series.iter().map(|&(r, _)| r).collect();
    let d: Vec<f64> = input.series.iter().map(|&(_, d)| d).collect();

    let kleinberg = KleinbergDetector::new(KleinbergParams {
        s: input.s,
        gamma: input.gamma,
        smoothing_window: usize::from(input.smoothing_window),
    });
    if let Some(result) = kleinberg.detect(&r, &d) {
        assert_eq!(result.states.len(), r.len());
        assert_eq!(result.period_weights.len(), r.len());
    }

    let macd = MacdDetector::new(MacdParams {
        short_span: usize::from(input.spans.0.max(1)),
        long_span: usize::from(input.spans.1.max(1)),
        signal_span: usize::from(input.spans.2.max(1)),
        denominator_mode: if input.sqrt_max {
            DenominatorMode::SqrtMax
        } else {
            DenominatorMode::SqrtPercentile
        },
        denominator_percentile: input.percentile,
    });
    let result = macd.detect(&r);
    assert_eq!(result.histogram.len(), r.len());
    assert!(result.denominator > 0.0);
});
