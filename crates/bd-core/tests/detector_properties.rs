//! Property-based tests for detector and matrix invariants.

use bd_common::{KleinbergParams, MacdParams};
use bd_core::kleinberg::KleinbergDetector;
use bd_core::macd::MacdDetector;
use bd_core::matrix::parse_matrix;
use proptest::prelude::*;

/// (r, d) pairs with 0 <= r <= d and at least one non-zero total.
fn counts_and_totals() -> impl Strategy<Value = (Vec<f64>, Vec<f64>)> {
    prop::collection::vec((0u32..60, 0u32..60), 2..32)
        .prop_filter("some total must be non-zero", |v| {
            v.iter().any(|&(r, extra)| r + extra > 0)
        })
        .prop_map(|v| {
            let r = v.iter().map(|&(r, _)| f64::from(r)).collect();
            let d = v.iter().map(|&(r, extra)| f64::from(r + extra)).collect();
            (r, d)
        })
}

fn kleinberg_params() -> impl Strategy<Value = KleinbergParams> {
    (1.5f64..8.0, 0.0f64..3.0).prop_map(|(s, gamma)| KleinbergParams {
        s,
        gamma,
        smoothing_window: 1,
    })
}

proptest! {
    #[test]
    fn kleinberg_intervals_are_ordered_burst_runs(
        (r, d) in counts_and_totals(),
        params in kleinberg_params(),
    ) {
        let result = KleinbergDetector::new(params).detect(&r, &d).unwrap();
        let n = r.len();
        prop_assert_eq!(result.states.len(), n);
        prop_assert!(result.states.iter().all(Option::is_some));

        let mut last_end: Option<usize> = None;
        for interval in &result.intervals {
            prop_assert!(interval.begin <= interval.end);
            prop_assert!(interval.end < n);
            if let Some(prev) = last_end {
                // Maximal runs: at least one baseline period in between.
                prop_assert!(interval.begin > prev + 1);
            }
            last_end = Some(interval.end);
            for t in interval.begin..=interval.end {
                prop_assert_eq!(result.states[t], Some(1));
            }
        }
    }

    #[test]
    fn kleinberg_score_is_sum_of_significant_weights(
        (r, d) in counts_and_totals(),
        params in kleinberg_params(),
    ) {
        let result = KleinbergDetector::new(params).detect(&r, &d).unwrap();
        let expected: f64 = result.significant().map(|i| i.weight).sum();
        prop_assert!((result.global_score - expected).abs() <= 1e-9 * expected.abs().max(1.0));
        prop_assert!(result.global_score >= 0.0);
        for t in 0..r.len() {
            prop_assert!(result.contribution(t) >= 0.0);
        }
    }

    #[test]
    fn macd_score_is_sum_of_positive_contributions(
        row in prop::collection::vec(0.0f64..1000.0, 1..48),
    ) {
        let result = MacdDetector::new(MacdParams::default()).detect(&row);
        prop_assert_eq!(result.histogram.len(), row.len());
        prop_assert_eq!(result.contributions.len(), row.len());
        prop_assert!(result.denominator > 0.0);
        prop_assert!(result.global_score >= 0.0);

        let positive: f64 = result.contributions.iter().filter(|&&c| c > 0.0).sum();
        prop_assert!((result.global_score - positive).abs() <= 1e-9 * positive.max(1.0));
    }

    #[test]
    fn macd_intervals_cover_positive_histogram(
        row in prop::collection::vec(0.0f64..100.0, 1..48),
    ) {
        let result = MacdDetector::new(MacdParams::default()).detect(&row);
        let mut covered = vec![false; row.len()];
        let mut last_end: Option<usize> = None;
        for &(begin, end) in &result.intervals {
            prop_assert!(begin <= end);
            if let Some(prev) = last_end {
                prop_assert!(begin > prev + 1);
            }
            last_end = Some(end);
            for flag in &mut covered[begin..=end] {
                *flag = true;
            }
        }
        for (t, &h) in result.histogram.iter().enumerate() {
            prop_assert_eq!(covered[t], h > 0.0);
        }
    }

    #[test]
    fn matrix_period_order_does_not_matter(
        rows in prop::collection::vec(prop::collection::vec(0u32..500, 4), 1..6),
    ) {
        let dates = ["2019-01-01", "2019-04-01", "2019-07-01", "2019-10-01"];
        let render = |order: &[usize]| {
            let mut csv = String::from("n-gram,domain,field,subfield");
            for &i in order {
                csv.push_str(&format!(",{}", dates[i]));
            }
            csv.push('\n');
            for (k, counts) in rows.iter().enumerate() {
                csv.push_str(&format!("term {k},D,F,S"));
                for &i in order {
                    csv.push_str(&format!(",{}", counts[i]));
                }
                csv.push('\n');
            }
            csv
        };

        let sorted = parse_matrix(render(&[0, 1, 2, 3]).as_bytes()).unwrap();
        let shuffled = parse_matrix(render(&[2, 0, 3, 1]).as_bytes()).unwrap();
        prop_assert_eq!(&sorted, &shuffled);
        prop_assert_eq!(sorted.n_periods(), 4);
        prop_assert_eq!(sorted.len(), rows.len());
    }

    #[test]
    fn matrix_parser_never_panics(input in ".{0,400}") {
        let _ = parse_matrix(input.as_bytes());
    }
}
