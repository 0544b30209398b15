//! Percentiles with linear interpolation between closest ranks.

/// The `q`-th percentile (0..=100) of `samples`.
///
/// Uses the linear method: position `(n - 1) * q / 100` interpolated between
/// neighbours of the sorted sample. NaN samples are ignored. Returns NaN when
/// no finite sample remains or `q` is outside `[0, 100]`.
pub fn percentile(samples: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = samples.iter().copied().filter(|x| !x.is_nan()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(&sorted, q)
}

/// Percentile of the strictly positive values in `samples`.
///
/// NaN when the row has no positive value.
pub fn positive_percentile(samples: &[f64], q: f64) -> f64 {
    let mut positive: Vec<f64> = samples.iter().copied().filter(|&x| x > 0.0).collect();
    positive.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(&positive, q)
}

fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() || !(0.0..=100.0).contains(&q) {
        return f64::NAN;
    }
    let pos = (sorted.len() - 1) as f64 * q / 100.0;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn median_of_odd_and_even() {
        assert_eq!(percentile(&[3.0, 1.0, 2.0], 50.0), 2.0);
        assert!(approx_eq(percentile(&[1.0, 2.0, 3.0, 4.0], 50.0), 2.5, 1e-12));
    }

    #[test]
    fn extremes_are_min_and_max() {
        let xs = [5.0, -1.0, 9.0, 2.0];
        assert_eq!(percentile(&xs, 0.0), -1.0);
        assert_eq!(percentile(&xs, 100.0), 9.0);
    }

    #[test]
    fn linear_interpolation_high_percentile() {
        // positions 0..=10 over 0..=10, 99.5th -> 9.95
        let xs: Vec<f64> = (0..=10).map(f64::from).collect();
        assert!(approx_eq(percentile(&xs, 99.5), 9.95, 1e-12));
    }

    #[test]
    fn empty_or_out_of_range_is_nan() {
        assert!(percentile(&[], 50.0).is_nan());
        assert!(percentile(&[1.0], 101.0).is_nan());
        assert!(percentile(&[f64::NAN], 50.0).is_nan());
    }

    #[test]
    fn positive_percentile_ignores_zeros() {
        let xs = [0.0, 0.0, 0.0, 4.0, 8.0];
        assert!(approx_eq(positive_percentile(&xs, 50.0), 6.0, 1e-12));
        assert!(positive_percentile(&[0.0, -2.0], 99.5).is_nan());
    }
}
