//! Causal exponential moving average.
//!
//! Recurrence form with no bias adjustment:
//!
//! ```text
//! ema[0] = x[0]
//! ema[t] = alpha * x[t] + (1 - alpha) * ema[t - 1]
//! ```

/// Smoothing factor for a span: `2 / (span + 1)`.
pub fn ema_alpha(span: usize) -> f64 {
    2.0 / (span as f64 + 1.0)
}

/// EMA of `values` with the given span. NaN inputs are read as 0.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    ema_into(values, span, &mut out);
    out
}

/// EMA written into a caller-owned buffer, reusing its allocation.
///
/// `out` is resized to `values.len()`.
pub fn ema_into(values: &[f64], span: usize, out: &mut Vec<f64>) {
    out.clear();
    if values.is_empty() {
        return;
    }
    let alpha = ema_alpha(span);
    let keep = 1.0 - alpha;
    let mut prev = finite_or_zero(values[0]);
    out.push(prev);
    for &x in &values[1..] {
        prev = alpha * finite_or_zero(x) + keep * prev;
        out.push(prev);
    }
}

#[inline]
fn finite_or_zero(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn alpha_from_span() {
        assert!(approx_eq(ema_alpha(1), 1.0, 1e-15));
        assert!(approx_eq(ema_alpha(3), 0.5, 1e-15));
        assert!(approx_eq(ema_alpha(6), 2.0 / 7.0, 1e-15));
    }

    #[test]
    fn first_value_seeds_the_average() {
        let out = ema(&[4.0, 0.0, 0.0], 3);
        assert_eq!(out[0], 4.0);
        assert!(approx_eq(out[1], 2.0, 1e-12));
        assert!(approx_eq(out[2], 1.0, 1e-12));
    }

    #[test]
    fn span_one_tracks_input() {
        let xs = [1.0, 5.0, 2.0, 9.0];
        assert_eq!(ema(&xs, 1), xs.to_vec());
    }

    #[test]
    fn constant_series_is_fixed_point() {
        let out = ema(&[7.0; 20], 16);
        assert!(out.iter().all(|&v| approx_eq(v, 7.0, 1e-12)));
    }

    #[test]
    fn nan_reads_as_zero() {
        let out = ema(&[f64::NAN, 2.0], 3);
        assert_eq!(out[0], 0.0);
        assert!(approx_eq(out[1], 1.0, 1e-12));
    }

    #[test]
    fn empty_input() {
        assert!(ema(&[], 5).is_empty());
    }

    #[test]
    fn ema_into_reuses_buffer() {
        let mut buf = vec![99.0; 10];
        ema_into(&[1.0, 1.0], 4, &mut buf);
        assert_eq!(buf, vec![1.0, 1.0]);
    }
}
