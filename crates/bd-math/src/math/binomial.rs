//! Binomial likelihood and the Kleinberg fit cost.
//!
//! A period with `d` total events of which `r` belong to the tracked entity is
//! scored against an emission probability `p` under
//!
//! - `r | d, p ~ Binomial(d, p)`
//! - `cost(d, r, p) = -log P(r | d, p)`
//!
//! The cost feeds a dynamic program, so it must never be infinite or NaN. Any
//! degenerate input collapses to [`FIT_PENALTY`].

use super::stable::log_binom_coef;

/// Finite cost charged for impossible or non-finite likelihoods.
pub const FIT_PENALTY: f64 = 1e6;

/// Log probability mass of `r` successes in `d` trials with success rate `p`.
///
/// Supports fractional `r` and `d` (smoothed counts). Returns NaN for inputs
/// outside the model's domain.
pub fn binomial_log_pmf(d: f64, r: f64, p: f64) -> f64 {
    if d.is_nan() || r.is_nan() || p.is_nan() {
        return f64::NAN;
    }
    if d < 0.0 || r < 0.0 || r > d || !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    let log_binom = log_binom_coef(d, r);
    // 0 * ln(0) terms vanish
    let success = if r == 0.0 { 0.0 } else { r * p.ln() };
    let failure = if d - r == 0.0 { 0.0 } else { (d - r) * (1.0 - p).ln() };
    log_binom + success + failure
}

/// Negative binomial log-likelihood of one period, floored to a finite penalty.
///
/// Returns [`FIT_PENALTY`] when `r > d`, `p <= 0`, `p >= 1`, `d <= 0`, or the
/// likelihood is not finite.
pub fn fit_cost(d: f64, r: f64, p: f64) -> f64 {
    if r > d || p <= 0.0 || p >= 1.0 || d <= 0.0 {
        return FIT_PENALTY;
    }
    let cost = -binomial_log_pmf(d, r, p);
    if cost.is_finite() {
        cost
    } else {
        FIT_PENALTY
    }
}
