//! Burst detection math utilities.

pub mod math;

pub use math::binomial::{binomial_log_pmf, fit_cost, FIT_PENALTY};
pub use math::ema::{ema, ema_alpha, ema_into};
pub use math::quantile::{percentile, positive_percentile};
pub use math::stable::{log_binom_coef, log_gamma};
