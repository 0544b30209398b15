//! Core math modules.

pub mod binomial;
pub mod ema;
pub mod quantile;
pub mod stable;
