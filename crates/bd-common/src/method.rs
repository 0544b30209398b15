//! Detection methods and their parameters.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A burst detection method. Each method owns a disjoint partition of the
/// result store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Two-state Viterbi burst model
    Kleinberg,
    /// EMA crossover signal
    Macd,
}

impl Method {
    pub const ALL: [Method; 2] = [Method::Kleinberg, Method::Macd];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Kleinberg => "kleinberg",
            Method::Macd => "macd",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kleinberg" => Ok(Method::Kleinberg),
            "macd" => Ok(Method::Macd),
            other => Err(format!("unknown method '{other}'")),
        }
    }
}

/// Kleinberg two-state model parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KleinbergParams {
    /// Burst-state rate multiplier (s > 1).
    pub s: f64,
    /// Cost of entering the burst state (gamma >= 0).
    pub gamma: f64,
    /// Centered moving-average window over r/d; 1 disables smoothing.
    pub smoothing_window: usize,
}

impl Default for KleinbergParams {
    fn default() -> Self {
        KleinbergParams {
            s: 5.7,
            gamma: 1.0,
            smoothing_window: 1,
        }
    }
}

/// How the MACD histogram is normalized per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenominatorMode {
    /// sqrt of a percentile of the row's positive values
    #[default]
    SqrtPercentile,
    /// sqrt of the row maximum
    SqrtMax,
}

impl fmt::Display for DenominatorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenominatorMode::SqrtPercentile => write!(f, "sqrt_percentile"),
            DenominatorMode::SqrtMax => write!(f, "sqrt_max"),
        }
    }
}

/// MACD parameters. Spans are in periods (quarters by default).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacdParams {
    pub short_span: usize,
    pub long_span: usize,
    pub signal_span: usize,
    pub denominator_mode: DenominatorMode,
    /// Only read in `sqrt_percentile` mode.
    pub denominator_percentile: f64,
}

impl Default for MacdParams {
    fn default() -> Self {
        MacdParams {
            short_span: 6,
            long_span: 16,
            signal_span: 7,
            denominator_mode: DenominatorMode::SqrtPercentile,
            denominator_percentile: 99.5,
        }
    }
}

/// Parameters recorded on each summary row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum MethodParams {
    Kleinberg(KleinbergParams),
    Macd(MacdParams),
}

impl MethodParams {
    pub fn method(&self) -> Method {
        match self {
            MethodParams::Kleinberg(_) => Method::Kleinberg,
            MethodParams::Macd(_) => Method::Macd,
        }
    }
}
