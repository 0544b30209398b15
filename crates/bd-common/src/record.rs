//! Output record shapes.
//!
//! Every processed (entity, method) pair produces exactly one
//! [`DetectionSummary`] and exactly one [`PointRecord`] per period of the
//! axis, whether or not any burst was found.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::id::{EntityId, EntityKey};
use crate::method::{Method, MethodParams};

/// Inclusive `[start_date, end_date]` pair of a burst interval.
pub type DateInterval = [NaiveDate; 2];

/// Per-(entity, method) detection summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub entity_id: EntityId,
    pub method: Method,
    pub global_score: f64,
    /// Dense rank among positive scores; `None` until the ranking pass, and
    /// forever for non-positive scores.
    pub rank: Option<u32>,
    pub num_bursts: u32,
    /// Burst intervals in chronological order.
    pub intervals: Vec<DateInterval>,
    pub params: MethodParams,
}

/// Kleinberg-only point fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KleinbergPoint {
    /// Viterbi state (0 baseline, 1 burst); `None` outside the valid range.
    pub state: Option<u8>,
    /// Emission probability of the burst state (p1), same for every period.
    pub state_probability: f64,
    /// Unfloored per-period weight inside significant intervals, else 0.
    pub weight_contribution: f64,
}

/// MACD-only point fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdPoint {
    pub short_ema: f64,
    pub long_ema: f64,
    pub macd_line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Method-specific columns of a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointDetail {
    Kleinberg(KleinbergPoint),
    Macd(MacdPoint),
}

/// One period of one entity's full timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub entity_id: EntityId,
    pub method: Method,
    pub period_index: u32,
    pub date: NaiveDate,
    pub contribution: f64,
    pub raw_value: f64,
    pub baseline_value: f64,
    #[serde(flatten)]
    pub detail: PointDetail,
}

impl PointRecord {
    pub fn kleinberg(&self) -> Option<&KleinbergPoint> {
        match &self.detail {
            PointDetail::Kleinberg(k) => Some(k),
            PointDetail::Macd(_) => None,
        }
    }

    pub fn macd(&self) -> Option<&MacdPoint> {
        match &self.detail {
            PointDetail::Macd(m) => Some(m),
            PointDetail::Kleinberg(_) => None,
        }
    }
}

/// A summary joined with its entity key, as listed on a leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    #[serde(flatten)]
    pub key: EntityKey,
    #[serde(flatten)]
    pub summary: DetectionSummary,
}
