//! Kleinberg two-state burst detection.
//!
//! Each entity's counts `r` are modelled against the shared per-period
//! totals `d` as draws from a binomial with a baseline rate `p0` or a burst
//! rate `p1 = min(s * p0, 0.99999)`. A Viterbi pass over the period axis
//! picks the cheapest state sequence, where entering the burst state costs
//! `gamma * ln(n)`. Runs of the burst state become intervals, weighted by how
//! much better the burst rate explains them than the baseline.

use bd_common::{
    DateInterval, DetectionSummary, EntityId, KleinbergParams, KleinbergPoint, Method,
    MethodParams, PointDetail, PointRecord,
};
use bd_math::fit_cost;
use chrono::NaiveDate;

/// Upper bound on the burst-state rate.
pub const MAX_BURST_RATE: f64 = 0.99999;

/// Floor on totals when smoothing the rate series.
const SMOOTHING_FLOOR: f64 = 1e-10;

const BASELINE: u8 = 0;
const BURST: u8 = 1;

/// A maximal run of the burst state, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurstInterval {
    pub begin: usize,
    pub end: usize,
    pub weight: f64,
}

impl BurstInterval {
    pub fn duration(&self) -> usize {
        self.end - self.begin + 1
    }

    /// Intervals shorter than two periods, or not better explained by the
    /// burst rate, never contribute.
    pub fn is_significant(&self) -> bool {
        self.duration() >= 2 && self.weight > 0.0
    }
}

/// Output of one detection.
#[derive(Debug, Clone, PartialEq)]
pub struct KleinbergResult {
    /// Viterbi state per period; `None` outside the valid range.
    pub states: Vec<Option<u8>>,
    pub p0: f64,
    pub p1: f64,
    /// Every burst-state run, chronological.
    pub intervals: Vec<BurstInterval>,
    pub global_score: f64,
    /// Per-period weight inside significant intervals, 0 elsewhere.
    pub period_weights: Vec<f64>,
}

impl KleinbergResult {
    pub fn significant(&self) -> impl Iterator<Item = &BurstInterval> {
        self.intervals.iter().filter(|i| i.is_significant())
    }

    /// Floored per-period contribution.
    pub fn contribution(&self, t: usize) -> f64 {
        self.period_weights[t].max(0.0)
    }

    pub fn summary(
        &self,
        entity_id: EntityId,
        dates: &[NaiveDate],
        params: KleinbergParams,
    ) -> DetectionSummary {
        let intervals: Vec<DateInterval> = self
            .significant()
            .map(|i| [dates[i.begin], dates[i.end]])
            .collect();
        DetectionSummary {
            entity_id,
            method: Method::Kleinberg,
            global_score: self.global_score,
            rank: None,
            num_bursts: intervals.len() as u32,
            intervals,
            params: MethodParams::Kleinberg(params),
        }
    }

    /// One point per period. `r` and `d` are the raw inputs.
    pub fn points(
        &self,
        entity_id: EntityId,
        dates: &[NaiveDate],
        r: &[f64],
        d: &[f64],
    ) -> Vec<PointRecord> {
        dates
            .iter()
            .enumerate()
            .map(|(t, &date)| PointRecord {
                entity_id,
                method: Method::Kleinberg,
                period_index: t as u32,
                date,
                contribution: self.contribution(t),
                raw_value: r[t],
                baseline_value: d[t],
                detail: PointDetail::Kleinberg(KleinbergPoint {
                    state: self.states[t],
                    state_probability: self.p1,
                    weight_contribution: self.period_weights[t],
                }),
            })
            .collect()
    }
}

/// Two-state detector with fixed parameters.
#[derive(Debug, Clone, Copy)]
pub struct KleinbergDetector {
    params: KleinbergParams,
}

impl KleinbergDetector {
    pub fn new(params: KleinbergParams) -> Self {
        KleinbergDetector { params }
    }

    pub fn params(&self) -> KleinbergParams {
        self.params
    }

    /// First valid period of the smoothed series.
    fn offset(&self) -> usize {
        (self.params.smoothing_window.max(1) - 1) / 2
    }

    /// Series the Viterbi pass runs on, restricted to the valid range.
    /// Returns `(offset, series)`; `None` when no full window fits.
    fn smoothed(&self, r: &[f64], d: &[f64]) -> Option<(usize, Vec<f64>)> {
        let w = self.params.smoothing_window.max(1);
        let n = r.len();
        if n < w {
            return None;
        }
        if w == 1 {
            return Some((0, r.to_vec()));
        }
        let rates: Vec<f64> = r
            .iter()
            .zip(d)
            .map(|(&r, &d)| r / d.max(SMOOTHING_FLOOR))
            .collect();
        let offset = self.offset();
        let series = rates
            .windows(w)
            .enumerate()
            .map(|(k, window)| {
                let mean = window.iter().sum::<f64>() / w as f64;
                mean * d[k + offset]
            })
            .collect();
        Some((offset, series))
    }

    /// Run detection. `None` when the model cannot be fit: no valid periods,
    /// or zero or non-finite totals over the valid range.
    pub fn detect(&self, r: &[f64], d: &[f64]) -> Option<KleinbergResult> {
        debug_assert_eq!(r.len(), d.len());
        let n = r.len();
        let (offset, series) = self.smoothed(r, d)?;
        let valid_d = &d[offset..offset + series.len()];

        let total_events: f64 = valid_d.iter().sum();
        let total_target: f64 = series.iter().sum();
        if total_events == 0.0 || !total_events.is_finite() {
            return None;
        }
        let p0 = total_target / total_events;
        if !p0.is_finite() {
            return None;
        }
        let p1 = (p0 * self.params.s).min(MAX_BURST_RATE);

        let path = viterbi(&series, valid_d, p0, p1, self.params.gamma);

        let mut states = vec![None; n];
        for (k, &state) in path.iter().enumerate() {
            states[offset + k] = Some(state);
        }

        let mut intervals = burst_runs(&path, offset);
        let mut period_weights = vec![0.0; n];
        let mut global_score = 0.0;
        for interval in &mut intervals {
            interval.weight = (interval.begin..=interval.end)
                .map(|t| period_weight(d[t], r[t], p0, p1))
                .sum();
            if interval.is_significant() {
                global_score += interval.weight;
                for t in interval.begin..=interval.end {
                    period_weights[t] = period_weight(d[t], r[t], p0, p1);
                }
            }
        }

        Some(KleinbergResult {
            states,
            p0,
            p1,
            intervals,
            global_score,
            period_weights,
        })
    }
}

/// How much better the burst rate explains period `t` than the baseline.
fn period_weight(d: f64, r: f64, p0: f64, p1: f64) -> f64 {
    fit_cost(d, r, p0) - fit_cost(d, r, p1)
}

/// Cheapest state path over `r`/`d` (already restricted to valid periods).
///
/// Costs are minimized; equal predecessor costs prefer the baseline state,
/// and so does a tie at the final period.
fn viterbi(r: &[f64], d: &[f64], p0: f64, p1: f64, gamma: f64) -> Vec<u8> {
    let len = r.len();
    if len == 0 {
        return Vec::new();
    }
    let enter_burst = gamma * (len as f64).ln();

    let mut cost = vec![[0.0f64; 2]; len];
    let mut back = vec![[BASELINE; 2]; len];

    cost[0] = [fit_cost(d[0], r[0], p0), fit_cost(d[0], r[0], p1)];
    for t in 1..len {
        let [prev0, prev1] = cost[t - 1];
        let fit0 = fit_cost(d[t], r[t], p0);
        let fit1 = fit_cost(d[t], r[t], p1);

        // Leaving the burst state is free.
        let (from0, from1) = (prev0 + fit0, prev1 + fit0);
        if from0 <= from1 {
            cost[t][0] = from0;
            back[t][0] = BASELINE;
        } else {
            cost[t][0] = from1;
            back[t][0] = BURST;
        }

        let (from0, from1) = (prev0 + enter_burst + fit1, prev1 + fit1);
        if from0 <= from1 {
            cost[t][1] = from0;
            back[t][1] = BASELINE;
        } else {
            cost[t][1] = from1;
            back[t][1] = BURST;
        }
    }

    let mut path = vec![BASELINE; len];
    let [last0, last1] = cost[len - 1];
    path[len - 1] = if last1 < last0 { BURST } else { BASELINE };
    for t in (1..len).rev() {
        path[t - 1] = back[t][path[t] as usize];
    }
    path
}

/// Maximal runs of the burst state, including runs touching either end.
fn burst_runs(path: &[u8], offset: usize) -> Vec<BurstInterval> {
    let mut runs = Vec::new();
    let mut start = None;
    for (k, &state) in path.iter().enumerate() {
        match (state == BURST, start) {
            (true, None) => start = Some(k),
            (false, Some(b)) => {
                runs.push(BurstInterval {
                    begin: offset + b,
                    end: offset + k - 1,
                    weight: 0.0,
                });
                start = None;
            }
            _ => {}
        }
    }
    if let Some(b) = start {
        runs.push(BurstInterval {
            begin: offset + b,
            end: offset + path.len() - 1,
            weight: 0.0,
        });
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> KleinbergDetector {
        KleinbergDetector::new(KleinbergParams::default())
    }

    #[test]
    fn test_step_burst_detected() {
        let r = [0.0, 0.0, 0.0, 10.0, 10.0, 10.0, 0.0, 0.0, 0.0];
        let d = [10.0; 9];
        let result = detector().detect(&r, &d).unwrap();

        let significant: Vec<_> = result.significant().collect();
        assert_eq!(significant.len(), 1);
        assert_eq!((significant[0].begin, significant[0].end), (3, 5));
        assert!(significant[0].weight > 0.0);
        assert!((result.global_score - significant[0].weight).abs() < 1e-9);

        for t in 0..9 {
            let inside = (3..=5).contains(&t);
            assert_eq!(result.states[t], Some(u8::from(inside)));
            assert_eq!(result.contribution(t) > 0.0, inside);
        }
        assert!((result.p0 - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(result.p1, MAX_BURST_RATE);
    }

    #[test]
    fn test_zero_totals_yield_none() {
        assert!(detector().detect(&[0.0, 0.0], &[0.0, 0.0]).is_none());
    }

    #[test]
    fn test_short_series_with_wide_window_yields_none() {
        let params = KleinbergParams {
            smoothing_window: 5,
            ..KleinbergParams::default()
        };
        let det = KleinbergDetector::new(params);
        assert!(det.detect(&[1.0; 4], &[10.0; 4]).is_none());
    }

    #[test]
    fn test_smoothing_marks_edges_unknown() {
        let params = KleinbergParams {
            smoothing_window: 3,
            ..KleinbergParams::default()
        };
        let det = KleinbergDetector::new(params);
        let r = [0.0, 0.0, 8.0, 9.0, 8.0, 0.0, 0.0];
        let d = [10.0; 7];
        let result = det.detect(&r, &d).unwrap();

        assert_eq!(result.states[0], None);
        assert_eq!(result.states[6], None);
        assert!(result.states[1..6].iter().all(Option::is_some));
        assert_eq!(result.contribution(0), 0.0);
        assert_eq!(result.contribution(6), 0.0);

        let points = result.points(EntityId(1), &dates(7), &r, &d);
        assert_eq!(points.len(), 7);
        assert_eq!(points[0].raw_value, 0.0);
        assert_eq!(points[0].kleinberg().unwrap().state, None);
    }

    #[test]
    fn test_single_period_run_not_significant() {
        let interval = BurstInterval {
            begin: 4,
            end: 4,
            weight: 100.0,
        };
        assert!(!interval.is_significant());
        let interval = BurstInterval {
            begin: 4,
            end: 5,
            weight: -0.1,
        };
        assert!(!interval.is_significant());
    }

    #[test]
    fn test_burst_runs_cover_edges() {
        let runs = burst_runs(&[1, 1, 0, 1, 0, 1], 2);
        let spans: Vec<(usize, usize)> = runs.iter().map(|r| (r.begin, r.end)).collect();
        assert_eq!(spans, vec![(2, 3), (5, 5), (7, 7)]);
    }

    #[test]
    fn test_viterbi_ties_prefer_baseline() {
        // p0 == p1 makes every emission cost equal; with gamma = 0 every
        // transition is free too, so only tie-breaking decides.
        let path = viterbi(&[1.0, 1.0, 1.0], &[2.0, 2.0, 2.0], 0.5, 0.5, 0.0);
        assert_eq!(path, vec![BASELINE; 3]);
    }

    #[test]
    fn test_flat_series_has_no_bursts() {
        let r = [5.0; 12];
        let d = [50.0; 12];
        let result = detector().detect(&r, &d).unwrap();
        assert_eq!(result.global_score, 0.0);
        assert_eq!(result.significant().count(), 0);
        assert!(result.period_weights.iter().all(|&w| w == 0.0));
    }

    #[test]
    fn test_summary_uses_significant_intervals_chronologically() {
        let r = [0.0, 10.0, 10.0, 0.0, 0.0, 0.0, 10.0, 10.0, 10.0, 0.0, 0.0, 0.0];
        let d = [10.0; 12];
        let result = detector().detect(&r, &d).unwrap();
        let dates = dates(12);
        let summary = result.summary(EntityId(3), &dates, KleinbergParams::default());
        assert_eq!(summary.num_bursts, 2);
        assert_eq!(summary.intervals[0], [dates[1], dates[2]]);
        assert_eq!(summary.intervals[1], [dates[6], dates[8]]);
        assert!(summary.intervals.windows(2).all(|w| w[0][0] < w[1][0]));
        assert_eq!(summary.rank, None);
    }

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        (0..n)
            .map(|i| start + chrono::Days::new(91 * i as u64))
            .collect()
    }
}
