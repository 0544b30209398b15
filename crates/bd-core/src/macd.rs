//! MACD-style burst detection.
//!
//! Short and long causal EMAs of each entity's counts give a momentum line;
//! its own EMA is the signal and their difference the histogram. The
//! histogram is normalized per entity by the square root of a robust scale of
//! the entity's positive counts, so large and small entities score
//! comparably. Positive-histogram runs are the bursts.

use bd_common::{
    DateInterval, DenominatorMode, DetectionSummary, EntityId, MacdParams, MacdPoint, Method,
    MethodParams, PointDetail, PointRecord,
};
use bd_math::{ema, positive_percentile};
use chrono::NaiveDate;

/// Floor applied to the scale before the square root.
pub const DENOMINATOR_EPS: f64 = 1e-12;

/// Full per-period MACD output for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MacdResult {
    /// Input with missing cells read as 0.
    pub values: Vec<f64>,
    pub short_ema: Vec<f64>,
    pub long_ema: Vec<f64>,
    pub macd_line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
    /// `histogram / denominator`, signed.
    pub contributions: Vec<f64>,
    pub denominator: f64,
    pub global_score: f64,
    /// Maximal runs with positive histogram, inclusive.
    pub intervals: Vec<(usize, usize)>,
}

impl MacdResult {
    pub fn summary(
        &self,
        entity_id: EntityId,
        dates: &[NaiveDate],
        params: MacdParams,
    ) -> DetectionSummary {
        let intervals: Vec<DateInterval> = self
            .intervals
            .iter()
            .map(|&(b, e)| [dates[b], dates[e]])
            .collect();
        DetectionSummary {
            entity_id,
            method: Method::Macd,
            global_score: self.global_score,
            rank: None,
            num_bursts: intervals.len() as u32,
            intervals,
            params: MethodParams::Macd(params),
        }
    }

    pub fn points(&self, entity_id: EntityId, dates: &[NaiveDate]) -> Vec<PointRecord> {
        dates
            .iter()
            .enumerate()
            .map(|(t, &date)| PointRecord {
                entity_id,
                method: Method::Macd,
                period_index: t as u32,
                date,
                contribution: self.contributions[t],
                raw_value: self.values[t],
                baseline_value: self.long_ema[t],
                detail: PointDetail::Macd(MacdPoint {
                    short_ema: self.short_ema[t],
                    long_ema: self.long_ema[t],
                    macd_line: self.macd_line[t],
                    signal: self.signal[t],
                    histogram: self.histogram[t],
                }),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MacdDetector {
    params: MacdParams,
}

impl MacdDetector {
    pub fn new(params: MacdParams) -> Self {
        MacdDetector { params }
    }

    pub fn params(&self) -> MacdParams {
        self.params
    }

    /// Normalizing scale of one row, already square-rooted.
    pub fn denominator(&self, values: &[f64]) -> f64 {
        let row_max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let base = match self.params.denominator_mode {
            DenominatorMode::SqrtPercentile => {
                let pct = positive_percentile(values, self.params.denominator_percentile);
                if pct.is_finite() && pct > 0.0 {
                    pct
                } else {
                    row_max
                }
            }
            DenominatorMode::SqrtMax => row_max,
        };
        let base = if base.is_finite() && base > 0.0 {
            base
        } else {
            DENOMINATOR_EPS
        };
        base.sqrt()
    }

    /// Score one row. Every row produces a full result; an all-zero row
    /// scores 0 with no intervals.
    pub fn detect(&self, row: &[f64]) -> MacdResult {
        let values: Vec<f64> = row
            .iter()
            .map(|&v| if v.is_nan() { 0.0 } else { v })
            .collect();

        let short_ema = ema(&values, self.params.short_span);
        let long_ema = ema(&values, self.params.long_span);
        let macd_line: Vec<f64> = short_ema.iter().zip(&long_ema).map(|(s, l)| s - l).collect();
        let signal = ema(&macd_line, self.params.signal_span);
        let histogram: Vec<f64> = macd_line.iter().zip(&signal).map(|(m, s)| m - s).collect();

        let denominator = self.denominator(&values);
        let contributions: Vec<f64> = histogram.iter().map(|h| h / denominator).collect();

        let global_score = histogram
            .iter()
            .zip(&contributions)
            .filter(|(h, _)| **h > 0.0)
            .map(|(_, c)| c)
            .sum();

        MacdResult {
            intervals: positive_runs(&histogram),
            values,
            short_ema,
            long_ema,
            macd_line,
            signal,
            histogram,
            contributions,
            denominator,
            global_score,
        }
    }

    /// Score a block of rows.
    pub fn detect_rows<'a, I>(&self, rows: I) -> Vec<MacdResult>
    where
        I: IntoIterator<Item = &'a [f64]>,
    {
        rows.into_iter().map(|row| self.detect(row)).collect()
    }
}

fn positive_runs(histogram: &[f64]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (t, &h) in histogram.iter().enumerate() {
        match (h > 0.0, start) {
            (true, None) => start = Some(t),
            (false, Some(b)) => {
                runs.push((b, t - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(b) = start {
        runs.push((b, histogram.len() - 1));
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> MacdDetector {
        MacdDetector::new(MacdParams::default())
    }

    #[test]
    fn test_all_zero_row() {
        let result = detector().detect(&[0.0; 10]);
        assert_eq!(result.global_score, 0.0);
        assert!(result.intervals.is_empty());
        assert!(result.histogram.iter().all(|&h| h == 0.0));
        assert!(result.contributions.iter().all(|&c| c == 0.0));
        assert_eq!(result.denominator, DENOMINATOR_EPS.sqrt());
    }

    #[test]
    fn test_step_row() {
        let mut row = vec![0.0; 12];
        for v in row.iter_mut().skip(4) {
            *v = 10.0;
        }
        let result = detector().detect(&row);

        // Nothing moves before the step.
        assert!(result.histogram[..4].iter().all(|&h| h == 0.0));
        // The step turns the histogram positive at once.
        assert!(result.histogram[4] > 0.0);
        assert_eq!(result.intervals.first().map(|r| r.0), Some(4));
        // Denominator is sqrt of the positive-value percentile.
        assert!((result.denominator - 10.0f64.sqrt()).abs() < 1e-12);

        let positive: f64 = result
            .histogram
            .iter()
            .filter(|&&h| h > 0.0)
            .map(|h| h / result.denominator)
            .sum();
        assert!((result.global_score - positive).abs() < 1e-12);
        assert!(result.global_score > 0.0);
    }

    #[test]
    fn test_sustained_tripling_bursts_until_emas_reconverge() {
        // Baseline 5 for ten periods, then 15 for longer than long_span.
        let mut row = vec![5.0; 10];
        row.extend(std::iter::repeat(15.0).take(40));
        let result = detector().detect(&row);

        assert_eq!(result.intervals, vec![(10, 17)]);
        // The burst ends well before the series does; afterwards the
        // signal line has caught up and the histogram stays non-positive.
        assert!(result.histogram[18..].iter().all(|&h| h <= 0.0));

        let (begin, end) = result.intervals[0];
        let inside: f64 = result.contributions[begin..=end].iter().sum();
        assert!((inside - result.global_score).abs() < 1e-12);
        assert!(result.global_score > 0.0);
    }

    #[test]
    fn test_nan_reads_as_zero() {
        let a = detector().detect(&[f64::NAN, 3.0, f64::NAN, 5.0]);
        let b = detector().detect(&[0.0, 3.0, 0.0, 5.0]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_percentile_falls_back_to_max() {
        let det = MacdDetector::new(MacdParams {
            denominator_mode: DenominatorMode::SqrtPercentile,
            ..MacdParams::default()
        });
        // No positive values: percentile is undefined, max is 0, so eps.
        assert_eq!(det.denominator(&[0.0, -1.0]), DENOMINATOR_EPS.sqrt());

        let det = MacdDetector::new(MacdParams {
            denominator_mode: DenominatorMode::SqrtMax,
            ..MacdParams::default()
        });
        assert_eq!(det.denominator(&[1.0, 16.0, 4.0]), 4.0);
    }

    #[test]
    fn test_negative_contributions_kept() {
        let row = [0.0, 20.0, 20.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let result = detector().detect(&row);
        assert!(result.contributions.iter().any(|&c| c < 0.0));
        assert!(result.global_score > 0.0);
    }

    #[test]
    fn test_positive_runs() {
        let runs = positive_runs(&[0.1, 0.2, -0.1, 0.0, 0.3, -0.2, 0.5]);
        assert_eq!(runs, vec![(0, 1), (4, 4), (6, 6)]);
    }

    #[test]
    fn test_points_full_timeline() {
        let dates: Vec<NaiveDate> = (1..=4)
            .map(|m| NaiveDate::from_ymd_opt(2020, m, 1).unwrap())
            .collect();
        let result = detector().detect(&[1.0, 2.0, 0.0, 4.0]);
        let points = result.points(EntityId(9), &dates);
        assert_eq!(points.len(), 4);
        assert_eq!(points[3].baseline_value, result.long_ema[3]);
        assert_eq!(points[3].macd().unwrap().histogram, result.histogram[3]);
    }
}
