//! Read-side analysis over stored points and summaries.
//!
//! Everything here works against [`ResultQuery`], so it runs the same on the
//! SQLite store and on in-memory test doubles.

use std::collections::{BTreeMap, BTreeSet};

use bd_common::{
    EntityId, Error, Method, PointFilter, PointRecord, Result, ResultQuery,
};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Agreement band for the MACD/Kleinberg score ratio.
pub const AGREEMENT_BAND: (f64, f64) = (0.5, 2.0);

fn check_range(start: NaiveDate, end: NaiveDate) -> Result<()> {
    if start > end {
        return Err(Error::InvalidParameter {
            field: "start".to_string(),
            message: format!("start {start} is after end {end}"),
        });
    }
    Ok(())
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn max(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(f64::NEG_INFINITY, f64::max)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMetrics {
    pub total_raw_value: f64,
    pub avg_raw_value: f64,
    pub max_raw_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MethodMetrics {
    Kleinberg {
        avg_state_probability: f64,
        max_state_probability: f64,
        /// Share of points in the burst state.
        burst_state_ratio: f64,
        avg_weight_contribution: f64,
    },
    Macd {
        avg_histogram: f64,
        max_histogram: f64,
        positive_histogram_points: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBreakdown {
    pub date: NaiveDate,
    pub total_contribution: f64,
    pub point_count: u64,
    pub avg_contribution: f64,
    pub total_raw_value: f64,
    pub avg_raw_value: f64,
    pub max_raw_value: f64,
}

/// Score of one entity recomputed over an arbitrary date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicScore {
    pub entity_id: EntityId,
    pub method: Method,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub dynamic_score: f64,
    pub point_count: u64,
    pub date_range_days: i64,
    pub points_per_day: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_metrics: Option<RawMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_metrics: Option<MethodMetrics>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub daily_breakdown: Vec<DailyBreakdown>,
}

fn method_metrics(method: Method, points: &[PointRecord]) -> MethodMetrics {
    match method {
        Method::Kleinberg => {
            let details: Vec<_> = points.iter().filter_map(PointRecord::kleinberg).collect();
            let in_burst = details.iter().filter(|k| k.state == Some(1)).count();
            MethodMetrics::Kleinberg {
                avg_state_probability: mean(details.iter().map(|k| k.state_probability)),
                max_state_probability: max(details.iter().map(|k| k.state_probability)),
                burst_state_ratio: in_burst as f64 / points.len() as f64,
                avg_weight_contribution: mean(details.iter().map(|k| k.weight_contribution)),
            }
        }
        Method::Macd => {
            let histogram: Vec<f64> = points
                .iter()
                .filter_map(PointRecord::macd)
                .map(|m| m.histogram)
                .collect();
            MethodMetrics::Macd {
                avg_histogram: mean(histogram.iter().copied()),
                max_histogram: max(histogram.iter().copied()),
                positive_histogram_points: histogram.iter().filter(|&&h| h > 0.0).count() as u64,
            }
        }
    }
}

fn daily_breakdown(points: &[PointRecord]) -> Vec<DailyBreakdown> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&PointRecord>> = BTreeMap::new();
    for p in points {
        by_date.entry(p.date).or_default().push(p);
    }
    by_date
        .into_iter()
        .map(|(date, day)| DailyBreakdown {
            date,
            total_contribution: day.iter().map(|p| p.contribution).sum(),
            point_count: day.len() as u64,
            avg_contribution: mean(day.iter().map(|p| p.contribution)),
            total_raw_value: day.iter().map(|p| p.raw_value).sum(),
            avg_raw_value: mean(day.iter().map(|p| p.raw_value)),
            max_raw_value: max(day.iter().map(|p| p.raw_value)),
        })
        .collect()
}

/// Sum of stored contributions of `entity` between `start` and `end`
/// inclusive, with supporting metrics. An empty range scores 0.
pub fn dynamic_score<Q: ResultQuery + ?Sized>(
    query: &Q,
    entity: EntityId,
    method: Method,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<DynamicScore> {
    check_range(start, end)?;
    let points = query.points(&PointFilter::new(method).entity(entity).between(start, end))?;
    let date_range_days = (end - start).num_days() + 1;

    let mut score = DynamicScore {
        entity_id: entity,
        method,
        start_date: start,
        end_date: end,
        dynamic_score: 0.0,
        point_count: points.len() as u64,
        date_range_days,
        points_per_day: points.len() as f64 / date_range_days as f64,
        raw_metrics: None,
        method_metrics: None,
        daily_breakdown: Vec::new(),
    };
    if points.is_empty() {
        return Ok(score);
    }

    score.dynamic_score = points.iter().map(|p| p.contribution).sum();
    score.raw_metrics = Some(RawMetrics {
        total_raw_value: points.iter().map(|p| p.raw_value).sum(),
        avg_raw_value: mean(points.iter().map(|p| p.raw_value)),
        max_raw_value: max(points.iter().map(|p| p.raw_value)),
    });
    score.method_metrics = Some(method_metrics(method, &points));
    score.daily_breakdown = daily_breakdown(&points);
    Ok(score)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodComparison {
    pub entity_id: EntityId,
    pub kleinberg: DynamicScore,
    pub macd: DynamicScore,
    /// MACD score over Kleinberg score; infinite when Kleinberg is 0.
    pub score_ratio: f64,
    pub score_difference: f64,
    pub point_density_ratio: f64,
    pub methods_agree: bool,
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        f64::INFINITY
    }
}

pub fn compare_methods<Q: ResultQuery + ?Sized>(
    query: &Q,
    entity: EntityId,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<MethodComparison> {
    let kleinberg = dynamic_score(query, entity, Method::Kleinberg, start, end)?;
    let macd = dynamic_score(query, entity, Method::Macd, start, end)?;

    let score_ratio = ratio(macd.dynamic_score, kleinberg.dynamic_score);
    let (lo, hi) = AGREEMENT_BAND;
    Ok(MethodComparison {
        entity_id: entity,
        score_ratio,
        score_difference: macd.dynamic_score - kleinberg.dynamic_score,
        point_density_ratio: ratio(macd.points_per_day, kleinberg.points_per_day),
        methods_agree: (lo..=hi).contains(&score_ratio),
        kleinberg,
        macd,
    })
}

/// Per-method overview of stored results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSummary {
    pub method: Method,
    /// Entities with `global_score > 0`.
    pub bursting_entities: u64,
    pub total_entities: u64,
    pub avg_score: f64,
    pub max_score: f64,
    pub min_score: f64,
    pub avg_bursts: f64,
    pub point_count: u64,
    pub avg_contribution: f64,
    pub max_contribution: f64,
}

/// Loads every summary and point of `method`.
pub fn method_summary<Q: ResultQuery + ?Sized>(query: &Q, method: Method) -> Result<MethodSummary> {
    let summaries = query.summaries(method, None)?;
    let bursting: Vec<_> = summaries.iter().filter(|s| s.global_score > 0.0).collect();
    let points = query.points(&PointFilter::new(method))?;

    let or_zero = |v: f64| if v.is_finite() { v } else { 0.0 };
    Ok(MethodSummary {
        method,
        bursting_entities: bursting.len() as u64,
        total_entities: summaries.len() as u64,
        avg_score: mean(bursting.iter().map(|s| s.global_score)),
        max_score: or_zero(max(bursting.iter().map(|s| s.global_score))),
        min_score: or_zero(bursting.iter().map(|s| s.global_score).fold(f64::INFINITY, f64::min)),
        avg_bursts: mean(bursting.iter().map(|s| f64::from(s.num_bursts))),
        point_count: points.len() as u64,
        avg_contribution: mean(points.iter().map(|p| p.contribution)),
        max_contribution: or_zero(max(points.iter().map(|p| p.contribution))),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub total_contribution: f64,
    pub avg_contribution: f64,
    pub point_count: u64,
    pub unique_entities: u64,
    pub total_raw_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowAggregation {
    pub method: Method,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub window_days: u32,
    pub total_entities: u64,
    /// Non-empty windows only, chronological.
    pub windows: Vec<WindowStats>,
    pub total_windows: u64,
    pub avg_contribution_per_window: f64,
    pub peak_window: Option<WindowStats>,
}

/// Contributions of `entities` bucketed into consecutive `window_days`-day
/// windows starting at `start`; the last window is cut at `end`. An empty
/// `entities` selects every entity with stored points.
pub fn aggregate_by_window<Q: ResultQuery + ?Sized>(
    query: &Q,
    entities: &[EntityId],
    method: Method,
    start: NaiveDate,
    end: NaiveDate,
    window_days: u32,
) -> Result<WindowAggregation> {
    check_range(start, end)?;
    if window_days == 0 {
        return Err(Error::InvalidParameter {
            field: "window_days".to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    let points = query.points(
        &PointFilter::new(method)
            .entities(entities.iter().copied())
            .between(start, end),
    )?;

    let step = Duration::days(i64::from(window_days));
    let mut windows = Vec::new();
    let mut next = Some(start);
    while let Some(window_start) = next.filter(|d| *d <= end) {
        // Past the calendar's last date the window simply runs to `end`.
        let window_end = window_start
            .checked_add_signed(step - Duration::days(1))
            .map_or(end, |d| d.min(end));
        let inside: Vec<&PointRecord> = points
            .iter()
            .filter(|p| p.date >= window_start && p.date <= window_end)
            .collect();
        if !inside.is_empty() {
            let unique: BTreeSet<EntityId> = inside.iter().map(|p| p.entity_id).collect();
            windows.push(WindowStats {
                window_start,
                window_end,
                total_contribution: inside.iter().map(|p| p.contribution).sum(),
                avg_contribution: mean(inside.iter().map(|p| p.contribution)),
                point_count: inside.len() as u64,
                unique_entities: unique.len() as u64,
                total_raw_value: inside.iter().map(|p| p.raw_value).sum(),
            });
        }
        next = window_start.checked_add_signed(step);
    }

    let total_entities = if entities.is_empty() {
        points.iter().map(|p| p.entity_id).collect::<BTreeSet<_>>().len() as u64
    } else {
        entities.len() as u64
    };
    let peak_window = windows
        .iter()
        .fold(None::<&WindowStats>, |best, w| match best {
            Some(b) if b.total_contribution >= w.total_contribution => Some(b),
            _ => Some(w),
        })
        .cloned();
    Ok(WindowAggregation {
        method,
        start_date: start,
        end_date: end,
        window_days,
        total_entities,
        total_windows: windows.len() as u64,
        avg_contribution_per_window: mean(windows.iter().map(|w| w.total_contribution)),
        peak_window,
        windows,
    })
}

/// Highest-contribution points of `entity` on one date.
pub fn top_contributors<Q: ResultQuery + ?Sized>(
    query: &Q,
    entity: EntityId,
    method: Method,
    date: NaiveDate,
    limit: usize,
) -> Result<Vec<PointRecord>> {
    let mut points = query.points(&PointFilter::new(method).entity(entity).between(date, date))?;
    points.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));
    points.truncate(limit);
    Ok(points)
}
