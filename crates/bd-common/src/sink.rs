//! Contracts between the orchestrator and the result store.
//!
//! [`ResultSink`] is the narrow push side: the orchestrator only ever counts,
//! clears, appends, and ranks. Every write call is all-or-nothing; a reader
//! never observes half of a flush. [`ResultQuery`] is the read side used by
//! the status and analysis surfaces, and [`EntityRegistry`] maps natural keys
//! to stable ids.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::id::{EntityId, EntityIndex, EntityKey};
use crate::method::Method;
use crate::record::{DetectionSummary, LeaderboardEntry, PointRecord};

/// Row counts of one method's partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MethodCounts {
    pub summaries: u64,
    pub points: u64,
}

impl MethodCounts {
    pub fn is_empty(&self) -> bool {
        self.summaries == 0
    }
}

/// Durable destination for detection output.
pub trait ResultSink {
    /// Current row counts for `method`.
    fn method_counts(&self, method: Method) -> Result<MethodCounts>;

    /// Delete every summary and point row of `method` in one transaction.
    /// Returns the counts that were removed.
    fn clear_method(&mut self, method: Method) -> Result<MethodCounts>;

    /// Append summaries atomically.
    fn write_summaries(&mut self, rows: &[DetectionSummary]) -> Result<()>;

    /// Append points atomically.
    fn write_points(&mut self, rows: &[PointRecord]) -> Result<()>;

    /// Rank summaries of `method` with `global_score > 0` by score
    /// descending, ties by ascending entity id; everything else gets no rank.
    /// Returns the number of ranked rows.
    fn assign_ranks(&mut self, method: Method) -> Result<u64>;
}

fn poisoned() -> Error {
    Error::SinkWrite("sink mutex poisoned".to_string())
}

/// Shared sink for concurrent method runs; the mutex serializes flushes.
impl<S: ResultSink> ResultSink for Arc<Mutex<S>> {
    fn method_counts(&self, method: Method) -> Result<MethodCounts> {
        self.lock().map_err(|_| poisoned())?.method_counts(method)
    }

    fn clear_method(&mut self, method: Method) -> Result<MethodCounts> {
        self.lock().map_err(|_| poisoned())?.clear_method(method)
    }

    fn write_summaries(&mut self, rows: &[DetectionSummary]) -> Result<()> {
        self.lock().map_err(|_| poisoned())?.write_summaries(rows)
    }

    fn write_points(&mut self, rows: &[PointRecord]) -> Result<()> {
        self.lock().map_err(|_| poisoned())?.write_points(rows)
    }

    fn assign_ranks(&mut self, method: Method) -> Result<u64> {
        self.lock().map_err(|_| poisoned())?.assign_ranks(method)
    }
}

/// Whole-store status, per method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetectionStatus {
    pub kleinberg_detections: u64,
    pub macd_detections: u64,
    pub total_detections: u64,
    pub kleinberg_points: u64,
    pub macd_points: u64,
    pub total_points: u64,
    pub has_kleinberg: bool,
    pub has_macd: bool,
}

impl DetectionStatus {
    pub fn from_counts(kleinberg: MethodCounts, macd: MethodCounts) -> Self {
        DetectionStatus {
            kleinberg_detections: kleinberg.summaries,
            macd_detections: macd.summaries,
            total_detections: kleinberg.summaries + macd.summaries,
            kleinberg_points: kleinberg.points,
            macd_points: macd.points,
            total_points: kleinberg.points + macd.points,
            has_kleinberg: kleinberg.summaries > 0,
            has_macd: macd.summaries > 0,
        }
    }

    pub fn counts(&self, method: Method) -> MethodCounts {
        match method {
            Method::Kleinberg => MethodCounts {
                summaries: self.kleinberg_detections,
                points: self.kleinberg_points,
            },
            Method::Macd => MethodCounts {
                summaries: self.macd_detections,
                points: self.macd_points,
            },
        }
    }
}

/// Selection of stored points. Empty `entity_ids` selects every entity.
#[derive(Debug, Clone, PartialEq)]
pub struct PointFilter {
    pub method: Method,
    pub entity_ids: Vec<EntityId>,
    /// Inclusive lower date bound.
    pub start: Option<NaiveDate>,
    /// Inclusive upper date bound.
    pub end: Option<NaiveDate>,
    pub min_contribution: Option<f64>,
}

impl PointFilter {
    pub fn new(method: Method) -> Self {
        PointFilter {
            method,
            entity_ids: Vec::new(),
            start: None,
            end: None,
            min_contribution: None,
        }
    }

    pub fn entity(mut self, id: EntityId) -> Self {
        self.entity_ids.push(id);
        self
    }

    pub fn entities(mut self, ids: impl IntoIterator<Item = EntityId>) -> Self {
        self.entity_ids.extend(ids);
        self
    }

    pub fn between(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn min_contribution(mut self, min: f64) -> Self {
        self.min_contribution = Some(min);
        self
    }

    /// In-memory equivalent of the store-side filter.
    pub fn matches(&self, point: &PointRecord) -> bool {
        point.method == self.method
            && (self.entity_ids.is_empty() || self.entity_ids.contains(&point.entity_id))
            && self.start.is_none_or(|s| point.date >= s)
            && self.end.is_none_or(|e| point.date <= e)
            && self
                .min_contribution
                .is_none_or(|m| point.contribution >= m)
    }
}

/// Read side of the result store.
pub trait ResultQuery {
    fn detection_status(&self) -> Result<DetectionStatus>;

    /// Summaries of `method`, optionally for one entity, by entity id.
    fn summaries(&self, method: Method, entity: Option<EntityId>) -> Result<Vec<DetectionSummary>>;

    /// Points matching `filter`, ordered by entity id then period index.
    fn points(&self, filter: &PointFilter) -> Result<Vec<PointRecord>>;

    /// Summaries joined with entity keys, ordered by rank (unranked last)
    /// then score descending.
    fn leaderboard(&self, method: Method, limit: Option<usize>) -> Result<Vec<LeaderboardEntry>>;
}

/// Key-to-id registry of known entities.
pub trait EntityRegistry {
    /// Register keys not yet known. Returns how many were new.
    fn register_entities(&mut self, keys: &[EntityKey]) -> Result<usize>;

    /// Snapshot of every registered key.
    fn entity_index(&self) -> Result<EntityIndex>;
}
