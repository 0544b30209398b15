//! SQLite implementation of the sink, query, and registry contracts.

use std::path::{Path, PathBuf};

use bd_common::{
    DateInterval, DetectionStatus, DetectionSummary, EntityId, EntityIndex, EntityKey,
    EntityRegistry, KleinbergPoint, LeaderboardEntry, MacdPoint, Method, MethodCounts,
    MethodParams, PointDetail, PointFilter, PointRecord, ResultQuery, ResultSink,
};
use chrono::NaiveDate;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::schema;

const SUMMARY_COLUMNS: &str =
    "entity_id, method, global_score, rank, num_bursts, intervals, params";

const POINT_COLUMNS: &str = "entity_id, method, period_index, date, contribution, raw_value, \
     baseline_value, short_ema, long_ema, macd_line, signal, histogram, state, \
     state_probability, weight_contribution";

/// Result store backed by a single SQLite database file.
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        debug!(path = %path.display(), "opened result store");
        Ok(SqliteStore {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(SqliteStore { conn, path: None })
    }

    /// Database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Entities whose text matches exactly, in id order.
    pub fn find_entities(&self, text: &str) -> StoreResult<Vec<(EntityId, EntityKey)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, text, domain, field, subfield FROM entities WHERE text = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![text], |row| {
            Ok((EntityId(row.get(0)?), key_from_row(row, 1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn entity_key(&self, id: EntityId) -> StoreResult<Option<EntityKey>> {
        let key = self
            .conn
            .query_row(
                "SELECT text, domain, field, subfield FROM entities WHERE id = ?1",
                params![id.0],
                |row| key_from_row(row, 0),
            )
            .optional()?;
        Ok(key)
    }

    fn counts(&self, method: Method) -> StoreResult<MethodCounts> {
        let summaries: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM detections WHERE method = ?1",
            params![method.as_str()],
            |row| row.get(0),
        )?;
        let points: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM points WHERE method = ?1",
            params![method.as_str()],
            |row| row.get(0),
        )?;
        Ok(MethodCounts {
            summaries: summaries as u64,
            points: points as u64,
        })
    }

    fn clear(&mut self, method: Method) -> StoreResult<MethodCounts> {
        let tx = self.conn.transaction()?;
        let points = tx.execute("DELETE FROM points WHERE method = ?1", params![method.as_str()])?;
        let summaries = tx.execute(
            "DELETE FROM detections WHERE method = ?1",
            params![method.as_str()],
        )?;
        tx.commit()?;
        debug!(method = %method, summaries, points, "cleared method partition");
        Ok(MethodCounts {
            summaries: summaries as u64,
            points: points as u64,
        })
    }

    fn insert_summaries(&mut self, rows: &[DetectionSummary]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO detections ({SUMMARY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ))?;
            for row in rows {
                let intervals = serde_json::to_string(&row.intervals)?;
                let params_json = serde_json::to_string(&row.params)?;
                stmt.execute(params![
                    row.entity_id.0,
                    row.method.as_str(),
                    row.global_score,
                    row.rank.map(i64::from),
                    i64::from(row.num_bursts),
                    intervals,
                    params_json,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_points(&mut self, rows: &[PointRecord]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO points ({POINT_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ))?;
            for row in rows {
                let (macd, kleinberg) = match &row.detail {
                    PointDetail::Macd(m) => (Some(m), None),
                    PointDetail::Kleinberg(k) => (None, Some(k)),
                };
                stmt.execute(params![
                    row.entity_id.0,
                    row.method.as_str(),
                    i64::from(row.period_index),
                    row.date,
                    row.contribution,
                    row.raw_value,
                    row.baseline_value,
                    macd.map(|m| m.short_ema),
                    macd.map(|m| m.long_ema),
                    macd.map(|m| m.macd_line),
                    macd.map(|m| m.signal),
                    macd.map(|m| m.histogram),
                    kleinberg.and_then(|k| k.state).map(i64::from),
                    kleinberg.map(|k| k.state_probability),
                    kleinberg.map(|k| k.weight_contribution),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn rank(&mut self, method: Method) -> StoreResult<u64> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE detections SET rank = NULL WHERE method = ?1",
            params![method.as_str()],
        )?;
        let ranked = tx.execute(
            "UPDATE detections SET rank = ranked.position
             FROM (
                 SELECT id, ROW_NUMBER() OVER (ORDER BY global_score DESC, entity_id ASC) AS position
                 FROM detections
                 WHERE method = ?1 AND global_score > 0
             ) AS ranked
             WHERE detections.id = ranked.id",
            params![method.as_str()],
        )?;
        tx.commit()?;
        Ok(ranked as u64)
    }

    fn load_summaries(
        &self,
        method: Method,
        entity: Option<EntityId>,
    ) -> StoreResult<Vec<DetectionSummary>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM detections
             WHERE method = ?1 AND (?2 IS NULL OR entity_id = ?2)
             ORDER BY entity_id"
        ))?;
        let rows = stmt.query_map(params![method.as_str(), entity.map(|e| e.0)], |row| {
            summary_from_row(row, 0)
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn load_points(&self, filter: &PointFilter) -> StoreResult<Vec<PointRecord>> {
        let mut sql = format!("SELECT {POINT_COLUMNS} FROM points WHERE method = ?");
        let mut values: Vec<Value> = vec![Value::Text(filter.method.as_str().to_string())];

        if !filter.entity_ids.is_empty() {
            let marks = vec!["?"; filter.entity_ids.len()].join(", ");
            sql.push_str(&format!(" AND entity_id IN ({marks})"));
            values.extend(filter.entity_ids.iter().map(|id| Value::Integer(id.0)));
        }
        if let Some(start) = filter.start {
            sql.push_str(" AND date >= ?");
            values.push(Value::Text(start.to_string()));
        }
        if let Some(end) = filter.end {
            sql.push_str(" AND date <= ?");
            values.push(Value::Text(end.to_string()));
        }
        if let Some(min) = filter.min_contribution {
            sql.push_str(" AND contribution >= ?");
            values.push(Value::Real(min));
        }
        sql.push_str(" ORDER BY entity_id, period_index");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), point_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn load_leaderboard(
        &self,
        method: Method,
        limit: Option<usize>,
    ) -> StoreResult<Vec<LeaderboardEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.text, e.domain, e.field, e.subfield,
                    d.entity_id, d.method, d.global_score, d.rank, d.num_bursts,
                    d.intervals, d.params
             FROM detections d
             JOIN entities e ON e.id = d.entity_id
             WHERE d.method = ?1
             ORDER BY d.rank IS NULL, d.rank, d.global_score DESC, d.entity_id
             LIMIT ?2",
        )?;
        let limit = limit.map_or(-1, |l| l as i64);
        let rows = stmt.query_map(params![method.as_str(), limit], |row| {
            Ok(LeaderboardEntry {
                key: key_from_row(row, 0)?,
                summary: summary_from_row(row, 4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn register(&mut self, keys: &[EntityKey]) -> StoreResult<usize> {
        let tx = self.conn.transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO entities (text, domain, field, subfield)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for key in keys {
                added += stmt.execute(params![key.text, key.domain, key.field, key.subfield])?;
            }
        }
        tx.commit()?;
        Ok(added)
    }

    fn index(&self) -> StoreResult<EntityIndex> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, text, domain, field, subfield FROM entities")?;
        let rows = stmt.query_map([], |row| Ok((key_from_row(row, 1)?, EntityId(row.get(0)?))))?;
        Ok(rows.collect::<Result<EntityIndex, _>>()?)
    }
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn method_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Method> {
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn key_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<EntityKey> {
    Ok(EntityKey {
        text: row.get(base)?,
        domain: row.get(base + 1)?,
        field: row.get(base + 2)?,
        subfield: row.get(base + 3)?,
    })
}

fn summary_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<DetectionSummary> {
    let rank: Option<i64> = row.get(base + 3)?;
    let num_bursts: i64 = row.get(base + 4)?;
    let intervals: Vec<DateInterval> = json_column(row, base + 5)?;
    let params: MethodParams = json_column(row, base + 6)?;
    Ok(DetectionSummary {
        entity_id: EntityId(row.get(base)?),
        method: method_column(row, base + 1)?,
        global_score: row.get(base + 2)?,
        rank: rank.map(|r| r as u32),
        num_bursts: num_bursts as u32,
        intervals,
        params,
    })
}

fn point_from_row(row: &Row<'_>) -> rusqlite::Result<PointRecord> {
    let method = method_column(row, 1)?;
    let period_index: i64 = row.get(2)?;
    let date: NaiveDate = row.get(3)?;
    let detail = match method {
        Method::Macd => PointDetail::Macd(MacdPoint {
            short_ema: row.get(7)?,
            long_ema: row.get(8)?,
            macd_line: row.get(9)?,
            signal: row.get(10)?,
            histogram: row.get(11)?,
        }),
        Method::Kleinberg => {
            let state: Option<i64> = row.get(12)?;
            PointDetail::Kleinberg(KleinbergPoint {
                state: state.map(|s| s as u8),
                state_probability: row.get(13)?,
                weight_contribution: row.get(14)?,
            })
        }
    };
    Ok(PointRecord {
        entity_id: EntityId(row.get(0)?),
        method,
        period_index: period_index as u32,
        date,
        contribution: row.get(4)?,
        raw_value: row.get(5)?,
        baseline_value: row.get(6)?,
        detail,
    })
}

impl ResultSink for SqliteStore {
    fn method_counts(&self, method: Method) -> bd_common::Result<MethodCounts> {
        self.counts(method).map_err(StoreError::into_read)
    }

    fn clear_method(&mut self, method: Method) -> bd_common::Result<MethodCounts> {
        self.clear(method).map_err(StoreError::into_sink)
    }

    fn write_summaries(&mut self, rows: &[DetectionSummary]) -> bd_common::Result<()> {
        self.insert_summaries(rows).map_err(StoreError::into_sink)
    }

    fn write_points(&mut self, rows: &[PointRecord]) -> bd_common::Result<()> {
        self.insert_points(rows).map_err(StoreError::into_sink)
    }

    fn assign_ranks(&mut self, method: Method) -> bd_common::Result<u64> {
        self.rank(method).map_err(StoreError::into_sink)
    }
}

impl ResultQuery for SqliteStore {
    fn detection_status(&self) -> bd_common::Result<DetectionStatus> {
        let kleinberg = self.counts(Method::Kleinberg).map_err(StoreError::into_read)?;
        let macd = self.counts(Method::Macd).map_err(StoreError::into_read)?;
        Ok(DetectionStatus::from_counts(kleinberg, macd))
    }

    fn summaries(
        &self,
        method: Method,
        entity: Option<EntityId>,
    ) -> bd_common::Result<Vec<DetectionSummary>> {
        self.load_summaries(method, entity)
            .map_err(StoreError::into_read)
    }

    fn points(&self, filter: &PointFilter) -> bd_common::Result<Vec<PointRecord>> {
        self.load_points(filter).map_err(StoreError::into_read)
    }

    fn leaderboard(
        &self,
        method: Method,
        limit: Option<usize>,
    ) -> bd_common::Result<Vec<LeaderboardEntry>> {
        self.load_leaderboard(method, limit)
            .map_err(StoreError::into_read)
    }
}

impl EntityRegistry for SqliteStore {
    fn register_entities(&mut self, keys: &[EntityKey]) -> bd_common::Result<usize> {
        self.register(keys).map_err(StoreError::into_sink)
    }

    fn entity_index(&self) -> bd_common::Result<EntityIndex> {
        self.index().map_err(StoreError::into_read)
    }
}
