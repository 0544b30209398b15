//! Table layout and connection setup.

use rusqlite::Connection;

use crate::error::StoreResult;

/// Bumped whenever the DDL below changes shape.
pub const STORE_SCHEMA_VERSION: i64 = 1;

const DDL: &str = "
CREATE TABLE IF NOT EXISTS entities (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    text     TEXT NOT NULL,
    domain   TEXT NOT NULL,
    field    TEXT NOT NULL,
    subfield TEXT NOT NULL,
    UNIQUE (text, domain, field, subfield)
);

CREATE TABLE IF NOT EXISTS detections (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id    INTEGER NOT NULL,
    method       TEXT NOT NULL,
    global_score REAL NOT NULL,
    rank         INTEGER,
    num_bursts   INTEGER NOT NULL,
    intervals    TEXT NOT NULL,
    params       TEXT NOT NULL,
    UNIQUE (entity_id, method)
);

CREATE INDEX IF NOT EXISTS idx_detections_method_score
    ON detections (method, global_score DESC);

CREATE TABLE IF NOT EXISTS points (
    entity_id           INTEGER NOT NULL,
    method              TEXT NOT NULL,
    period_index        INTEGER NOT NULL,
    date                TEXT NOT NULL,
    contribution        REAL NOT NULL,
    raw_value           REAL NOT NULL,
    baseline_value      REAL NOT NULL,
    short_ema           REAL,
    long_ema            REAL,
    macd_line           REAL,
    signal              REAL,
    histogram           REAL,
    state               INTEGER,
    state_probability   REAL,
    weight_contribution REAL,
    PRIMARY KEY (method, entity_id, period_index)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_points_method_date
    ON points (method, date);
";

/// Apply pragmas and create tables on a fresh or existing connection.
pub fn initialize(conn: &Connection) -> StoreResult<()> {
    // WAL lets status queries read while a detection run is flushing.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(DDL)?;

    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version == 0 {
        conn.pragma_update(None, "user_version", STORE_SCHEMA_VERSION)?;
    }
    Ok(())
}
