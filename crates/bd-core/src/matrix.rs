//! Entity-by-period count matrix and its sources.
//!
//! The bundled source reads a wide CSV: one row per n-gram with its
//! hierarchy columns, then one column per period. Period headers only need
//! to start with an ISO date (`2019-01-01` or `2019-01-01 00:00:00` both
//! work); columns are reordered chronologically on load.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use bd_common::{EntityKey, Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Columns that are neither key nor period columns.
const IGNORED_COLUMNS: [&str; 3] = ["DF(n-gram)", "DF(n-gram, subfield)", "n_words"];

/// One entity's counts over the shared period axis.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixRow {
    pub key: EntityKey,
    /// Raw counts; NaN marks a missing cell.
    pub counts: Vec<f64>,
}

/// Counts of every entity aligned to one ordered period axis.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesMatrix {
    dates: Vec<NaiveDate>,
    rows: Vec<MatrixRow>,
}

/// Row indices sharing one (domain, field) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowGroup {
    pub domain: String,
    pub field: String,
    pub rows: Vec<usize>,
}

impl TimeSeriesMatrix {
    /// Build a matrix; every row must have one count per date and dates
    /// must be strictly increasing.
    pub fn new(dates: Vec<NaiveDate>, rows: Vec<MatrixRow>) -> Result<Self> {
        if let Some(pair) = dates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(Error::InvalidMatrix(format!(
                "period axis not strictly increasing at {}",
                pair[1]
            )));
        }
        if let Some(row) = rows.iter().find(|r| r.counts.len() != dates.len()) {
            return Err(Error::InvalidMatrix(format!(
                "row '{}' has {} counts for {} periods",
                row.key,
                row.counts.len(),
                dates.len()
            )));
        }
        Ok(TimeSeriesMatrix { dates, rows })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[MatrixRow] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> &MatrixRow {
        &self.rows[index]
    }

    pub fn n_periods(&self) -> usize {
        self.dates.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Per-period totals over every row, missing cells skipped.
    pub fn period_totals(&self) -> Vec<f64> {
        let mut totals = vec![0.0; self.dates.len()];
        for row in &self.rows {
            for (total, &count) in totals.iter_mut().zip(&row.counts) {
                if !count.is_nan() {
                    *total += count;
                }
            }
        }
        totals
    }

    /// Rows grouped by (domain, field) in order of first appearance.
    pub fn groups(&self) -> Vec<RowGroup> {
        let mut slots: HashMap<(&str, &str), usize> = HashMap::new();
        let mut groups: Vec<RowGroup> = Vec::new();
        for (i, row) in self.rows.iter().enumerate() {
            let slot = *slots.entry(row.key.group()).or_insert_with(|| {
                groups.push(RowGroup {
                    domain: row.key.domain.clone(),
                    field: row.key.field.clone(),
                    rows: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].rows.push(i);
        }
        groups
    }

    /// Every distinct entity key, in row order.
    pub fn keys(&self) -> Vec<EntityKey> {
        self.rows.iter().map(|r| r.key.clone()).collect()
    }
}

/// Availability of a matrix source, reported by the status surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixInfo {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Where detection input comes from.
pub trait MatrixSource {
    /// Whether `load` has anything to read.
    fn has_data(&self) -> bool;

    fn info(&self) -> MatrixInfo;

    fn load(&self) -> Result<TimeSeriesMatrix>;
}

/// Matrix already in memory.
impl MatrixSource for TimeSeriesMatrix {
    fn has_data(&self) -> bool {
        !self.dates.is_empty()
    }

    fn info(&self) -> MatrixInfo {
        MatrixInfo {
            exists: true,
            ..MatrixInfo::default()
        }
    }

    fn load(&self) -> Result<TimeSeriesMatrix> {
        Ok(self.clone())
    }
}

/// Wide CSV file on disk.
#[derive(Debug, Clone)]
pub struct CsvMatrixSource {
    path: PathBuf,
}

impl CsvMatrixSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvMatrixSource { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MatrixSource for CsvMatrixSource {
    fn has_data(&self) -> bool {
        std::fs::metadata(&self.path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    fn info(&self) -> MatrixInfo {
        let path = Some(self.path.display().to_string());
        match std::fs::metadata(&self.path) {
            Ok(meta) => MatrixInfo {
                exists: true,
                path,
                size_bytes: Some(meta.len()),
                error: None,
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MatrixInfo {
                exists: false,
                path,
                ..MatrixInfo::default()
            },
            Err(e) => MatrixInfo {
                exists: true,
                path,
                size_bytes: None,
                error: Some(e.to_string()),
            },
        }
    }

    fn load(&self) -> Result<TimeSeriesMatrix> {
        if !self.has_data() {
            return Err(Error::MissingInputData(format!(
                "no matrix data at {}",
                self.path.display()
            )));
        }
        let file = File::open(&self.path)?;
        let matrix = parse_matrix(BufReader::new(file))?;
        debug!(
            path = %self.path.display(),
            rows = matrix.len(),
            periods = matrix.n_periods(),
            "loaded matrix"
        );
        Ok(matrix)
    }
}

fn csv_error(err: csv::Error) -> Error {
    Error::InvalidMatrix(err.to_string())
}

/// Parse a period header: the first ten characters must be `YYYY-MM-DD`.
fn header_date(header: &str) -> Option<NaiveDate> {
    let prefix = header.trim().get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

fn parse_cell(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(f64::NAN);
    }
    raw.parse::<f64>().ok()
}

struct Layout {
    text: usize,
    domain: usize,
    field: usize,
    subfield: usize,
    /// (column index, date), sorted by date.
    periods: Vec<(usize, NaiveDate)>,
}

fn layout(headers: &csv::StringRecord) -> Result<Layout> {
    let find = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
    };
    let required = |names: &[&str]| {
        find(names).ok_or_else(|| {
            Error::InvalidMatrix(format!("missing required column '{}'", names[0]))
        })
    };

    let text = required(&["n-gram"])?;
    let domain = required(&["domain"])?;
    let field = required(&["field"])?;
    let subfield = required(&["subfield"])?;
    let keyed = [text, domain, field, subfield];

    let mut periods: Vec<(usize, NaiveDate)> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| !keyed.contains(i) && !IGNORED_COLUMNS.contains(&h.trim()))
        .filter_map(|(i, h)| header_date(h).map(|d| (i, d)))
        .collect();
    if periods.is_empty() {
        return Err(Error::InvalidMatrix("no valid period columns".to_string()));
    }
    periods.sort_by_key(|&(_, date)| date);
    if let Some(pair) = periods.windows(2).find(|w| w[0].1 == w[1].1) {
        return Err(Error::InvalidMatrix(format!(
            "duplicate period column for {}",
            pair[0].1
        )));
    }

    Ok(Layout {
        text,
        domain,
        field,
        subfield,
        periods,
    })
}

/// Parse a wide matrix CSV from any reader.
pub fn parse_matrix<R: Read>(reader: R) -> Result<TimeSeriesMatrix> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers().map_err(csv_error)?.clone();
    let layout = layout(&headers)?;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(csv_error)?;
        let cell = |i: usize| record.get(i).unwrap_or("").trim().to_string();

        let mut counts = Vec::with_capacity(layout.periods.len());
        for &(col, date) in &layout.periods {
            let raw = record.get(col).unwrap_or("");
            let value = parse_cell(raw).ok_or_else(|| {
                Error::InvalidMatrix(format!(
                    "row {}: non-numeric count '{}' for {}",
                    line + 1,
                    raw,
                    date
                ))
            })?;
            counts.push(value);
        }

        rows.push(MatrixRow {
            key: EntityKey::new(
                cell(layout.text),
                cell(layout.domain),
                cell(layout.field),
                cell(layout.subfield),
            ),
            counts,
        });
    }

    let dates = layout.periods.iter().map(|&(_, d)| d).collect();
    TimeSeriesMatrix::new(dates, rows)
}
