//! Leaderboard CSV export.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use bd_common::{LeaderboardEntry, Method, MethodParams, ResultQuery};
use tracing::info;

use crate::error::{StoreError, StoreResult};

const KEY_COLUMNS: [&str; 9] = [
    "entity_id",
    "ngram",
    "domain",
    "field",
    "subfield",
    "global_score",
    "rank",
    "num_bursts",
    "burst_intervals",
];

fn param_columns(method: Method) -> &'static [&'static str] {
    match method {
        Method::Kleinberg => &["s_param", "gamma_param", "smoothing_window"],
        Method::Macd => &[
            "short_span",
            "long_span",
            "signal_span",
            "denominator_mode",
            "denominator_percentile",
        ],
    }
}

fn param_values(params: &MethodParams) -> Vec<String> {
    match params {
        MethodParams::Kleinberg(k) => vec![
            k.s.to_string(),
            k.gamma.to_string(),
            k.smoothing_window.to_string(),
        ],
        MethodParams::Macd(m) => vec![
            m.short_span.to_string(),
            m.long_span.to_string(),
            m.signal_span.to_string(),
            m.denominator_mode.to_string(),
            m.denominator_percentile.to_string(),
        ],
    }
}

fn entry_record(entry: &LeaderboardEntry) -> StoreResult<Vec<String>> {
    let summary = &entry.summary;
    let mut record = vec![
        summary.entity_id.to_string(),
        entry.key.text.clone(),
        entry.key.domain.clone(),
        entry.key.field.clone(),
        entry.key.subfield.clone(),
        summary.global_score.to_string(),
        summary.rank.map(|r| r.to_string()).unwrap_or_default(),
        summary.num_bursts.to_string(),
        serde_json::to_string(&summary.intervals)?,
    ];
    record.extend(param_values(&summary.params));
    Ok(record)
}

/// File name of a method's leaderboard export.
pub fn leaderboard_filename(method: Method) -> String {
    format!("{}_leaderboard.csv", method.as_str())
}

/// Write the full leaderboard of `method` as CSV, ranked rows first.
/// Returns the number of data rows written.
pub fn export_leaderboard<Q, W>(query: &Q, method: Method, writer: W) -> bd_common::Result<usize>
where
    Q: ResultQuery + ?Sized,
    W: Write,
{
    let entries = query.leaderboard(method, None)?;
    write_entries(&entries, method, writer).map_err(StoreError::into_read)
}

fn write_entries<W: Write>(
    entries: &[LeaderboardEntry],
    method: Method,
    writer: W,
) -> StoreResult<usize> {
    let mut csv = csv::Writer::from_writer(writer);
    let header: Vec<&str> = KEY_COLUMNS
        .iter()
        .chain(param_columns(method))
        .copied()
        .collect();
    csv.write_record(&header)?;
    for entry in entries {
        csv.write_record(entry_record(entry)?)?;
    }
    csv.flush()?;
    Ok(entries.len())
}

/// Export to `<dir>/<method>_leaderboard.csv`, creating `dir` if needed.
pub fn export_leaderboard_file<Q>(
    query: &Q,
    method: Method,
    dir: &Path,
) -> bd_common::Result<(PathBuf, usize)>
where
    Q: ResultQuery + ?Sized,
{
    std::fs::create_dir_all(dir)?;
    let path = dir.join(leaderboard_filename(method));
    let file = File::create(&path)?;
    let rows = export_leaderboard(query, method, file)?;
    info!(method = %method, rows, path = %path.display(), "exported leaderboard");
    Ok((path, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bd_common::{DetectionSummary, EntityId, EntityKey, KleinbergParams};
    use chrono::NaiveDate;

    fn entry(text: &str, id: i64, score: f64, rank: Option<u32>) -> LeaderboardEntry {
        let start = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2019, 7, 1).unwrap();
        LeaderboardEntry {
            key: EntityKey::new(text, "Life Sciences", "Biology", "Genetics, \"molecular\""),
            summary: DetectionSummary {
                entity_id: EntityId(id),
                method: Method::Kleinberg,
                global_score: score,
                rank,
                num_bursts: 1,
                intervals: vec![[start, end]],
                params: MethodParams::Kleinberg(KleinbergParams::default()),
            },
        }
    }

    #[test]
    fn test_write_entries_header_and_quoting() {
        let entries = vec![entry("crispr", 3, 12.5, Some(1)), entry("pcr", 8, 0.0, None)];
        let mut out = Vec::new();
        let rows = write_entries(&entries, Method::Kleinberg, &mut out).unwrap();
        assert_eq!(rows, 2);

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "entity_id,ngram,domain,field,subfield,global_score,rank,num_bursts,\
             burst_intervals,s_param,gamma_param,smoothing_window"
        );

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(&records[0][1], "crispr");
        assert_eq!(&records[0][4], "Genetics, \"molecular\"");
        assert_eq!(&records[0][6], "1");
        assert_eq!(&records[0][8], r#"[["2019-01-01","2019-07-01"]]"#);
        assert_eq!(&records[0][9], "5.7");
        assert_eq!(&records[1][6], "");
    }

    #[test]
    fn test_filename() {
        assert_eq!(leaderboard_filename(Method::Macd), "macd_leaderboard.csv");
    }
}
