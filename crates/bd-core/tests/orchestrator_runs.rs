//! End-to-end orchestrator runs against an in-memory SQLite store.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bd_common::{
    DetectionSummary, EntityIndex, EntityKey, EntityRegistry, Error, Method, MethodCounts,
    PointFilter, PointRecord, ResultQuery, ResultSink,
};
use bd_config::{BufferSettings, DetectConfig};
use bd_core::matrix::{parse_matrix, CsvMatrixSource, MatrixRow, MatrixSource, TimeSeriesMatrix};
use chrono::NaiveDate;
use bd_core::orchestrator::{BurstOrchestrator, OutcomeStatus, RunOptions};
use bd_store::SqliteStore;

const PERIODS: usize = 9;

/// Four entities in two fields; `zeros` never occurs.
fn matrix_csv() -> String {
    let mut csv = String::from("n-gram,domain,field,subfield,DF(n-gram)");
    for q in 0..PERIODS {
        let year = 2019 + q / 4;
        let month = 1 + 3 * (q % 4);
        csv.push_str(&format!(",{year}-{month:02}-01"));
    }
    csv.push('\n');
    let rows = [
        ("optical lattice", "Physical Sciences", "Physics", "Optics", [0, 0, 0, 10, 10, 10, 0, 0, 0]),
        ("laser", "Physical Sciences", "Physics", "Optics", [5, 5, 5, 5, 5, 5, 5, 5, 5]),
        ("zeros", "Physical Sciences", "Physics", "Optics", [0, 0, 0, 0, 0, 0, 0, 0, 0]),
        ("crispr", "Life Sciences", "Biology", "Genetics", [1, 2, 3, 5, 8, 13, 21, 34, 55]),
    ];
    for (text, domain, field, subfield, counts) in rows {
        csv.push_str(&format!("{text},{domain},{field},{subfield},3"));
        for c in counts {
            csv.push_str(&format!(",{c}"));
        }
        csv.push('\n');
    }
    csv
}

fn matrix() -> TimeSeriesMatrix {
    parse_matrix(matrix_csv().as_bytes()).unwrap()
}

fn registered_store(matrix: &TimeSeriesMatrix) -> (SqliteStore, EntityIndex) {
    let mut store = SqliteStore::open_in_memory().unwrap();
    store.register_entities(&matrix.keys()).unwrap();
    let index = store.entity_index().unwrap();
    (store, index)
}

fn orchestrator() -> BurstOrchestrator {
    BurstOrchestrator::new(DetectConfig::default())
}

#[test]
fn first_run_writes_one_point_per_period() {
    let m = matrix();
    let (mut store, index) = registered_store(&m);
    let outcomes = orchestrator().run_both(&m, &index, &mut store, &RunOptions::default());

    let kleinberg = &outcomes[0];
    assert_eq!(kleinberg.method, Method::Kleinberg);
    assert_eq!(kleinberg.status, OutcomeStatus::Completed);
    // The all-zero row has nothing to model.
    assert_eq!(kleinberg.summaries_written, 3);
    assert_eq!(kleinberg.entities_skipped, 1);
    assert_eq!(kleinberg.points_written, 3 * PERIODS as u64);
    // Measured against the column totals, none of these rows holds a burst
    // for two periods: the step dominates its own totals only at its onset.
    assert_eq!(kleinberg.ranked, 0);

    let macd = &outcomes[1];
    assert_eq!(macd.status, OutcomeStatus::Completed);
    assert_eq!(macd.summaries_written, 4);
    assert_eq!(macd.points_written, 4 * PERIODS as u64);

    let status = store.detection_status().unwrap();
    assert_eq!(status.kleinberg_detections, 3);
    assert_eq!(status.macd_points, 4 * PERIODS as u64);
    assert!(status.has_kleinberg && status.has_macd);

    for summary in store.summaries(Method::Macd, None).unwrap() {
        let points = store
            .points(&PointFilter::new(Method::Macd).entity(summary.entity_id))
            .unwrap();
        assert_eq!(points.len(), PERIODS);
        assert!(points.windows(2).all(|w| w[0].date < w[1].date));
    }
}

/// A short three-period spike on top of a large steady background, over
/// two years of months.
fn spike_matrix() -> TimeSeriesMatrix {
    let start = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
    let dates = (0..24).map(|i| start + chrono::Months::new(i)).collect();
    let spike = (0..24)
        .map(|t| if (10..=12).contains(&t) { 10.0 } else { 0.0 })
        .collect();
    let rows = vec![
        MatrixRow {
            key: EntityKey::new("background", "Physical Sciences", "Physics", "Optics"),
            counts: vec![100.0; 24],
        },
        MatrixRow {
            key: EntityKey::new("spike", "Physical Sciences", "Physics", "Optics"),
            counts: spike,
        },
    ];
    TimeSeriesMatrix::new(dates, rows).unwrap()
}

#[test]
fn kleinberg_ranks_a_row_that_bursts_against_the_totals() {
    let m = spike_matrix();
    let (mut store, index) = registered_store(&m);
    let outcome =
        orchestrator().run_method(Method::Kleinberg, &m, &index, &mut store, &RunOptions::default());
    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert!(outcome.ranked >= 1);

    let id = index
        .resolve(&EntityKey::new("spike", "Physical Sciences", "Physics", "Optics"))
        .unwrap();
    let summary = &store.summaries(Method::Kleinberg, Some(id)).unwrap()[0];
    assert_eq!(summary.num_bursts, 1);
    assert_eq!(
        summary.intervals,
        vec![[m.dates()[10], m.dates()[12]]]
    );
    assert!(summary.global_score > 0.0);
    assert!(summary.rank.is_some());

    let points = store
        .points(&PointFilter::new(Method::Kleinberg).entity(id))
        .unwrap();
    let inside: f64 = points[10..=12].iter().map(|p| p.contribution).sum();
    assert!((inside - summary.global_score).abs() < 1e-9);
    assert!(points
        .iter()
        .enumerate()
        .all(|(t, p)| (10..=12).contains(&t) || p.contribution == 0.0));
}

/// Wraps a store and fails every write once `writes_allowed` is used up.
struct FailingSink {
    inner: SqliteStore,
    writes_allowed: usize,
    write_attempts: usize,
    rank_calls: usize,
}

impl FailingSink {
    fn new(inner: SqliteStore, writes_allowed: usize) -> Self {
        FailingSink {
            inner,
            writes_allowed,
            write_attempts: 0,
            rank_calls: 0,
        }
    }

    fn admit(&mut self) -> bd_common::Result<()> {
        self.write_attempts += 1;
        if self.write_attempts > self.writes_allowed {
            return Err(Error::SinkWrite("disk full".to_string()));
        }
        Ok(())
    }
}

impl ResultSink for FailingSink {
    fn method_counts(&self, method: Method) -> bd_common::Result<MethodCounts> {
        self.inner.method_counts(method)
    }

    fn clear_method(&mut self, method: Method) -> bd_common::Result<MethodCounts> {
        self.inner.clear_method(method)
    }

    fn write_summaries(&mut self, rows: &[DetectionSummary]) -> bd_common::Result<()> {
        self.admit()?;
        self.inner.write_summaries(rows)
    }

    fn write_points(&mut self, rows: &[PointRecord]) -> bd_common::Result<()> {
        self.admit()?;
        self.inner.write_points(rows)
    }

    fn assign_ranks(&mut self, method: Method) -> bd_common::Result<u64> {
        self.rank_calls += 1;
        self.inner.assign_ranks(method)
    }
}

#[test]
fn sink_failure_aborts_the_method_and_keeps_committed_rows() {
    let m = matrix();
    let (store, index) = registered_store(&m);

    // One summary per flush, points held until the end: the first two
    // summary flushes commit and the third is refused.
    let mut config = DetectConfig::default();
    config.orchestrator.chunk_size = 1;
    config.orchestrator.macd_buffers = BufferSettings {
        summary_rows: 1,
        point_rows: 10_000,
    };
    let mut sink = FailingSink::new(store, 2);
    let outcome = BurstOrchestrator::new(config).run_method(
        Method::Macd,
        &m,
        &index,
        &mut sink,
        &RunOptions::default(),
    );

    assert!(!outcome.success());
    assert_eq!(outcome.error_kind(), Some("sink_write"));
    match &outcome.status {
        OutcomeStatus::Failed { code, .. } => assert_eq!(*code, 30),
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(outcome.summaries_written, 2);
    assert_eq!(outcome.points_written, 0);
    assert_eq!(outcome.ranked, 0);
    // No write is attempted after the refused one, and ranking never runs.
    assert_eq!(sink.write_attempts, 3);
    assert_eq!(sink.rank_calls, 0);

    let counts = sink.inner.method_counts(Method::Macd).unwrap();
    assert_eq!(counts.summaries, 2);
    assert_eq!(counts.points, 0);
    let stored = sink.inner.summaries(Method::Macd, None).unwrap();
    assert!(stored.iter().all(|s| s.rank.is_none()));
}

#[test]
fn all_zero_row_scores_zero_under_macd() {
    let m = matrix();
    let (mut store, index) = registered_store(&m);
    orchestrator().run_method(Method::Macd, &m, &index, &mut store, &RunOptions::default());

    let id = index
        .resolve(&EntityKey::new("zeros", "Physical Sciences", "Physics", "Optics"))
        .unwrap();
    let summary = &store.summaries(Method::Macd, Some(id)).unwrap()[0];
    assert_eq!(summary.global_score, 0.0);
    assert_eq!(summary.num_bursts, 0);
    let points = store
        .points(&PointFilter::new(Method::Macd).entity(id))
        .unwrap();
    assert!(points.iter().all(|p| p.contribution == 0.0));
}

#[test]
fn ranks_follow_score_descending() {
    let m = matrix();
    let (mut store, index) = registered_store(&m);
    orchestrator().run_method(Method::Macd, &m, &index, &mut store, &RunOptions::default());

    let board = store.leaderboard(Method::Macd, None).unwrap();
    assert_eq!(board.len(), 4);
    let (ranked, unranked): (Vec<_>, Vec<_>) =
        board.iter().partition(|e| e.summary.global_score > 0.0);
    // The step and the growth curve burst; the empty row cannot.
    assert!(ranked.len() >= 2 && ranked.len() < 4);
    for (i, entry) in ranked.iter().enumerate() {
        assert_eq!(entry.summary.rank, Some(i as u32 + 1));
    }
    assert!(ranked
        .windows(2)
        .all(|w| w[0].summary.global_score >= w[1].summary.global_score));
    assert!(unranked.iter().all(|e| e.summary.rank.is_none()));
    // Unranked rows sort after every ranked one.
    assert!(board[..2].iter().all(|e| e.summary.rank.is_some()));

    let top = store.leaderboard(Method::Macd, Some(2)).unwrap();
    assert_eq!(top.len(), 2);
}

#[test]
fn second_run_is_a_no_op() {
    let m = matrix();
    let (mut store, index) = registered_store(&m);
    let orch = orchestrator();
    orch.run_both(&m, &index, &mut store, &RunOptions::default());
    let before = store.summaries(Method::Kleinberg, None).unwrap();

    let outcomes = orch.run_both(&m, &index, &mut store, &RunOptions::default());
    for outcome in &outcomes {
        assert_eq!(outcome.status, OutcomeStatus::AlreadyPresent);
        assert!(outcome.success());
        assert_eq!(outcome.summaries_cleared, 0);
    }
    assert_eq!(outcomes[0].summaries_written, 3);
    assert_eq!(outcomes[1].points_written, 4 * PERIODS as u64);
    assert_eq!(store.summaries(Method::Kleinberg, None).unwrap(), before);
}

#[test]
fn already_present_does_not_need_input() {
    let m = matrix();
    let (mut store, index) = registered_store(&m);
    let orch = orchestrator();
    orch.run_method(Method::Macd, &m, &index, &mut store, &RunOptions::default());

    let missing = CsvMatrixSource::new("/nonexistent/matrix.csv");
    let outcome = orch.run_method(Method::Macd, &missing, &index, &mut store, &RunOptions::default());
    assert_eq!(outcome.status, OutcomeStatus::AlreadyPresent);
}

#[test]
fn force_rerun_replaces_results() {
    let m = matrix();
    let (mut store, index) = registered_store(&m);
    let orch = orchestrator();
    orch.run_method(Method::Kleinberg, &m, &index, &mut store, &RunOptions::default());
    let before = store.summaries(Method::Kleinberg, None).unwrap();

    let opts = RunOptions::default().force_rerun(true);
    let outcome = orch.run_method(Method::Kleinberg, &m, &index, &mut store, &opts);
    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(outcome.summaries_cleared, 3);
    assert_eq!(outcome.summaries_written, 3);

    let after = store.summaries(Method::Kleinberg, None).unwrap();
    assert_eq!(after, before);
    let status = store.detection_status().unwrap();
    assert_eq!(status.kleinberg_points, 3 * PERIODS as u64);
}

#[test]
fn force_rerun_leaves_other_method_alone() {
    let m = matrix();
    let (mut store, index) = registered_store(&m);
    let orch = orchestrator();
    orch.run_both(&m, &index, &mut store, &RunOptions::default());
    let macd_before = store.summaries(Method::Macd, None).unwrap();

    let opts = RunOptions::default().force_rerun(true);
    orch.run_method(Method::Kleinberg, &m, &index, &mut store, &opts);
    assert_eq!(store.summaries(Method::Macd, None).unwrap(), macd_before);
}

#[test]
fn missing_input_keeps_existing_rows() {
    let m = matrix();
    let (mut store, index) = registered_store(&m);
    let orch = orchestrator();
    orch.run_method(Method::Macd, &m, &index, &mut store, &RunOptions::default());

    let missing = CsvMatrixSource::new("/nonexistent/matrix.csv");
    let opts = RunOptions::default().force_rerun(true);
    let outcome = orch.run_method(Method::Macd, &missing, &index, &mut store, &opts);

    assert!(!outcome.success());
    assert_eq!(outcome.error_kind(), Some("missing_input_data"));
    assert_eq!(outcome.summaries_cleared, 0);
    assert_eq!(store.detection_status().unwrap().macd_detections, 4);
}

#[test]
fn missing_input_on_empty_store_fails() {
    let (mut store, index) = (SqliteStore::open_in_memory().unwrap(), EntityIndex::new());
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("empty.csv");
    std::fs::write(&empty, "").unwrap();

    let source = CsvMatrixSource::new(&empty);
    assert!(!source.has_data());
    let outcome =
        orchestrator().run_method(Method::Kleinberg, &source, &index, &mut store, &RunOptions::default());
    assert_eq!(outcome.error_kind(), Some("missing_input_data"));
    assert_eq!(outcome.summaries_written, 0);
}

#[test]
fn csv_source_matches_in_memory_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("matrix.csv");
    std::fs::write(&path, matrix_csv()).unwrap();

    let m = matrix();
    let (mut a, index) = registered_store(&m);
    let (mut b, _) = registered_store(&m);
    let orch = orchestrator();
    orch.run_method(Method::Macd, &m, &index, &mut a, &RunOptions::default());
    orch.run_method(Method::Macd, &CsvMatrixSource::new(&path), &index, &mut b, &RunOptions::default());

    assert_eq!(
        a.summaries(Method::Macd, None).unwrap(),
        b.summaries(Method::Macd, None).unwrap()
    );
}

#[test]
fn cancelled_before_first_chunk() {
    let m = matrix();
    let (mut store, index) = registered_store(&m);
    let flag = Arc::new(AtomicBool::new(true));
    let opts = RunOptions::default().with_cancel(flag);

    let outcome = orchestrator().run_method(Method::Macd, &m, &index, &mut store, &opts);
    assert_eq!(outcome.error_kind(), Some("cancelled"));
    assert_eq!(outcome.summaries_written, 0);
    assert_eq!(outcome.ranked, 0);
    assert_eq!(store.detection_status().unwrap().macd_detections, 0);
}

#[test]
fn zero_deadline_times_out() {
    let m = matrix();
    let (mut store, index) = registered_store(&m);
    let opts = RunOptions::default().with_timeout(Duration::ZERO);

    let outcome = orchestrator().run_method(Method::Kleinberg, &m, &index, &mut store, &opts);
    assert_eq!(outcome.error_kind(), Some("timeout"));
    match outcome.status {
        OutcomeStatus::Failed { code, .. } => assert_eq!(code, 41),
        other => panic!("unexpected status {other:?}"),
    }
}

#[test]
fn unregistered_rows_are_counted_not_written() {
    let m = matrix();
    let mut store = SqliteStore::open_in_memory().unwrap();
    store.register_entities(&m.keys()[..2]).unwrap();
    let index = store.entity_index().unwrap();

    let outcome = orchestrator().run_method(Method::Macd, &m, &index, &mut store, &RunOptions::default());
    assert!(outcome.success());
    assert_eq!(outcome.entities_unresolved, 2);
    assert_eq!(outcome.summaries_written, 2);
}

#[test]
fn tiny_buffers_and_chunks_match_defaults() {
    let m = matrix();
    let (mut reference, index) = registered_store(&m);
    orchestrator().run_both(&m, &index, &mut reference, &RunOptions::default());

    let mut config = DetectConfig::default();
    config.orchestrator.chunk_size = 1;
    config.orchestrator.max_parallel = 3;
    let tiny = BufferSettings {
        summary_rows: 1,
        point_rows: 2,
    };
    config.orchestrator.kleinberg_buffers = tiny;
    config.orchestrator.macd_buffers = tiny;

    let (mut store, _) = registered_store(&m);
    let outcomes = BurstOrchestrator::new(config).run_both(&m, &index, &mut store, &RunOptions::default());
    assert!(outcomes.iter().all(|o| o.success()));

    for method in Method::ALL {
        assert_eq!(
            store.summaries(method, None).unwrap(),
            reference.summaries(method, None).unwrap()
        );
        assert_eq!(
            store.points(&PointFilter::new(method)).unwrap(),
            reference.points(&PointFilter::new(method)).unwrap()
        );
    }
}

#[test]
fn concurrent_run_matches_sequential() {
    let m = matrix();
    let (mut sequential, index) = registered_store(&m);
    let orch = orchestrator();
    orch.run_both(&m, &index, &mut sequential, &RunOptions::default());

    let (store, _) = registered_store(&m);
    let shared = Arc::new(Mutex::new(store));
    let outcomes = orch.run_both_concurrently(&m, &index, Arc::clone(&shared), &RunOptions::default());
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].method, Method::Kleinberg);
    assert_eq!(outcomes[1].method, Method::Macd);
    assert!(outcomes.iter().all(|o| o.status == OutcomeStatus::Completed));

    let concurrent = shared.lock().unwrap();
    for method in Method::ALL {
        assert_eq!(
            concurrent.summaries(method, None).unwrap(),
            sequential.summaries(method, None).unwrap()
        );
    }
}

#[test]
fn concurrent_run_honours_the_method_list() {
    let m = matrix();
    let (store, index) = registered_store(&m);
    let shared = Arc::new(Mutex::new(store));
    let outcomes = orchestrator().run_concurrently(
        &[Method::Macd],
        &m,
        &index,
        Arc::clone(&shared),
        &RunOptions::default(),
    );
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].method, Method::Macd);

    let status = shared.lock().unwrap().detection_status().unwrap();
    assert!(status.has_macd);
    assert!(!status.has_kleinberg);
}

#[test]
fn stale_points_are_cleared_before_a_run() {
    let m = matrix();
    let (mut store, index) = registered_store(&m);
    let orch = orchestrator();
    orch.run_method(Method::Macd, &m, &index, &mut store, &RunOptions::default());

    // Simulate an aborted run: points survive, summaries do not.
    let points = store.points(&PointFilter::new(Method::Macd)).unwrap();
    store.clear_method(Method::Macd).unwrap();
    store.write_points(&points[..5]).unwrap();
    assert_eq!(store.method_counts(Method::Macd).unwrap().summaries, 0);

    let outcome = orch.run_method(Method::Macd, &m, &index, &mut store, &RunOptions::default());
    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(
        store.method_counts(Method::Macd).unwrap().points,
        4 * PERIODS as u64
    );
}
