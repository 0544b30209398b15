//! Method runs over the whole entity set.
//!
//! A run resolves entity ids, walks (domain, field) groups in chunks, scores
//! each chunk across scoped worker threads, and streams summaries and points
//! into the sink through two independently sized buffers. After the last
//! flush the method's summaries are ranked.
//!
//! Rerun policy: a method with stored summaries is left alone unless
//! `force_rerun` is set, in which case its partition is cleared first. The
//! input is checked before anything is cleared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bd_common::{
    DetectionSummary, EntityId, EntityIndex, Error, Method, MethodCounts, PointRecord, Result,
    ResultSink,
};
use bd_config::{BufferSettings, DetectConfig};
use serde::{Deserialize, Serialize};

use crate::kleinberg::KleinbergDetector;
use crate::logging::{event_names, generate_run_id, LogContext, Stage};
use crate::macd::MacdDetector;
use crate::matrix::{MatrixSource, TimeSeriesMatrix};

/// Wall-clock budget for a run.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Deadline {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub force_rerun: bool,
    /// Set to `true` from another thread to stop at the next chunk boundary.
    pub cancel: Option<Arc<AtomicBool>>,
    pub deadline: Option<Deadline>,
}

impl RunOptions {
    pub fn force_rerun(mut self, force: bool) -> Self {
        self.force_rerun = force;
        self
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_timeout(mut self, budget: Duration) -> Self {
        self.deadline = Some(Deadline::after(budget));
        self
    }

    fn check(&self, method: Method) -> Result<()> {
        if self
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            return Err(Error::Cancelled { method });
        }
        if let Some(deadline) = self.deadline.filter(Deadline::expired) {
            return Err(Error::Timeout {
                method,
                seconds: deadline.budget().as_secs(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    /// Rows were already stored and `force_rerun` was off.
    AlreadyPresent,
    Failed {
        kind: String,
        code: u32,
        message: String,
    },
}

impl OutcomeStatus {
    pub fn label(&self) -> &'static str {
        match self {
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::AlreadyPresent => "already_present",
            OutcomeStatus::Failed { .. } => "failed",
        }
    }
}

/// Result of one method run. Row counts are what the sink committed; for
/// `already_present` they are the stored counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodOutcome {
    pub method: Method,
    #[serde(flatten)]
    pub status: OutcomeStatus,
    pub summaries_written: u64,
    pub points_written: u64,
    /// Rows cleared before the run.
    pub summaries_cleared: u64,
    /// Entities the detector declined (Kleinberg only).
    pub entities_skipped: u64,
    /// Matrix rows without a registered id.
    pub entities_unresolved: u64,
    pub ranked: u64,
    pub duration_ms: u64,
}

impl MethodOutcome {
    pub fn success(&self) -> bool {
        !matches!(self.status, OutcomeStatus::Failed { .. })
    }

    pub fn error_kind(&self) -> Option<&str> {
        match &self.status {
            OutcomeStatus::Failed { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    summaries: u64,
    points: u64,
    cleared: u64,
    skipped: u64,
    unresolved: u64,
    ranked: u64,
}

/// Summary and point buffers with their own flush thresholds.
struct RowBuffer<'a> {
    method: Method,
    limits: BufferSettings,
    summaries: Vec<DetectionSummary>,
    points: Vec<PointRecord>,
    log: &'a LogContext,
}

impl<'a> RowBuffer<'a> {
    fn new(method: Method, limits: BufferSettings, log: &'a LogContext) -> Self {
        RowBuffer {
            method,
            limits,
            summaries: Vec::with_capacity(limits.summary_rows.min(65_536)),
            points: Vec::with_capacity(limits.point_rows.min(262_144)),
            log,
        }
    }

    fn push<S: ResultSink + ?Sized>(
        &mut self,
        sink: &mut S,
        tally: &mut Tally,
        summary: DetectionSummary,
        points: Vec<PointRecord>,
    ) -> Result<()> {
        self.summaries.push(summary);
        self.points.extend(points);
        if self.summaries.len() >= self.limits.summary_rows {
            self.flush_summaries(sink, tally)?;
        }
        if self.points.len() >= self.limits.point_rows {
            self.flush_points(sink, tally)?;
        }
        Ok(())
    }

    fn flush_summaries<S: ResultSink + ?Sized>(
        &mut self,
        sink: &mut S,
        tally: &mut Tally,
    ) -> Result<()> {
        if self.summaries.is_empty() {
            return Ok(());
        }
        sink.write_summaries(&self.summaries)?;
        tally.summaries += self.summaries.len() as u64;
        crate::log_event!(
            self.log,
            DEBUG,
            event_names::BUFFER_FLUSHED,
            Stage::Flush,
            "flushed summaries",
            method = self.method.as_str(),
            rows = self.summaries.len() as u64
        );
        self.summaries.clear();
        Ok(())
    }

    fn flush_points<S: ResultSink + ?Sized>(
        &mut self,
        sink: &mut S,
        tally: &mut Tally,
    ) -> Result<()> {
        if self.points.is_empty() {
            return Ok(());
        }
        sink.write_points(&self.points)?;
        tally.points += self.points.len() as u64;
        crate::log_event!(
            self.log,
            DEBUG,
            event_names::BUFFER_FLUSHED,
            Stage::Flush,
            "flushed points",
            method = self.method.as_str(),
            rows = self.points.len() as u64
        );
        self.points.clear();
        Ok(())
    }

    fn finish<S: ResultSink + ?Sized>(mut self, sink: &mut S, tally: &mut Tally) -> Result<()> {
        self.flush_summaries(sink, tally)?;
        self.flush_points(sink, tally)
    }
}

/// Score `items` on up to `workers` scoped threads, keeping input order.
fn compute_parallel<T, R, F>(items: &[T], workers: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    if workers <= 1 || items.len() < 2 {
        return items.iter().map(&f).collect();
    }
    let per_worker = items.len().div_ceil(workers);
    thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = items
            .chunks(per_worker)
            .map(|slice| s.spawn(move || slice.iter().map(f).collect::<Vec<R>>()))
            .collect();

        let mut out = Vec::with_capacity(items.len());
        for handle in handles {
            match handle.join() {
                Ok(part) => out.extend(part),
                Err(payload) => std::panic::resume_unwind(payload),
            }
        }
        out
    })
}

type EntityRows = Option<(DetectionSummary, Vec<PointRecord>)>;

/// Runs detectors and writes their output to a [`ResultSink`].
#[derive(Debug, Clone)]
pub struct BurstOrchestrator {
    config: DetectConfig,
    log: LogContext,
}

impl BurstOrchestrator {
    pub fn new(config: DetectConfig) -> Self {
        BurstOrchestrator {
            config,
            log: LogContext::new(generate_run_id()),
        }
    }

    /// Reuse an existing run id for log correlation.
    pub fn with_log_context(mut self, log: LogContext) -> Self {
        self.log = log;
        self
    }

    pub fn config(&self) -> &DetectConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        &self.log.run_id
    }

    /// Run one method. Never panics on detector input; failures are reported
    /// in the outcome together with whatever was committed before them.
    pub fn run_method<M, S>(
        &self,
        method: Method,
        source: &M,
        index: &EntityIndex,
        sink: &mut S,
        opts: &RunOptions,
    ) -> MethodOutcome
    where
        M: MatrixSource + ?Sized,
        S: ResultSink + ?Sized,
    {
        let started = Instant::now();
        let mut tally = Tally::default();
        let result = self.execute(method, source, index, sink, opts, &mut tally);
        let duration_ms = started.elapsed().as_millis() as u64;

        let status = match result {
            Ok(None) => {
                crate::log_event!(
                    self.log,
                    INFO,
                    event_names::METHOD_FINISHED,
                    Stage::Detect,
                    "method finished",
                    method = method.as_str(),
                    summaries = tally.summaries,
                    points = tally.points,
                    skipped = tally.skipped,
                    unresolved = tally.unresolved,
                    duration_ms = duration_ms
                );
                OutcomeStatus::Completed
            }
            Ok(Some(existing)) => {
                tally.summaries = existing.summaries;
                tally.points = existing.points;
                OutcomeStatus::AlreadyPresent
            }
            Err(err) => {
                crate::log_event!(
                    self.log,
                    ERROR,
                    event_names::METHOD_FAILED,
                    Stage::Detect,
                    "method failed",
                    method = method.as_str(),
                    kind = err.kind(),
                    error = err.to_string().as_str(),
                    summaries = tally.summaries,
                    points = tally.points
                );
                OutcomeStatus::Failed {
                    kind: err.kind().to_string(),
                    code: err.code(),
                    message: err.to_string(),
                }
            }
        };

        MethodOutcome {
            method,
            status,
            summaries_written: tally.summaries,
            points_written: tally.points,
            summaries_cleared: tally.cleared,
            entities_skipped: tally.skipped,
            entities_unresolved: tally.unresolved,
            ranked: tally.ranked,
            duration_ms,
        }
    }

    /// Kleinberg, then MACD, against one sink.
    pub fn run_both<M, S>(
        &self,
        source: &M,
        index: &EntityIndex,
        sink: &mut S,
        opts: &RunOptions,
    ) -> Vec<MethodOutcome>
    where
        M: MatrixSource + ?Sized,
        S: ResultSink + ?Sized,
    {
        Method::ALL
            .iter()
            .map(|&method| self.run_method(method, source, index, sink, opts))
            .collect()
    }

    /// Both methods on their own threads; see [`Self::run_concurrently`].
    pub fn run_both_concurrently<M, S>(
        &self,
        source: &M,
        index: &EntityIndex,
        sink: Arc<Mutex<S>>,
        opts: &RunOptions,
    ) -> Vec<MethodOutcome>
    where
        M: MatrixSource + Sync + ?Sized,
        S: ResultSink + Send,
    {
        self.run_concurrently(&Method::ALL, source, index, sink, opts)
    }

    /// One thread per entry of `methods`, outcomes in the same order.
    /// Methods write disjoint partitions; the mutex serializes flushes.
    pub fn run_concurrently<M, S>(
        &self,
        methods: &[Method],
        source: &M,
        index: &EntityIndex,
        sink: Arc<Mutex<S>>,
        opts: &RunOptions,
    ) -> Vec<MethodOutcome>
    where
        M: MatrixSource + Sync + ?Sized,
        S: ResultSink + Send,
    {
        thread::scope(|s| {
            let handles: Vec<_> = methods
                .iter()
                .map(|&method| {
                    let mut shared = Arc::clone(&sink);
                    s.spawn(move || self.run_method(method, source, index, &mut shared, opts))
                })
                .collect();

            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(outcome) => outcome,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }

    /// `Ok(Some(counts))` when the method was already present.
    fn execute<M, S>(
        &self,
        method: Method,
        source: &M,
        index: &EntityIndex,
        sink: &mut S,
        opts: &RunOptions,
        tally: &mut Tally,
    ) -> Result<Option<MethodCounts>>
    where
        M: MatrixSource + ?Sized,
        S: ResultSink + ?Sized,
    {
        let existing = sink.method_counts(method)?;
        if !existing.is_empty() && !opts.force_rerun {
            crate::log_event!(
                self.log,
                INFO,
                event_names::METHOD_SKIPPED,
                Stage::Detect,
                "results already present; use force_rerun to recompute",
                method = method.as_str(),
                summaries = existing.summaries,
                points = existing.points
            );
            return Ok(Some(existing));
        }

        if !source.has_data() {
            let info = source.info();
            crate::log_event!(
                self.log,
                ERROR,
                event_names::MATRIX_MISSING,
                Stage::Load,
                "input matrix not available",
                method = method.as_str(),
                path = info.path.as_deref().unwrap_or("<memory>")
            );
            return Err(Error::MissingInputData(
                info.path
                    .unwrap_or_else(|| "input matrix has no data".to_string()),
            ));
        }

        // Points without summaries are leftovers of an aborted run.
        if opts.force_rerun || existing.points > 0 {
            let cleared = sink.clear_method(method)?;
            tally.cleared = cleared.summaries;
            crate::log_event!(
                self.log,
                INFO,
                event_names::METHOD_CLEARED,
                Stage::Detect,
                "cleared previous results",
                method = method.as_str(),
                summaries = cleared.summaries,
                points = cleared.points
            );
        }

        let matrix = source.load()?;
        crate::log_event!(
            self.log,
            INFO,
            event_names::MATRIX_LOADED,
            Stage::Load,
            "matrix loaded",
            entities = matrix.len() as u64,
            periods = matrix.n_periods() as u64
        );

        self.detect(method, &matrix, index, sink, opts, tally)?;

        opts.check(method)?;
        tally.ranked = sink.assign_ranks(method)?;
        crate::log_event!(
            self.log,
            INFO,
            event_names::RANKS_ASSIGNED,
            Stage::Rank,
            "ranks assigned",
            method = method.as_str(),
            ranked = tally.ranked
        );
        Ok(None)
    }

    fn detect<S: ResultSink + ?Sized>(
        &self,
        method: Method,
        matrix: &TimeSeriesMatrix,
        index: &EntityIndex,
        sink: &mut S,
        opts: &RunOptions,
        tally: &mut Tally,
    ) -> Result<()> {
        let settings = self.config.orchestrator;
        let chunk_size = settings.chunk_size.max(1);
        let workers = settings.effective_parallelism();
        let totals = matrix.period_totals();
        let dates = matrix.dates();

        let mut groups = matrix.groups();
        if method == Method::Macd {
            groups.sort_by(|a, b| b.rows.len().cmp(&a.rows.len()));
        }

        crate::log_event!(
            self.log,
            INFO,
            event_names::METHOD_STARTED,
            Stage::Detect,
            "method started",
            method = method.as_str(),
            entities = matrix.len() as u64,
            groups = groups.len() as u64,
            workers = workers as u64
        );

        let kleinberg = KleinbergDetector::new(self.config.kleinberg);
        let macd = MacdDetector::new(self.config.macd);
        let score = |&(row, id): &(usize, EntityId)| -> EntityRows {
            let counts = &matrix.row(row).counts;
            match method {
                Method::Kleinberg => {
                    let total: f64 = counts.iter().sum();
                    if total == 0.0 || total.is_nan() {
                        return None;
                    }
                    let result = kleinberg.detect(counts, &totals)?;
                    Some((
                        result.summary(id, dates, kleinberg.params()),
                        result.points(id, dates, counts, &totals),
                    ))
                }
                Method::Macd => {
                    let result = macd.detect(counts);
                    Some((
                        result.summary(id, dates, macd.params()),
                        result.points(id, dates),
                    ))
                }
            }
        };

        let mut buffer = RowBuffer::new(method, settings.buffers(method), &self.log);
        for group in &groups {
            for chunk in group.rows.chunks(chunk_size) {
                opts.check(method)?;

                let work: Vec<(usize, EntityId)> = chunk
                    .iter()
                    .filter_map(|&row| match index.resolve(&matrix.row(row).key) {
                        Some(id) => Some((row, id)),
                        None => {
                            tally.unresolved += 1;
                            None
                        }
                    })
                    .collect();

                for rows in compute_parallel(&work, workers, &score) {
                    match rows {
                        Some((summary, points)) => buffer.push(sink, tally, summary, points)?,
                        None => tally.skipped += 1,
                    }
                }

                crate::log_event!(
                    self.log,
                    DEBUG,
                    event_names::CHUNK_DONE,
                    Stage::Detect,
                    "chunk done",
                    method = method.as_str(),
                    domain = group.domain.as_str(),
                    field = group.field.as_str(),
                    entities = work.len() as u64
                );
            }
        }

        if tally.unresolved > 0 {
            crate::log_event!(
                self.log,
                WARN,
                event_names::ENTITIES_UNRESOLVED,
                Stage::Detect,
                "matrix rows without a registered entity were skipped",
                method = method.as_str(),
                unresolved = tally.unresolved
            );
        }

        opts.check(method)?;
        buffer.finish(sink, tally)
    }
}
