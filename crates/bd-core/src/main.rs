//! `bd`: burst detection over an n-gram count matrix.
//!
//! Commands run detection into a SQLite result store and query it back.
//! stdout carries the command payload in the selected format; logs go to
//! stderr.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bd_common::{
    format_error_human, DenominatorMode, EntityId, EntityRegistry, Error, Method, OutputFormat,
    PointFilter, ResultQuery, ResultSink, StructuredError, SCHEMA_VERSION,
};
use bd_config::{load_config, DetectConfig, LoadedConfig};
use bd_core::analysis::{aggregate_by_window, compare_methods, dynamic_score, method_summary};
use bd_core::exit_codes::ExitCode;
use bd_core::logging::{
    event_names, generate_run_id, init_logging, LogConfig, LogContext, LogFormat, Stage,
};
use bd_core::matrix::{CsvMatrixSource, MatrixSource, TimeSeriesMatrix};
use bd_core::orchestrator::{BurstOrchestrator, MethodOutcome, RunOptions};
use bd_store::{export_leaderboard_file, SqliteStore};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};

/// Burst detection over n-gram time series
#[derive(Parser)]
#[command(name = "bd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to config.json (otherwise BD_CONFIG, BD_CONFIG_DIR, XDG, /etc)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Result database
    #[arg(long, global = true, env = "BD_DB")]
    db: Option<PathBuf>,

    /// Input count matrix (wide CSV)
    #[arg(long, global = true, env = "BD_INPUT")]
    input: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    /// Log line format on stderr
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Abort detection after this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register every entity of the input matrix
    Register,

    /// Run detection and store summaries and per-period points
    Detect(DetectArgs),

    /// Stored row counts per method and input availability
    Status,

    /// Score statistics per method, optionally with the top of the leaderboard
    Summary(SummaryArgs),

    /// Recompute one entity's score over a date range
    Score(ScoreArgs),

    /// Compare both methods for one entity over a date range
    Compare(CompareArgs),

    /// Aggregate contributions into fixed day windows
    Windows(WindowsArgs),

    /// Stored per-period points of one entity
    Points(PointsArgs),

    /// Write leaderboard CSVs
    Export(ExportArgs),

    /// Delete stored results of a method
    Clear(ClearArgs),

    /// Validate configuration and input
    Check,

    /// Print version information
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MethodChoice {
    Kleinberg,
    Macd,
    Both,
}

impl MethodChoice {
    fn methods(self) -> Vec<Method> {
        match self {
            MethodChoice::Kleinberg => vec![Method::Kleinberg],
            MethodChoice::Macd => vec![Method::Macd],
            MethodChoice::Both => Method::ALL.to_vec(),
        }
    }
}

#[derive(Args, Debug)]
struct DetectArgs {
    #[arg(value_enum, default_value = "both")]
    method: MethodChoice,

    /// Recompute even if results exist (clears the method first)
    #[arg(long)]
    force_rerun: bool,

    /// Run both methods at the same time
    #[arg(long)]
    concurrent: bool,

    #[command(flatten)]
    params: ParamOverrides,
}

/// Per-run parameter overrides; unset flags keep the config value.
#[derive(Args, Debug, Default)]
struct ParamOverrides {
    /// Kleinberg burst-rate multiplier
    #[arg(long)]
    s: Option<f64>,

    /// Kleinberg state-transition cost
    #[arg(long)]
    gamma: Option<f64>,

    /// Kleinberg smoothing window (1 disables)
    #[arg(long)]
    smoothing_window: Option<usize>,

    #[arg(long)]
    short_span: Option<usize>,

    #[arg(long)]
    long_span: Option<usize>,

    #[arg(long)]
    signal_span: Option<usize>,

    #[arg(long, value_enum)]
    denominator_mode: Option<DenominatorMode>,

    #[arg(long)]
    denominator_percentile: Option<f64>,

    /// Entities per chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Worker threads (0 = all cores)
    #[arg(long)]
    max_parallel: Option<usize>,
}

impl ParamOverrides {
    fn apply(&self, config: &mut DetectConfig) {
        let k = &mut config.kleinberg;
        k.s = self.s.unwrap_or(k.s);
        k.gamma = self.gamma.unwrap_or(k.gamma);
        k.smoothing_window = self.smoothing_window.unwrap_or(k.smoothing_window);

        let m = &mut config.macd;
        m.short_span = self.short_span.unwrap_or(m.short_span);
        m.long_span = self.long_span.unwrap_or(m.long_span);
        m.signal_span = self.signal_span.unwrap_or(m.signal_span);
        m.denominator_mode = self.denominator_mode.unwrap_or(m.denominator_mode);
        m.denominator_percentile = self
            .denominator_percentile
            .unwrap_or(m.denominator_percentile);

        let o = &mut config.orchestrator;
        o.chunk_size = self.chunk_size.unwrap_or(o.chunk_size);
        o.max_parallel = self.max_parallel.unwrap_or(o.max_parallel);
    }
}

/// One entity, by id or by text with optional hierarchy filters.
#[derive(Args, Debug)]
struct EntityArgs {
    /// Entity text (n-gram)
    entity: Option<String>,

    /// Entity id
    #[arg(long, conflicts_with = "entity")]
    id: Option<i64>,

    #[arg(long)]
    domain: Option<String>,

    #[arg(long)]
    field: Option<String>,

    #[arg(long)]
    subfield: Option<String>,
}

#[derive(Args, Debug)]
struct RangeArgs {
    /// First date, inclusive (YYYY-MM-DD)
    #[arg(long)]
    start: NaiveDate,

    /// Last date, inclusive (YYYY-MM-DD)
    #[arg(long)]
    end: NaiveDate,
}

#[derive(Args, Debug)]
struct SummaryArgs {
    #[arg(long, value_enum, default_value = "both")]
    method: MethodChoice,

    /// Include the top N leaderboard entries
    #[arg(long)]
    top: Option<usize>,
}

#[derive(Args, Debug)]
struct ScoreArgs {
    #[command(flatten)]
    entity: EntityArgs,

    #[arg(long, value_enum)]
    method: Method,

    #[command(flatten)]
    range: RangeArgs,
}

#[derive(Args, Debug)]
struct CompareArgs {
    #[command(flatten)]
    entity: EntityArgs,

    #[command(flatten)]
    range: RangeArgs,
}

#[derive(Args, Debug)]
struct WindowsArgs {
    /// Entity ids; all entities when omitted
    #[arg(long = "id", value_delimiter = ',')]
    ids: Vec<i64>,

    #[arg(long, value_enum)]
    method: Method,

    #[command(flatten)]
    range: RangeArgs,

    #[arg(long, default_value = "30")]
    window_days: u32,
}

#[derive(Args, Debug)]
struct PointsArgs {
    #[command(flatten)]
    entity: EntityArgs,

    #[arg(long, value_enum)]
    method: Method,

    #[arg(long)]
    start: Option<NaiveDate>,

    #[arg(long)]
    end: Option<NaiveDate>,

    #[arg(long)]
    min_contribution: Option<f64>,
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[arg(long, value_enum, default_value = "both")]
    method: MethodChoice,

    /// Output directory
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Args, Debug)]
struct ClearArgs {
    #[arg(value_enum)]
    method: MethodChoice,
}

/// Per-invocation state shared by command handlers.
struct Invocation<'a> {
    global: &'a GlobalOpts,
    log: LogContext,
    command: &'static str,
}

fn main() {
    let cli = Cli::parse();

    let level = LogConfig::from_env(None, None)
        .level
        .adjusted(cli.global.verbose, cli.global.quiet);
    let cli_level = (cli.global.verbose > 0 || cli.global.quiet).then_some(level);
    let log_config = LogConfig::from_env(cli_level, cli.global.log_format);
    init_logging(&log_config);

    let inv = Invocation {
        global: &cli.global,
        log: LogContext::new(generate_run_id()),
        command: command_name(&cli.command),
    };
    bd_core::log_event!(
        inv.log,
        DEBUG,
        event_names::RUN_STARTED,
        Stage::Init,
        "command started",
        command = inv.command
    );

    let result = match &cli.command {
        Commands::Register => run_register(&inv),
        Commands::Detect(args) => run_detect(&inv, args),
        Commands::Status => run_status(&inv),
        Commands::Summary(args) => run_summary(&inv, args),
        Commands::Score(args) => run_score(&inv, args),
        Commands::Compare(args) => run_compare(&inv, args),
        Commands::Windows(args) => run_windows(&inv, args),
        Commands::Points(args) => run_points(&inv, args),
        Commands::Export(args) => run_export(&inv, args),
        Commands::Clear(args) => run_clear(&inv, args),
        Commands::Check => run_check(&inv),
        Commands::Version => {
            print_version(&inv);
            Ok(ExitCode::Success)
        }
    };

    let code = match result {
        Ok(code) => code,
        Err(err) => output_error(&inv, &err),
    };
    bd_core::log_event!(
        inv.log,
        DEBUG,
        event_names::RUN_FINISHED,
        Stage::Init,
        "command finished",
        command = inv.command,
        exit_code = code.as_i32()
    );
    std::process::exit(code.as_i32());
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Register => "register",
        Commands::Detect(_) => "detect",
        Commands::Status => "status",
        Commands::Summary(_) => "summary",
        Commands::Score(_) => "score",
        Commands::Compare(_) => "compare",
        Commands::Windows(_) => "windows",
        Commands::Points(_) => "points",
        Commands::Export(_) => "export",
        Commands::Clear(_) => "clear",
        Commands::Check => "check",
        Commands::Version => "version",
    }
}

// ============================================================================
// Plumbing
// ============================================================================

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("burst-detect"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("results.db")
}

fn open_store(inv: &Invocation) -> Result<SqliteStore, Error> {
    let path = inv.global.db.clone().unwrap_or_else(default_db_path);
    SqliteStore::open(&path).map_err(|e| e.into_read())
}

fn input_source(inv: &Invocation) -> Result<CsvMatrixSource, Error> {
    inv.global
        .input
        .as_ref()
        .map(CsvMatrixSource::new)
        .ok_or_else(|| {
            Error::MissingInputData("no input matrix; pass --input or set BD_INPUT".to_string())
        })
}

fn load_detect_config(inv: &Invocation) -> Result<LoadedConfig, Error> {
    match load_config(inv.global.config.as_deref()) {
        Ok(loaded) => {
            bd_core::log_event!(
                inv.log,
                DEBUG,
                event_names::CONFIG_LOADED,
                Stage::Init,
                "configuration loaded",
                source = loaded.snapshot.config_source.as_str()
            );
            Ok(loaded)
        }
        Err(e) => {
            bd_core::log_event!(
                inv.log,
                WARN,
                event_names::CONFIG_ERROR,
                Stage::Init,
                "configuration rejected",
                error = e.to_string().as_str()
            );
            Err(Error::Config(e.to_string()))
        }
    }
}

/// Resolve an entity selector against the store.
fn resolve_entity(store: &SqliteStore, args: &EntityArgs) -> Result<EntityId, Error> {
    if let Some(id) = args.id {
        let id = EntityId(id);
        return match store.entity_key(id).map_err(|e| e.into_read())? {
            Some(_) => Ok(id),
            None => Err(Error::EntityNotFound { entity_id: id }),
        };
    }
    let Some(text) = args.entity.as_deref() else {
        return Err(Error::InvalidParameter {
            field: "entity".to_string(),
            message: "pass an entity text or --id".to_string(),
        });
    };
    let matches_filter = |value: &str, filter: &Option<String>| {
        filter.as_deref().is_none_or(|f| value.eq_ignore_ascii_case(f))
    };
    let candidates: Vec<_> = store
        .find_entities(text)
        .map_err(|e| e.into_read())?
        .into_iter()
        .filter(|(_, key)| {
            matches_filter(&key.domain, &args.domain)
                && matches_filter(&key.field, &args.field)
                && matches_filter(&key.subfield, &args.subfield)
        })
        .collect();
    match candidates.as_slice() {
        [(id, _)] => Ok(*id),
        [] => Err(Error::InvalidParameter {
            field: "entity".to_string(),
            message: format!("no registered entity '{text}'"),
        }),
        many => Err(Error::InvalidParameter {
            field: "entity".to_string(),
            message: format!(
                "'{text}' matches {} entities; narrow with --domain/--field/--subfield or use --id",
                many.len()
            ),
        }),
    }
}

fn envelope(inv: &Invocation, body: Value) -> Value {
    let mut out = json!({
        "schema_version": SCHEMA_VERSION,
        "run_id": inv.log.run_id,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "command": inv.command,
    });
    if let (Some(out), Value::Object(body)) = (out.as_object_mut(), body) {
        out.extend(body);
    }
    out
}

/// Print a payload in the selected format. `summary` is the one-line form,
/// `md` the Markdown body.
fn emit(inv: &Invocation, body: Value, summary: String, md: String) {
    match inv.global.format {
        OutputFormat::Json => {
            let value = envelope(inv, body);
            println!(
                "{}",
                serde_json::to_string_pretty(&value).unwrap_or_default()
            );
        }
        OutputFormat::Jsonl => {
            let value = envelope(inv, body);
            println!("{}", serde_json::to_string(&value).unwrap_or_default());
        }
        OutputFormat::Summary => println!("[{}] {}", inv.log.run_id, summary),
        OutputFormat::Md => {
            println!("# bd {}", inv.command);
            println!();
            print!("{md}");
        }
    }
}

fn output_error(inv: &Invocation, err: &Error) -> ExitCode {
    let code = ExitCode::from(err);
    bd_core::log_event!(
        inv.log,
        ERROR,
        event_names::INTERNAL_ERROR,
        Stage::Init,
        "command failed",
        command = inv.command,
        kind = err.kind()
    );
    match inv.global.format {
        OutputFormat::Json | OutputFormat::Jsonl => {
            let value = envelope(
                inv,
                json!({
                    "status": "error",
                    "exit_code": code.code_name(),
                    "error": StructuredError::from(err),
                }),
            );
            let text = if inv.global.format == OutputFormat::Json {
                serde_json::to_string_pretty(&value)
            } else {
                serde_json::to_string(&value)
            };
            eprintln!("{}", text.unwrap_or_default());
        }
        OutputFormat::Summary => {
            eprintln!("[{}] {} error: {}", inv.log.run_id, inv.command, err);
        }
        OutputFormat::Md => {
            use std::io::IsTerminal;
            eprintln!("{}", format_error_human(err, std::io::stderr().is_terminal()));
        }
    }
    code
}

fn fmt_score(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.4}")
    } else {
        "inf".to_string()
    }
}

// ============================================================================
// Commands
// ============================================================================

fn load_and_register(
    inv: &Invocation,
    store: &mut SqliteStore,
    source: &CsvMatrixSource,
) -> Result<(TimeSeriesMatrix, usize), Error> {
    let matrix = source.load()?;
    let new = store.register_entities(&matrix.keys())?;
    bd_core::log_event!(
        inv.log,
        INFO,
        event_names::MATRIX_LOADED,
        Stage::Load,
        "matrix loaded and entities registered",
        entities = matrix.len() as u64,
        periods = matrix.n_periods() as u64,
        new_entities = new as u64
    );
    Ok((matrix, new))
}

fn run_register(inv: &Invocation) -> Result<ExitCode, Error> {
    let source = input_source(inv)?;
    let mut store = open_store(inv)?;
    let (matrix, new) = load_and_register(inv, &mut store, &source)?;
    let total = store.entity_index()?.len();

    emit(
        inv,
        json!({
            "status": "ok",
            "input": source.info(),
            "matrix_entities": matrix.len(),
            "periods": matrix.n_periods(),
            "registered_new": new,
            "registered_total": total,
        }),
        format!("registered {new} new entities ({total} total)"),
        format!(
            "- Input: {}\n- Matrix entities: {}\n- Periods: {}\n- New: {new}\n- Total: {total}\n",
            source.path().display(),
            matrix.len(),
            matrix.n_periods()
        ),
    );
    Ok(ExitCode::Success)
}

fn outcome_exit_code(outcomes: &[MethodOutcome]) -> ExitCode {
    let failed: Vec<&MethodOutcome> = outcomes.iter().filter(|o| !o.success()).collect();
    match failed.first() {
        None => ExitCode::Success,
        Some(_) if failed.len() < outcomes.len() => ExitCode::PartialFailure,
        Some(first) => ExitCode::from_error_kind(first.error_kind().unwrap_or_default()),
    }
}

fn run_detect(inv: &Invocation, args: &DetectArgs) -> Result<ExitCode, Error> {
    let LoadedConfig {
        mut config,
        snapshot,
    } = load_detect_config(inv)?;
    args.params.apply(&mut config);
    config.validate()?;

    let csv = input_source(inv)?;
    let mut store = open_store(inv)?;

    // Register from the loaded matrix and reuse it for detection; a missing
    // file is left to the orchestrator so stored results still short-circuit.
    let loaded = if csv.has_data() {
        Some(load_and_register(inv, &mut store, &csv)?.0)
    } else {
        None
    };
    let source: &(dyn MatrixSource + Sync) = match &loaded {
        Some(matrix) => matrix,
        None => &csv,
    };
    let index = store.entity_index()?;

    let mut opts = RunOptions::default().force_rerun(args.force_rerun);
    if let Some(secs) = inv.global.timeout {
        opts = opts.with_timeout(Duration::from_secs(secs));
    }

    let orchestrator = BurstOrchestrator::new(config).with_log_context(inv.log.clone());
    let methods = args.method.methods();
    let outcomes = if args.concurrent {
        let shared = Arc::new(Mutex::new(store));
        orchestrator.run_concurrently(&methods, source, &index, shared, &opts)
    } else {
        methods
            .iter()
            .map(|&m| orchestrator.run_method(m, source, &index, &mut store, &opts))
            .collect()
    };

    let code = outcome_exit_code(&outcomes);
    let status = match code {
        ExitCode::Success => "ok",
        ExitCode::PartialFailure => "partial",
        _ => "error",
    };

    let summary = outcomes
        .iter()
        .map(|o| {
            format!(
                "{}={} ({} summaries, {} points)",
                o.method,
                o.status.label(),
                o.summaries_written,
                o.points_written
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut md = String::from(
        "| method | status | summaries | points | skipped | unresolved | ms |\n\
         |---|---|---|---|---|---|---|\n",
    );
    for o in &outcomes {
        let status = match o.error_kind() {
            Some(kind) => format!("failed ({kind})"),
            None => o.status.label().to_string(),
        };
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            o.method,
            status,
            o.summaries_written,
            o.points_written,
            o.entities_skipped,
            o.entities_unresolved,
            o.duration_ms
        ));
    }

    emit(
        inv,
        json!({
            "status": status,
            "exit_code": code.code_name(),
            "config": snapshot,
            "outcomes": outcomes,
        }),
        summary,
        md,
    );
    Ok(code)
}

fn run_status(inv: &Invocation) -> Result<ExitCode, Error> {
    let store = open_store(inv)?;
    let status = store.detection_status()?;
    let matrix = inv.global.input.as_ref().map(|p| CsvMatrixSource::new(p).info());

    let matrix_line = match &matrix {
        Some(info) if info.exists => format!(
            "present ({} bytes)",
            info.size_bytes.map(|b| b.to_string()).unwrap_or_default()
        ),
        Some(_) => "missing".to_string(),
        None => "not configured".to_string(),
    };
    emit(
        inv,
        json!({
            "status": "ok",
            "database": store.path().map(|p| p.display().to_string()),
            "detections": status,
            "matrix": matrix,
        }),
        format!(
            "kleinberg: {} summaries / {} points, macd: {} summaries / {} points, matrix {}",
            status.kleinberg_detections,
            status.kleinberg_points,
            status.macd_detections,
            status.macd_points,
            matrix_line
        ),
        format!(
            "| method | summaries | points |\n|---|---|---|\n\
             | kleinberg | {} | {} |\n| macd | {} | {} |\n| total | {} | {} |\n\nMatrix: {}\n",
            status.kleinberg_detections,
            status.kleinberg_points,
            status.macd_detections,
            status.macd_points,
            status.total_detections,
            status.total_points,
            matrix_line
        ),
    );
    Ok(ExitCode::Success)
}

fn run_summary(inv: &Invocation, args: &SummaryArgs) -> Result<ExitCode, Error> {
    let store = open_store(inv)?;
    let mut methods = Vec::new();
    let mut summary = Vec::new();
    let mut md = String::new();
    for method in args.method.methods() {
        let stats = method_summary(&store, method)?;
        let top = match args.top {
            Some(n) => Some(store.leaderboard(method, Some(n))?),
            None => None,
        };
        summary.push(format!(
            "{method}: {} bursting of {}, max {}",
            stats.bursting_entities,
            stats.total_entities,
            fmt_score(stats.max_score)
        ));
        md.push_str(&format!(
            "## {method}\n\n- Bursting entities: {} of {}\n- Score avg/min/max: {} / {} / {}\n\
             - Avg bursts: {:.2}\n- Points: {} (avg contribution {})\n\n",
            stats.bursting_entities,
            stats.total_entities,
            fmt_score(stats.avg_score),
            fmt_score(stats.min_score),
            fmt_score(stats.max_score),
            stats.avg_bursts,
            stats.point_count,
            fmt_score(stats.avg_contribution)
        ));
        if let Some(entries) = &top {
            md.push_str("| rank | entity | score | bursts |\n|---|---|---|---|\n");
            for e in entries {
                md.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    e.summary.rank.map(|r| r.to_string()).unwrap_or_default(),
                    e.key,
                    fmt_score(e.summary.global_score),
                    e.summary.num_bursts
                ));
            }
            md.push('\n');
        }
        methods.push(json!({ "summary": stats, "top": top }));
    }
    emit(
        inv,
        json!({ "status": "ok", "methods": methods }),
        summary.join("; "),
        md,
    );
    Ok(ExitCode::Success)
}

fn run_score(inv: &Invocation, args: &ScoreArgs) -> Result<ExitCode, Error> {
    let store = open_store(inv)?;
    let id = resolve_entity(&store, &args.entity)?;
    let score = dynamic_score(&store, id, args.method, args.range.start, args.range.end)?;
    emit(
        inv,
        json!({ "status": "ok", "score": score }),
        format!(
            "entity {} {} {}..{}: {} over {} points",
            id,
            args.method,
            score.start_date,
            score.end_date,
            fmt_score(score.dynamic_score),
            score.point_count
        ),
        format!(
            "- Entity: {}\n- Method: {}\n- Range: {} to {} ({} days)\n- Score: {}\n- Points: {} ({:.3}/day)\n",
            id,
            args.method,
            score.start_date,
            score.end_date,
            score.date_range_days,
            fmt_score(score.dynamic_score),
            score.point_count,
            score.points_per_day
        ),
    );
    Ok(ExitCode::Success)
}

fn run_compare(inv: &Invocation, args: &CompareArgs) -> Result<ExitCode, Error> {
    let store = open_store(inv)?;
    let id = resolve_entity(&store, &args.entity)?;
    let cmp = compare_methods(&store, id, args.range.start, args.range.end)?;
    let verdict = if cmp.methods_agree { "agree" } else { "divergent" };
    emit(
        inv,
        json!({ "status": "ok", "comparison": cmp }),
        format!(
            "entity {id}: kleinberg {} macd {} ratio {} ({verdict})",
            fmt_score(cmp.kleinberg.dynamic_score),
            fmt_score(cmp.macd.dynamic_score),
            fmt_score(cmp.score_ratio)
        ),
        format!(
            "| method | score | points |\n|---|---|---|\n| kleinberg | {} | {} |\n| macd | {} | {} |\n\n\
             Ratio (macd/kleinberg): {}, difference {}, methods {verdict}\n",
            fmt_score(cmp.kleinberg.dynamic_score),
            cmp.kleinberg.point_count,
            fmt_score(cmp.macd.dynamic_score),
            cmp.macd.point_count,
            fmt_score(cmp.score_ratio),
            fmt_score(cmp.score_difference)
        ),
    );
    Ok(ExitCode::Success)
}

fn run_windows(inv: &Invocation, args: &WindowsArgs) -> Result<ExitCode, Error> {
    let store = open_store(inv)?;
    let ids: Vec<EntityId> = args.ids.iter().copied().map(EntityId).collect();
    let agg = aggregate_by_window(
        &store,
        &ids,
        args.method,
        args.range.start,
        args.range.end,
        args.window_days,
    )?;

    let mut md = String::from("| start | end | total | points | entities |\n|---|---|---|---|---|\n");
    for w in &agg.windows {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            w.window_start,
            w.window_end,
            fmt_score(w.total_contribution),
            w.point_count,
            w.unique_entities
        ));
    }
    let peak = agg
        .peak_window
        .as_ref()
        .map(|w| format!("peak {}..{}", w.window_start, w.window_end))
        .unwrap_or_else(|| "no data".to_string());
    emit(
        inv,
        json!({ "status": "ok", "aggregation": agg }),
        format!("{} windows, {peak}", agg.total_windows),
        md,
    );
    Ok(ExitCode::Success)
}

fn run_points(inv: &Invocation, args: &PointsArgs) -> Result<ExitCode, Error> {
    let store = open_store(inv)?;
    let id = resolve_entity(&store, &args.entity)?;
    let mut filter = PointFilter::new(args.method).entity(id);
    filter.start = args.start;
    filter.end = args.end;
    filter.min_contribution = args.min_contribution;
    let points = store.points(&filter)?;

    if inv.global.format == OutputFormat::Jsonl {
        for p in &points {
            println!("{}", serde_json::to_string(p)?);
        }
        return Ok(ExitCode::Success);
    }

    let mut md = String::from("| date | contribution | raw | baseline |\n|---|---|---|---|\n");
    for p in &points {
        md.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            p.date,
            fmt_score(p.contribution),
            p.raw_value,
            fmt_score(p.baseline_value)
        ));
    }
    emit(
        inv,
        json!({ "status": "ok", "entity_id": id, "method": args.method, "points": points }),
        format!("{} points for entity {id}", points.len()),
        md,
    );
    Ok(ExitCode::Success)
}

fn run_export(inv: &Invocation, args: &ExportArgs) -> Result<ExitCode, Error> {
    let store = open_store(inv)?;
    let mut files = Vec::new();
    for method in args.method.methods() {
        let (path, rows) = export_leaderboard_file(&store, method, &args.out_dir)?;
        bd_core::log_event!(
            inv.log,
            INFO,
            event_names::EXPORT_WRITTEN,
            Stage::Export,
            "leaderboard exported",
            method = method.as_str(),
            rows = rows as u64
        );
        files.push(json!({ "method": method, "path": path.display().to_string(), "rows": rows }));
    }
    let lines: Vec<String> = files
        .iter()
        .map(|f| format!("{} ({} rows)", f["path"].as_str().unwrap_or_default(), f["rows"]))
        .collect();
    emit(
        inv,
        json!({ "status": "ok", "files": files }),
        format!("exported {}", lines.join(", ")),
        lines.iter().map(|l| format!("- {l}\n")).collect(),
    );
    Ok(ExitCode::Success)
}

fn run_clear(inv: &Invocation, args: &ClearArgs) -> Result<ExitCode, Error> {
    let mut store = open_store(inv)?;
    let mut cleared = Vec::new();
    for method in args.method.methods() {
        let counts = store.clear_method(method)?;
        cleared.push(json!({ "method": method, "summaries": counts.summaries, "points": counts.points }));
    }
    let text: Vec<String> = cleared
        .iter()
        .map(|c| {
            format!(
                "{}: {} summaries, {} points",
                c["method"].as_str().unwrap_or_default(),
                c["summaries"],
                c["points"]
            )
        })
        .collect();
    emit(
        inv,
        json!({ "status": "ok", "cleared": cleared }),
        format!("cleared {}", text.join("; ")),
        text.iter().map(|l| format!("- {l}\n")).collect(),
    );
    Ok(ExitCode::Success)
}

fn check_input(path: &Path) -> Value {
    let source = CsvMatrixSource::new(path);
    let info = source.info();
    match source.load() {
        Ok(m) => json!({
            "ok": true,
            "info": info,
            "entities": m.len(),
            "periods": m.n_periods(),
            "first_period": m.dates().first(),
            "last_period": m.dates().last(),
        }),
        Err(e) => json!({ "ok": false, "info": info, "error": StructuredError::from(&e) }),
    }
}

fn run_check(inv: &Invocation) -> Result<ExitCode, Error> {
    let loaded = load_detect_config(inv)?;
    let input = inv.global.input.as_deref().map(check_input);
    let input_ok = input
        .as_ref()
        .is_none_or(|v| v["ok"].as_bool().unwrap_or(false));

    let code = if input_ok {
        ExitCode::Success
    } else {
        ExitCode::InputError
    };
    let source = loaded
        .snapshot
        .config_path
        .clone()
        .unwrap_or_else(|| "built-in defaults".to_string());
    emit(
        inv,
        json!({
            "status": if input_ok { "ok" } else { "error" },
            "config": loaded.snapshot,
            "effective": loaded.config,
            "input": input,
        }),
        format!(
            "config ok ({source}), input {}",
            match &input {
                Some(_) if input_ok => "ok",
                Some(_) => "invalid",
                None => "not checked",
            }
        ),
        format!(
            "- Config: {source}\n- Effective hash: {}\n- Input: {}\n",
            loaded.snapshot.effective_hash,
            match &input {
                Some(v) => v.to_string(),
                None => "not checked".to_string(),
            }
        ),
    );
    Ok(code)
}

fn print_version(inv: &Invocation) {
    emit(
        inv,
        json!({
            "bd_version": env!("CARGO_PKG_VERSION"),
            "rust_version": env!("CARGO_PKG_RUST_VERSION"),
        }),
        format!("bd {}", env!("CARGO_PKG_VERSION")),
        format!(
            "- Version: {}\n- Schema version: {}\n",
            env!("CARGO_PKG_VERSION"),
            SCHEMA_VERSION
        ),
    );
}
