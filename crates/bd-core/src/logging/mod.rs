//! Structured logging.
//!
//! Human-readable lines or JSONL, both on stderr; stdout carries only
//! command payloads. Events name themselves through the tracing target
//! (see [`event_names`]) and carry the invocation's `run_id` and a [`Stage`].
//!
//! ```ignore
//! let ctx = LogContext::new(generate_run_id());
//! log_event!(ctx, INFO, event_names::METHOD_STARTED, Stage::Detect,
//!     "starting kleinberg", entities = 1200u64);
//! ```

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level, LogContext, LogEvent, Stage};
pub use layer::JsonlLayer;

use std::io::IsTerminal;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn filter_for(config: &LogConfig) -> EnvFilter {
    if std::env::var(config::ENV_LOG_LEVEL).is_err() {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
    }
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from(config.level).into())
        .parse_lossy("")
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(config: &LogConfig) {
    let filter = filter_for(config);
    let result = match config.format {
        LogFormat::Human => {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(std::io::stderr().is_terminal());
            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.without_time())
                    .try_init()
            }
        }
        LogFormat::Jsonl => tracing_subscriber::registry()
            .with(filter)
            .with(JsonlLayer::stderr())
            .try_init(),
    };
    let _ = result;
}

/// `run-` followed by 12 hex characters.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &uuid[..12])
}

/// Emit an event with the context's run id and a stage.
#[macro_export]
macro_rules! log_event {
    ($ctx:expr, INFO, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::info!(target: $event, run_id = %$ctx.run_id, stage = %$stage,
            $($key = $val,)* message = $msg)
    };
    ($ctx:expr, DEBUG, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::debug!(target: $event, run_id = %$ctx.run_id, stage = %$stage,
            $($key = $val,)* message = $msg)
    };
    ($ctx:expr, WARN, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::warn!(target: $event, run_id = %$ctx.run_id, stage = %$stage,
            $($key = $val,)* message = $msg)
    };
    ($ctx:expr, ERROR, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::error!(target: $event, run_id = %$ctx.run_id, stage = %$stage,
            $($key = $val,)* message = $msg)
    };
}
