//! Event vocabulary for structured logs.
//!
//! Every event carries the invocation's `run_id` and the pipeline stage it
//! was emitted from, so a JSONL stream can be filtered per run and per stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Reading the input matrix.
    Load,
    /// Running a detector over entity chunks.
    Detect,
    /// Writing buffered rows to the sink.
    Flush,
    /// Rank assignment after a method completes.
    Rank,
    /// Read-side commands.
    Query,
    /// Leaderboard export.
    Export,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Init => "init",
            Stage::Load => "load",
            Stage::Detect => "detect",
            Stage::Flush => "flush",
            Stage::Rank => "rank",
            Stage::Query => "query",
            Stage::Export => "export",
        })
    }
}

/// Stable event names; used as the tracing target.
pub mod event_names {
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_ERROR: &str = "config.error";

    pub const MATRIX_LOADED: &str = "matrix.loaded";
    pub const MATRIX_MISSING: &str = "matrix.missing";

    pub const METHOD_SKIPPED: &str = "detect.already_present";
    pub const METHOD_CLEARED: &str = "detect.cleared";
    pub const METHOD_STARTED: &str = "detect.started";
    pub const CHUNK_DONE: &str = "detect.chunk_done";
    pub const ENTITIES_UNRESOLVED: &str = "detect.unresolved";
    pub const METHOD_FINISHED: &str = "detect.finished";
    pub const METHOD_FAILED: &str = "detect.failed";

    pub const BUFFER_FLUSHED: &str = "flush.done";
    pub const RANKS_ASSIGNED: &str = "rank.assigned";

    pub const EXPORT_WRITTEN: &str = "export.written";

    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// One JSONL log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: DateTime<Utc>,
    pub level: Level,
    /// Event name, e.g. `detect.finished`.
    pub event: String,
    pub run_id: String,
    pub stage: Stage,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogEvent {
    pub fn new(
        level: Level,
        event: impl Into<String>,
        run_id: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> Self {
        LogEvent {
            ts: Utc::now(),
            level,
            event: event.into(),
            run_id: run_id.into(),
            stage,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.into(), v);
        }
        self
    }

    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"serialization_failed","event":"{}"}}"#,
                self.event
            )
        })
    }
}

/// Correlation context threaded through one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    pub run_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
        }
    }

    pub fn event(
        &self,
        level: Level,
        event: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> LogEvent {
        LogEvent::new(level, event, &self.run_id, stage, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_jsonl_shape() {
        let event = LogContext::new("run-0123456789ab")
            .event(
                Level::Info,
                event_names::METHOD_FINISHED,
                Stage::Detect,
                "kleinberg finished",
            )
            .with_field("summaries_written", 42);

        let json: serde_json::Value = serde_json::from_str(&event.to_jsonl()).unwrap();
        assert_eq!(json["event"], "detect.finished");
        assert_eq!(json["level"], "info");
        assert_eq!(json["stage"], "detect");
        assert_eq!(json["run_id"], "run-0123456789ab");
        assert_eq!(json["fields"]["summaries_written"], 42);
    }

    #[test]
    fn test_empty_fields_omitted() {
        let event = LogEvent::new(Level::Warn, "x", "run-1", Stage::Load, "m");
        assert!(!event.to_jsonl().contains("fields"));
    }

    #[test]
    fn test_stage_display_matches_serde() {
        for stage in [Stage::Init, Stage::Flush, Stage::Rank, Stage::Export] {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{stage}\""));
        }
    }
}
