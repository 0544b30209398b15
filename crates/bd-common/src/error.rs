//! Error types for burst detection.
//!
//! Errors carry:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for automation
//! - Remediation suggestions for humans
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Sink Write Failed
//!   Reason: sink write failed: disk I/O error
//!   Fix: Clear the method with 'bd clear <method>' or rerun with '--force-rerun'.
//! ```
//!
//! # Agent-Facing Output
//!
//! ```json
//! {
//!   "code": 30,
//!   "category": "storage",
//!   "kind": "sink_write",
//!   "message": "sink write failed: disk I/O error",
//!   "recoverable": true
//! }
//! ```
//!
//! Per-entity numeric trouble (zero totals, degenerate probabilities, zero
//! denominators) is absorbed inside the detectors and never becomes an
//! [`Error`]. Only whole-run conditions surface here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::id::EntityId;
use crate::method::Method;

/// Result type alias for burst detection operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file and parameter errors.
    Config,
    /// Input matrix availability and format errors.
    Input,
    /// Result store errors.
    Storage,
    /// Run control (cancellation, deadlines).
    Run,
    /// Analysis query errors.
    Query,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Input => write!(f, "input"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Run => write!(f, "run"),
            ErrorCategory::Query => write!(f, "query"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for burst detection.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid parameter {field}: {message}")]
    InvalidParameter { field: String, message: String },

    // Input errors (20-29)
    #[error("missing input data: {0}")]
    MissingInputData(String),

    #[error("invalid input matrix: {0}")]
    InvalidMatrix(String),

    // Storage errors (30-39)
    #[error("sink write failed: {0}")]
    SinkWrite(String),

    #[error("store query failed: {0}")]
    StoreRead(String),

    // Run control errors (40-49)
    #[error("{method} run cancelled")]
    Cancelled { method: Method },

    #[error("{method} run exceeded deadline of {seconds}s")]
    Timeout { method: Method, seconds: u64 },

    // Query errors (50-59)
    #[error("entity {entity_id} not found")]
    EntityNotFound { entity_id: EntityId },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Input errors
    /// - 30-39: Storage errors
    /// - 40-49: Run control errors
    /// - 50-59: Query errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidParameter { .. } => 11,
            Error::MissingInputData(_) => 20,
            Error::InvalidMatrix(_) => 21,
            Error::SinkWrite(_) => 30,
            Error::StoreRead(_) => 31,
            Error::Cancelled { .. } => 40,
            Error::Timeout { .. } => 41,
            Error::EntityNotFound { .. } => 50,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidParameter { .. } => ErrorCategory::Config,
            Error::MissingInputData(_) | Error::InvalidMatrix(_) => ErrorCategory::Input,
            Error::SinkWrite(_) | Error::StoreRead(_) => ErrorCategory::Storage,
            Error::Cancelled { .. } | Error::Timeout { .. } => ErrorCategory::Run,
            Error::EntityNotFound { .. } => ErrorCategory::Query,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Stable snake_case name used in run outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::InvalidParameter { .. } => "invalid_parameter",
            Error::MissingInputData(_) => "missing_input_data",
            Error::InvalidMatrix(_) => "invalid_matrix",
            Error::SinkWrite(_) => "sink_write",
            Error::StoreRead(_) => "store_read",
            Error::Cancelled { .. } => "cancelled",
            Error::Timeout { .. } => "timeout",
            Error::EntityNotFound { .. } => "entity_not_found",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }

    /// Returns whether this error is potentially recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) | Error::InvalidParameter { .. } => true,

            // Needs the upstream preprocessing step, not a retry
            Error::MissingInputData(_) => false,
            Error::InvalidMatrix(_) => false,

            // Retry after clearing the method
            Error::SinkWrite(_) => true,
            Error::StoreRead(_) => true,

            Error::Cancelled { .. } => true,
            Error::Timeout { .. } => true,

            Error::EntityNotFound { .. } => false,

            Error::Io(_) => true,
            Error::Json(_) => true,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => {
                "Run 'bd check' to validate configuration, or check syntax in config.json."
            }
            Error::InvalidParameter { .. } => {
                "Adjust the parameter in config.json or on the command line. See 'bd check'."
            }
            Error::MissingInputData(_) => {
                "Provide an input matrix with '--input' or run the preprocessing step first."
            }
            Error::InvalidMatrix(_) => {
                "The input matrix needs n-gram, domain, field, subfield columns and ISO-dated period columns."
            }
            Error::SinkWrite(_) => {
                "Clear the method with 'bd clear <method>' or rerun with '--force-rerun'."
            }
            Error::StoreRead(_) => "Check that the database path exists and is readable.",
            Error::Cancelled { .. } => {
                "The run was interrupted. Committed flushes remain; rerun with '--force-rerun'."
            }
            Error::Timeout { .. } => {
                "Increase '--timeout' or raise orchestrator.max_parallel, then rerun with '--force-rerun'."
            }
            Error::EntityNotFound { .. } => {
                "List known entities with 'bd summary' or register them with 'bd register'."
            }
            Error::Io(_) => "Check disk space, permissions, and that directories exist.",
            Error::Json(_) => "Invalid JSON. Check syntax with 'jq .' or restore from backup.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidParameter { .. } => "Invalid Parameter",
            Error::MissingInputData(_) => "Missing Input Data",
            Error::InvalidMatrix(_) => "Invalid Input Matrix",
            Error::SinkWrite(_) => "Sink Write Failed",
            Error::StoreRead(_) => "Store Query Failed",
            Error::Cancelled { .. } => "Run Cancelled",
            Error::Timeout { .. } => "Run Timeout",
            Error::EntityNotFound { .. } => "Entity Not Found",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Stable snake_case kind.
    pub kind: String,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Additional structured context (method, entity id, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::InvalidParameter { field, .. } => {
                context.insert("field".to_string(), serde_json::json!(field));
            }
            Error::Cancelled { method } => {
                context.insert("method".to_string(), serde_json::json!(method));
            }
            Error::Timeout { method, seconds } => {
                context.insert("method".to_string(), serde_json::json!(method));
                context.insert("timeout_seconds".to_string(), serde_json::json!(seconds));
            }
            Error::EntityNotFound { entity_id } => {
                context.insert("entity_id".to_string(), serde_json::json!(entity_id));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            kind: err.kind().to_string(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            context,
        }
    }
}

impl StructuredError {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}

/// Format an error for human-readable stderr output.
///
/// ```text
/// ✗ [Headline]
///   Reason: [Error message]
///   Fix: [Remediation hint]
/// ```
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, cyan, reset) = if use_color {
        ("\x1b[31m", "\x1b[36m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}\n  {cyan}Fix:{reset} {remediation}",
        headline = err.headline(),
        message = err,
        remediation = err.remediation()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(Error::Config("test".into()).code(), 10);
        assert_eq!(Error::MissingInputData("none".into()).code(), 20);
        assert_eq!(Error::SinkWrite("disk".into()).code(), 30);
        assert_eq!(
            Error::Timeout {
                method: Method::Macd,
                seconds: 5
            }
            .code(),
            41
        );
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            Error::InvalidMatrix("x".into()).category(),
            ErrorCategory::Input
        );
        assert_eq!(
            Error::StoreRead("x".into()).category(),
            ErrorCategory::Storage
        );
        assert_eq!(
            Error::Cancelled {
                method: Method::Kleinberg
            }
            .category(),
            ErrorCategory::Run
        );
    }

    #[test]
    fn test_codes_unique() {
        let errors = [
            Error::Config(String::new()),
            Error::InvalidParameter {
                field: String::new(),
                message: String::new(),
            },
            Error::MissingInputData(String::new()),
            Error::InvalidMatrix(String::new()),
            Error::SinkWrite(String::new()),
            Error::StoreRead(String::new()),
            Error::Cancelled {
                method: Method::Kleinberg,
            },
            Error::Timeout {
                method: Method::Kleinberg,
                seconds: 1,
            },
            Error::EntityNotFound {
                entity_id: EntityId(1),
            },
        ];
        let mut codes: Vec<u32> = errors.iter().map(Error::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_structured_error_context() {
        let err = Error::EntityNotFound {
            entity_id: EntityId(42),
        };
        let structured = StructuredError::from(&err);
        assert_eq!(structured.code, 50);
        assert_eq!(structured.kind, "entity_not_found");
        assert!(!structured.recoverable);
        assert_eq!(structured.context["entity_id"], serde_json::json!(42));

        let json = structured.to_json();
        assert!(json.contains("\"category\":\"query\""));
    }

    #[test]
    fn test_format_error_human_plain() {
        let err = Error::SinkWrite("disk full".into());
        let text = format_error_human(&err, false);
        assert!(text.starts_with("✗ Sink Write Failed"));
        assert!(text.contains("Reason: sink write failed: disk full"));
        assert!(text.contains("--force-rerun"));
    }
}
