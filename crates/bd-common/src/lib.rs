//! Burst detection common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the bd-* crates:
//! - Entity identity (`EntityKey` -> `EntityId`) and the per-run lookup index
//! - Detection methods and their parameters
//! - Summary and per-period point record shapes
//! - The sink, query, and registry contracts the orchestrator writes through
//! - Common error types and output formats

pub mod error;
pub mod id;
pub mod method;
pub mod output;
pub mod record;
pub mod sink;

pub use error::{format_error_human, Error, ErrorCategory, Result, StructuredError};
pub use id::{EntityId, EntityIndex, EntityKey};
pub use method::{DenominatorMode, KleinbergParams, MacdParams, Method, MethodParams};
pub use output::OutputFormat;
pub use record::{
    DateInterval, DetectionSummary, KleinbergPoint, LeaderboardEntry, MacdPoint, PointDetail,
    PointRecord,
};
pub use sink::{
    DetectionStatus, EntityRegistry, MethodCounts, PointFilter, ResultQuery, ResultSink,
};

/// Schema version stamped on JSON payloads and the config file.
pub const SCHEMA_VERSION: &str = "1.0.0";
