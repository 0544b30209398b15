//! Burst detection engine.
//!
//! Two detectors score every entity of a count matrix: a two-state Kleinberg
//! automaton ([`kleinberg`]) and an EMA momentum histogram ([`macd`]). The
//! [`orchestrator`] runs them over the whole entity set and streams results
//! into a [`bd_common::ResultSink`]; [`analysis`] reads them back.

pub mod analysis;
pub mod exit_codes;
pub mod kleinberg;
pub mod logging;
pub mod macd;
pub mod matrix;
pub mod orchestrator;

pub use kleinberg::{BurstInterval, KleinbergDetector, KleinbergResult};
pub use macd::{MacdDetector, MacdResult};
pub use matrix::{parse_matrix, CsvMatrixSource, MatrixInfo, MatrixRow, MatrixSource, TimeSeriesMatrix};
pub use orchestrator::{BurstOrchestrator, Deadline, MethodOutcome, OutcomeStatus, RunOptions};
