//! Process exit codes for the `bd` CLI.
//!
//! Ranges:
//! - 0-9: outcomes (the run did what it could)
//! - 10-19: user or input errors, fixable by the caller
//! - 20-29: internal, storage, or run-control failures

use bd_common::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Everything requested completed (or was already present).
    Success = 0,
    /// At least one method failed while another succeeded.
    PartialFailure = 1,

    /// Invalid arguments or parameters.
    ArgsError = 10,
    /// Config file unreadable or invalid.
    ConfigError = 11,
    /// Input matrix missing or malformed.
    InputError = 12,
    /// Requested entity or rows do not exist.
    NotFound = 13,

    /// Bug; please report.
    InternalError = 20,
    IoError = 21,
    /// Result store failure.
    StorageError = 22,
    /// Deadline passed before the run finished.
    TimeoutError = 23,
    /// Cancelled before the run finished.
    Cancelled = 24,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Success
    }

    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Stable name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Success => "OK",
            ExitCode::PartialFailure => "ERR_PARTIAL",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::InputError => "ERR_INPUT",
            ExitCode::NotFound => "ERR_NOT_FOUND",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
            ExitCode::StorageError => "ERR_STORAGE",
            ExitCode::TimeoutError => "ERR_TIMEOUT",
            ExitCode::Cancelled => "ERR_CANCELLED",
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code.as_i32()
    }
}

impl ExitCode {
    /// Map a stable error kind (see [`Error::kind`]) to an exit code.
    pub fn from_error_kind(kind: &str) -> Self {
        match kind {
            "config" => ExitCode::ConfigError,
            "invalid_parameter" => ExitCode::ArgsError,
            "missing_input_data" | "invalid_matrix" => ExitCode::InputError,
            "sink_write" | "store_read" => ExitCode::StorageError,
            "cancelled" => ExitCode::Cancelled,
            "timeout" => ExitCode::TimeoutError,
            "entity_not_found" => ExitCode::NotFound,
            "io" => ExitCode::IoError,
            _ => ExitCode::InternalError,
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        ExitCode::from_error_kind(err.kind())
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
