//! Configuration validation errors and semantic validation.

use bd_common::{DenominatorMode, KleinbergParams, MacdParams};
use thiserror::Error;

use crate::detect::{BufferSettings, DetectConfig, OrchestratorSettings};

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

impl From<ValidationError> for bd_common::Error {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::InvalidValue { field, message } => {
                bd_common::Error::InvalidParameter { field, message }
            }
            other => bd_common::Error::Config(other.to_string()),
        }
    }
}

fn invalid(field: &str, message: String) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message,
    }
}

/// Validate a whole config semantically.
pub fn validate_config(config: &DetectConfig) -> ValidationResult<()> {
    if config.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version.clone(),
        });
    }
    validate_kleinberg(&config.kleinberg)?;
    validate_macd(&config.macd)?;
    validate_orchestrator(&config.orchestrator)?;
    Ok(())
}

/// Validate Kleinberg parameters.
pub fn validate_kleinberg(params: &KleinbergParams) -> ValidationResult<()> {
    if !params.s.is_finite() || params.s <= 1.0 {
        return Err(invalid(
            "kleinberg.s",
            format!("Must be a finite value > 1, got {}", params.s),
        ));
    }
    if !params.gamma.is_finite() || params.gamma < 0.0 {
        return Err(invalid(
            "kleinberg.gamma",
            format!("Must be a finite value >= 0, got {}", params.gamma),
        ));
    }
    if params.smoothing_window < 1 {
        return Err(invalid(
            "kleinberg.smoothing_window",
            "Must be >= 1".to_string(),
        ));
    }
    Ok(())
}

/// Validate MACD parameters.
pub fn validate_macd(params: &MacdParams) -> ValidationResult<()> {
    for (field, span) in [
        ("macd.short_span", params.short_span),
        ("macd.long_span", params.long_span),
        ("macd.signal_span", params.signal_span),
    ] {
        if span < 1 {
            return Err(invalid(field, "Must be >= 1".to_string()));
        }
    }
    if params.short_span >= params.long_span {
        return Err(invalid(
            "macd.short_span",
            format!(
                "Must be < long_span ({}), got {}",
                params.long_span, params.short_span
            ),
        ));
    }
    if params.denominator_mode == DenominatorMode::SqrtPercentile {
        let pct = params.denominator_percentile;
        if !(pct > 0.0 && pct <= 100.0) {
            return Err(invalid(
                "macd.denominator_percentile",
                format!("Must be in (0, 100], got {pct}"),
            ));
        }
    }
    Ok(())
}

fn validate_buffers(prefix: &str, buffers: &BufferSettings) -> ValidationResult<()> {
    if buffers.summary_rows < 1 {
        return Err(invalid(
            &format!("{prefix}.summary_rows"),
            "Must be >= 1".to_string(),
        ));
    }
    if buffers.point_rows < 1 {
        return Err(invalid(
            &format!("{prefix}.point_rows"),
            "Must be >= 1".to_string(),
        ));
    }
    Ok(())
}

/// Validate orchestrator settings.
pub fn validate_orchestrator(settings: &OrchestratorSettings) -> ValidationResult<()> {
    if settings.chunk_size < 1 {
        return Err(invalid(
            "orchestrator.chunk_size",
            "Must be >= 1".to_string(),
        ));
    }
    validate_buffers("orchestrator.kleinberg_buffers", &settings.kleinberg_buffers)?;
    validate_buffers("orchestrator.macd_buffers", &settings.macd_buffers)?;
    Ok(())
}
