//! Typed `config.json`.
//!
//! Every section is optional in the file; missing sections and fields take
//! their defaults.

use bd_common::{KleinbergParams, MacdParams, Method};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::validate::{ValidationError, ValidationResult};

/// Flush thresholds of the two output buffers of one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSettings {
    pub summary_rows: usize,
    pub point_rows: usize,
}

impl BufferSettings {
    pub fn for_method(method: Method) -> Self {
        match method {
            Method::Kleinberg => BufferSettings {
                summary_rows: 50_000,
                point_rows: 500_000,
            },
            Method::Macd => BufferSettings {
                summary_rows: 200_000,
                point_rows: 500_000,
            },
        }
    }
}

fn kleinberg_buffers() -> BufferSettings {
    BufferSettings::for_method(Method::Kleinberg)
}

fn macd_buffers() -> BufferSettings {
    BufferSettings::for_method(Method::Macd)
}

fn default_chunk_size() -> usize {
    4000
}

/// Orchestrator tuning. None of it changes detector output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Entities per chunk; cancellation and deadlines are checked between chunks.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Worker threads per chunk. 0 uses the available parallelism.
    #[serde(default)]
    pub max_parallel: usize,

    #[serde(default = "kleinberg_buffers")]
    pub kleinberg_buffers: BufferSettings,

    #[serde(default = "macd_buffers")]
    pub macd_buffers: BufferSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        OrchestratorSettings {
            chunk_size: default_chunk_size(),
            max_parallel: 0,
            kleinberg_buffers: kleinberg_buffers(),
            macd_buffers: macd_buffers(),
        }
    }
}

impl OrchestratorSettings {
    pub fn buffers(&self, method: Method) -> BufferSettings {
        match method {
            Method::Kleinberg => self.kleinberg_buffers,
            Method::Macd => self.macd_buffers,
        }
    }

    /// `max_parallel` with 0 resolved against the host.
    pub fn effective_parallelism(&self) -> usize {
        if self.max_parallel > 0 {
            return self.max_parallel;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

fn default_schema_version() -> String {
    crate::CONFIG_SCHEMA_VERSION.to_string()
}

/// Complete detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    #[serde(default)]
    pub kleinberg: KleinbergParams,

    #[serde(default)]
    pub macd: MacdParams,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
}

impl Default for DetectConfig {
    fn default() -> Self {
        DetectConfig {
            schema_version: default_schema_version(),
            kleinberg: KleinbergParams::default(),
            macd: MacdParams::default(),
            orchestrator: OrchestratorSettings::default(),
        }
    }
}

impl DetectConfig {
    /// Load and validate from a file path.
    pub fn from_file(path: &Path) -> ValidationResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse and validate a JSON string.
    pub fn parse(json: &str) -> ValidationResult<Self> {
        let config: DetectConfig =
            serde_json::from_str(json).map_err(|e| ValidationError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ValidationResult<()> {
        crate::validate::validate_config(self)
    }
}
