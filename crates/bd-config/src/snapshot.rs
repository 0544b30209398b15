//! Configuration snapshots for run reports and reproducibility.
//!
//! A snapshot captures the configuration in effect when a run starts so a
//! stored result set can be traced back to the parameters that produced it.

use bd_common::DenominatorMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::detect::DetectConfig;
use crate::resolve::{ConfigSource, ResolvedPath};

/// A frozen snapshot of configuration state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// When this snapshot was taken.
    pub timestamp: DateTime<Utc>,

    /// Schema version of the configuration.
    pub schema_version: String,

    /// SHA-256 of the config file content, if a file was read.
    #[serde(default)]
    pub config_hash: Option<String>,

    /// Path the config was loaded from.
    #[serde(default)]
    pub config_path: Option<String>,

    /// Source of the configuration.
    pub config_source: String,

    /// SHA-256 of the effective (parsed, defaulted) configuration.
    pub effective_hash: String,

    /// Key configuration values for quick reference.
    pub summary: ConfigSummary,
}

/// Summary of key configuration values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub kleinberg_s: f64,
    pub kleinberg_gamma: f64,
    pub smoothing_window: usize,
    /// short, long, signal
    pub macd_spans: [usize; 3],
    pub denominator_mode: DenominatorMode,
    pub chunk_size: usize,
    pub max_parallel: usize,
}

impl ConfigSummary {
    fn of(config: &DetectConfig) -> Self {
        ConfigSummary {
            kleinberg_s: config.kleinberg.s,
            kleinberg_gamma: config.kleinberg.gamma,
            smoothing_window: config.kleinberg.smoothing_window,
            macd_spans: [
                config.macd.short_span,
                config.macd.long_span,
                config.macd.signal_span,
            ],
            denominator_mode: config.macd.denominator_mode,
            chunk_size: config.orchestrator.chunk_size,
            max_parallel: config.orchestrator.max_parallel,
        }
    }
}

impl ConfigSnapshot {
    /// Create a snapshot for a config loaded from `resolved`.
    pub fn new(config: &DetectConfig, resolved: &ResolvedPath, content: Option<&str>) -> Self {
        ConfigSnapshot {
            timestamp: Utc::now(),
            schema_version: config.schema_version.clone(),
            config_hash: content.map(hash_content),
            config_path: resolved.path.as_ref().map(|p| p.display().to_string()),
            config_source: resolved.source.to_string(),
            effective_hash: effective_hash(config),
            summary: ConfigSummary::of(config),
        }
    }

    /// Create a snapshot when no config file was found.
    pub fn defaults_only(config: &DetectConfig) -> Self {
        ConfigSnapshot {
            timestamp: Utc::now(),
            schema_version: config.schema_version.clone(),
            config_hash: None,
            config_path: None,
            config_source: ConfigSource::BuiltinDefault.to_string(),
            effective_hash: effective_hash(config),
            summary: ConfigSummary::of(config),
        }
    }

    /// Serialize snapshot to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize snapshot from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Check if this snapshot describes the same effective configuration.
    pub fn matches(&self, other: &ConfigSnapshot) -> bool {
        self.effective_hash == other.effective_hash
    }

    /// Get a short identifier for this snapshot (first 12 chars of hash).
    pub fn short_id(&self) -> &str {
        &self.effective_hash[..12.min(self.effective_hash.len())]
    }
}

fn effective_hash(config: &DetectConfig) -> String {
    // Serialization of plain structs cannot fail; fall back to Debug if it ever does.
    let canonical = serde_json::to_string(config).unwrap_or_else(|_| format!("{config:?}"));
    hash_content(&canonical)
}

/// Hash content with SHA-256 and return hex string.
fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
