//! Burst detection configuration loading and validation.
//!
//! This crate provides:
//! - Typed config for detector parameters and orchestrator tuning
//! - Config resolution (CLI → env → XDG → /etc → defaults)
//! - Semantic validation
//! - Config snapshots recorded with each run

pub mod detect;
pub mod resolve;
pub mod snapshot;
pub mod validate;

pub use detect::{BufferSettings, DetectConfig, OrchestratorSettings};
pub use resolve::{load_config, resolve_config, ConfigSource, LoadedConfig, ResolvedPath};
pub use snapshot::ConfigSnapshot;
pub use validate::{validate_config, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
