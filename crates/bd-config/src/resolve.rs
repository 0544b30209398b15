//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG path →
//! system path → built-in defaults.

use std::path::{Path, PathBuf};

use crate::detect::DetectConfig;
use crate::snapshot::ConfigSnapshot;
use crate::validate::{ValidationError, ValidationResult};

/// Where the configuration file was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Found in /etc/burst-detect/.
    SystemConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Environment variable names.
pub const ENV_CONFIG_PATH: &str = "BD_CONFIG";
pub const ENV_CONFIG_DIR: &str = "BD_CONFIG_DIR";

/// Standard config file name.
const CONFIG_FILENAME: &str = "config.json";

/// Application name for XDG directories.
const APP_NAME: &str = "burst-detect";

/// A resolved config path (or none) with its provenance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPath {
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

/// Resolve the configuration path.
///
/// 1. Explicit CLI path (if it exists)
/// 2. `BD_CONFIG` (direct path)
/// 3. `BD_CONFIG_DIR` + `config.json`
/// 4. XDG config directory (`~/.config/burst-detect/`)
/// 5. System config (`/etc/burst-detect/`)
/// 6. Built-in defaults (None)
pub fn resolve_config(cli_path: Option<&Path>) -> ResolvedPath {
    let found = |path: PathBuf, source| ResolvedPath {
        path: Some(path),
        source,
    };

    if let Some(path) = cli_path {
        if path.exists() {
            return found(path.to_path_buf(), ConfigSource::CliArgument);
        }
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(CONFIG_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    if let Some(xdg_config) = dirs::config_dir() {
        let path = xdg_config.join(APP_NAME).join(CONFIG_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::XdgConfig);
        }
    }

    let system_path = system_config_dir().join(CONFIG_FILENAME);
    if system_path.exists() {
        return found(system_path, ConfigSource::SystemConfig);
    }

    ResolvedPath::default()
}

/// Get the XDG config directory for burst-detect.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Get the system config directory.
pub fn system_config_dir() -> PathBuf {
    PathBuf::from("/etc").join(APP_NAME)
}

/// A validated configuration and the snapshot describing where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: DetectConfig,
    pub snapshot: ConfigSnapshot,
}

/// Resolve, read, parse, and validate the configuration.
///
/// A CLI path that does not exist is an error rather than a silent fallback.
pub fn load_config(cli_path: Option<&Path>) -> ValidationResult<LoadedConfig> {
    if let Some(path) = cli_path {
        if !path.exists() {
            return Err(ValidationError::IoError(format!(
                "config file not found: {}",
                path.display()
            )));
        }
    }

    let resolved = resolve_config(cli_path);
    match &resolved.path {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| {
                ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let config = DetectConfig::parse(&content)?;
            let snapshot = ConfigSnapshot::new(&config, &resolved, Some(&content));
            Ok(LoadedConfig { config, snapshot })
        }
        None => {
            let config = DetectConfig::default();
            let snapshot = ConfigSnapshot::defaults_only(&config);
            Ok(LoadedConfig { config, snapshot })
        }
    }
}
