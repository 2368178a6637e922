//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! Two configuration scopes:
//! - **Global**: user-level settings
//! - **Workspace**: per data directory overrides
//!
//! # Precedence
//!
//! Later overrides earlier:
//! 1. Default values
//! 2. Global config file
//! 3. Workspace config file (`<data_dir>/config.toml`)
//! 4. CLI flags (not handled here)
//!
//! # Global Config Locations
//!
//! Searched in order:
//! 1. `$CASEWORK_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/casework/config.toml`
//! 3. `~/.casework/config.toml` (canonical write location)
//!
//! # Example
//!
//! ```no_run
//! use casework::core::config::Config;
//! use casework::core::paths::DataPaths;
//! use std::path::PathBuf;
//!
//! let paths = DataPaths::new(PathBuf::from("/srv/casework"));
//! let config = Config::load(Some(&paths)).unwrap().config;
//! println!("grace: {}s", config.grace().num_seconds());
//! ```

pub mod schema;

pub use schema::{ConfigFile, ContentConfig};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveTime};
use thiserror::Error;

use crate::core::ops::lease::LeaseConfig;
use crate::core::paths::DataPaths;
use crate::core::types::Language;
use schema::{DAILY_AT_FORMAT, MAX_SECS, MAX_WINDOW_DAYS};

/// Environment variable naming an explicit global config file.
pub const CONFIG_ENV: &str = "CASEWORK_CONFIG";

/// A config value in seconds, clamped to [`MAX_SECS`].
fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_SECS) as i64)
}

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("failed to write config file '{path}': {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("home directory not found")]
    NoHomeDir,
}

/// Warnings generated during config loading.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub path: PathBuf,
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: Config,
    pub warnings: Vec<ConfigWarning>,
}

/// Retry policy for failed synchronizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub retry_interval: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::seconds(30),
            backoff_max: Duration::seconds(3600),
            retry_interval: Duration::seconds(60),
        }
    }
}

/// Merged configuration from all sources.
///
/// Accessors apply precedence: workspace, then global, then default.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub global: ConfigFile,
    pub workspace: Option<ConfigFile>,
    global_path: Option<PathBuf>,
    workspace_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default locations.
    ///
    /// Missing files are not an error; defaults apply.
    pub fn load(paths: Option<&DataPaths>) -> Result<ConfigLoadResult, ConfigError> {
        let mut warnings = Vec::new();
        let global_path = Self::find_global(&mut warnings);
        let mut result = Self::load_from(global_path.as_deref(), paths)?;
        result.warnings.append(&mut warnings);
        Ok(result)
    }

    /// Load with an explicit global file (or none).
    pub fn load_from(
        global: Option<&Path>,
        paths: Option<&DataPaths>,
    ) -> Result<ConfigLoadResult, ConfigError> {
        let (global_file, global_path) = match global {
            Some(path) if path.exists() => (Self::read_file(path)?, Some(path.to_path_buf())),
            _ => (ConfigFile::default(), None),
        };

        let (workspace, workspace_path) = match paths.map(DataPaths::config_path) {
            Some(path) if path.exists() => (Some(Self::read_file(&path)?), Some(path)),
            _ => (None, None),
        };

        global_file.validate()?;
        if let Some(w) = &workspace {
            w.validate()?;
        }

        let config = Config {
            global: global_file,
            workspace,
            global_path,
            workspace_path,
        };
        config.validate()?;

        Ok(ConfigLoadResult {
            config,
            warnings: Vec::new(),
        })
    }

    fn find_global(warnings: &mut Vec<ConfigWarning>) -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            warnings.push(ConfigWarning {
                message: format!("{} points to a missing file; ignoring it", CONFIG_ENV),
                path,
            });
        }

        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("casework/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        dirs::home_dir()
            .map(|home| home.join(".casework/config.toml"))
            .filter(|path| path.exists())
    }

    fn read_file(path: &Path) -> Result<ConfigFile, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Checks on the merged view.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl() > self.max_ttl() {
            return Err(ConfigError::InvalidValue(format!(
                "locks.default_ttl_secs ({}) exceeds locks.max_ttl_secs ({})",
                self.default_ttl().num_seconds(),
                self.max_ttl().num_seconds()
            )));
        }
        let policy = self.sync_policy();
        if policy.backoff_max < policy.backoff_base {
            return Err(ConfigError::InvalidValue(
                "sync.backoff_max_secs is below sync.backoff_base_secs".into(),
            ));
        }
        Ok(())
    }

    /// Get the canonical path for global config.
    pub fn global_config_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".casework/config.toml"))
    }

    /// Write workspace config atomically.
    pub fn write_workspace(paths: &DataPaths, config: &ConfigFile) -> Result<PathBuf, ConfigError> {
        config.validate()?;
        let path = paths.config_path();
        Self::write_config_atomic(&path, config)?;
        Ok(path)
    }

    /// Write a config file via temp file, fsync, rename.
    fn write_config_atomic(path: &Path, config: &ConfigFile) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let contents =
            toml::to_string_pretty(config).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        let temp_path = path.with_extension("toml.tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;
        file.write_all(contents.as_bytes())
            .map_err(|e| ConfigError::WriteError {
                path: temp_path.clone(),
                source: e,
            })?;
        file.sync_all().map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;

        fs::rename(&temp_path, path).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    // =========================================================================
    // Accessor methods with precedence
    // =========================================================================

    /// First value found in workspace, then global.
    fn pick<T>(&self, get: impl Fn(&ConfigFile) -> Option<T>) -> Option<T> {
        self.workspace
            .as_ref()
            .and_then(&get)
            .or_else(|| get(&self.global))
    }

    /// Lease grace window. Defaults to 5 seconds.
    pub fn grace(&self) -> Duration {
        let secs = self
            .pick(|c| c.locks.as_ref().and_then(|l| l.grace_secs))
            .unwrap_or(5);
        seconds(secs)
    }

    /// Defaults to 300 seconds.
    pub fn default_ttl(&self) -> Duration {
        let secs = self
            .pick(|c| c.locks.as_ref().and_then(|l| l.default_ttl_secs))
            .unwrap_or(300);
        seconds(secs)
    }

    /// Defaults to 3600 seconds.
    pub fn max_ttl(&self) -> Duration {
        let secs = self
            .pick(|c| c.locks.as_ref().and_then(|l| l.max_ttl_secs))
            .unwrap_or(3600);
        seconds(secs)
    }

    pub fn lease_config(&self) -> LeaseConfig {
        LeaseConfig {
            grace: self.grace(),
            default_ttl: self.default_ttl(),
            max_ttl: self.max_ttl(),
        }
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        let defaults = SyncPolicy::default();
        let secs = |v: Option<u64>, d: Duration| v.map(seconds).unwrap_or(d);
        SyncPolicy {
            max_attempts: self
                .pick(|c| c.sync.as_ref().and_then(|s| s.max_attempts))
                .unwrap_or(defaults.max_attempts),
            backoff_base: secs(
                self.pick(|c| c.sync.as_ref().and_then(|s| s.backoff_base_secs)),
                defaults.backoff_base,
            ),
            backoff_max: secs(
                self.pick(|c| c.sync.as_ref().and_then(|s| s.backoff_max_secs)),
                defaults.backoff_max,
            ),
            retry_interval: secs(
                self.pick(|c| c.sync.as_ref().and_then(|s| s.retry_interval_secs)),
                defaults.retry_interval,
            ),
        }
    }

    /// Age after which tombstones and dead leases are purged. Defaults to 30 days.
    pub fn retention_window(&self) -> Duration {
        let days = self
            .pick(|c| c.retention.as_ref().and_then(|r| r.window_days))
            .unwrap_or(30);
        Duration::days(i64::from(days.min(MAX_WINDOW_DAYS)))
    }

    /// UTC time of day for the daily job. Defaults to midnight.
    pub fn daily_at(&self) -> NaiveTime {
        self.pick(|c| c.retention.as_ref().and_then(|r| r.daily_at.clone()))
            .and_then(|s| NaiveTime::parse_from_str(&s, DAILY_AT_FORMAT).ok())
            .unwrap_or(NaiveTime::MIN)
    }

    /// Whether the daily job also runs once at daemon start. Defaults to `true`.
    pub fn run_at_startup(&self) -> bool {
        self.pick(|c| c.retention.as_ref().and_then(|r| r.run_at_startup))
            .unwrap_or(true)
    }

    /// Defaults to `en`.
    pub fn default_language(&self) -> Language {
        self.pick(|c| c.content.as_ref().and_then(|r| r.default_language.clone()))
            .and_then(|code| Language::new(code).ok())
            .unwrap_or_else(Language::english)
    }

    pub fn languages(&self) -> Vec<Language> {
        self.pick(|c| c.content.as_ref().and_then(|r| r.languages.clone()))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|code| Language::new(code).ok())
            .collect()
    }

    pub fn log_level(&self) -> Option<String> {
        self.pick(|c| c.logging.as_ref().and_then(|l| l.level.clone()))
    }

    pub fn global_config_loaded_from(&self) -> Option<&Path> {
        self.global_path.as_deref()
    }

    pub fn workspace_config_loaded_from(&self) -> Option<&Path> {
        self.workspace_path.as_deref()
    }
}
