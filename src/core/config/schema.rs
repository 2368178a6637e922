//! core::config::schema
//!
//! Configuration schema types.
//!
//! The same file format is used for both scopes. Every field is optional so
//! a workspace file can override a single value of the global file.
//!
//! # Example
//!
//! ```toml
//! [locks]
//! grace_secs = 5
//! default_ttl_secs = 300
//! max_ttl_secs = 3600
//!
//! [sync]
//! max_attempts = 5
//! backoff_base_secs = 30
//! backoff_max_secs = 3600
//! retry_interval_secs = 60
//!
//! [retention]
//! window_days = 30
//! daily_at = "00:00:00"
//! run_at_startup = true
//!
//! [content]
//! default_language = "en"
//! languages = ["en", "pl"]
//!
//! [logging]
//! level = "info"
//! ```

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::types::Language;

/// Accepted `[logging] level` values.
pub const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for every `*_secs` value: ten years.
pub const MAX_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Upper bound for `[retention] window_days`.
pub const MAX_WINDOW_DAYS: u32 = 100 * 365;

/// Format of `[retention] daily_at`.
pub const DAILY_AT_FORMAT: &str = "%H:%M:%S";

fn check_secs(field: &str, value: Option<u64>) -> Result<(), ConfigError> {
    match value {
        Some(secs) if secs > MAX_SECS => Err(ConfigError::InvalidValue(format!(
            "{} ({}) exceeds the maximum of {} seconds",
            field, secs, MAX_SECS
        ))),
        _ => Ok(()),
    }
}

/// One configuration file (global or workspace scope).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub locks: Option<LocksConfig>,
    pub sync: Option<SyncConfig>,
    pub retention: Option<RetentionConfig>,
    pub content: Option<ContentConfig>,
    pub logging: Option<LoggingConfig>,
}

impl ConfigFile {
    /// Validate the values present in this file.
    ///
    /// Cross-field rules that may span scopes (ttl vs max ttl) are checked
    /// again on the merged view.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(locks) = &self.locks {
            locks.validate()?;
        }
        if let Some(sync) = &self.sync {
            sync.validate()?;
        }
        if let Some(retention) = &self.retention {
            retention.validate()?;
        }
        if let Some(content) = &self.content {
            content.validate()?;
        }
        if let Some(logging) = &self.logging {
            logging.validate()?;
        }
        Ok(())
    }
}

/// `[locks]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LocksConfig {
    /// A lease expiring within this many seconds counts as released.
    pub grace_secs: Option<u64>,
    pub default_ttl_secs: Option<u64>,
    pub max_ttl_secs: Option<u64>,
}

impl LocksConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_secs("locks.grace_secs", self.grace_secs)?;
        check_secs("locks.default_ttl_secs", self.default_ttl_secs)?;
        check_secs("locks.max_ttl_secs", self.max_ttl_secs)?;
        if self.default_ttl_secs == Some(0) {
            return Err(ConfigError::InvalidValue(
                "locks.default_ttl_secs must be positive".into(),
            ));
        }
        if self.max_ttl_secs == Some(0) {
            return Err(ConfigError::InvalidValue(
                "locks.max_ttl_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// `[sync]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Consecutive failures before a root is flagged for review.
    pub max_attempts: Option<u32>,
    pub backoff_base_secs: Option<u64>,
    pub backoff_max_secs: Option<u64>,
    /// How often the scheduler drives pending retries.
    pub retry_interval_secs: Option<u64>,
}

impl SyncConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_secs("sync.backoff_base_secs", self.backoff_base_secs)?;
        check_secs("sync.backoff_max_secs", self.backoff_max_secs)?;
        check_secs("sync.retry_interval_secs", self.retry_interval_secs)?;
        if self.max_attempts == Some(0) {
            return Err(ConfigError::InvalidValue(
                "sync.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry_interval_secs == Some(0) {
            return Err(ConfigError::InvalidValue(
                "sync.retry_interval_secs must be positive".into(),
            ));
        }
        if let (Some(base), Some(max)) = (self.backoff_base_secs, self.backoff_max_secs) {
            if max < base {
                return Err(ConfigError::InvalidValue(format!(
                    "sync.backoff_max_secs ({}) is below sync.backoff_base_secs ({})",
                    max, base
                )));
            }
        }
        Ok(())
    }
}

/// `[retention]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    pub window_days: Option<u32>,
    /// UTC time of day, `HH:MM:SS`.
    pub daily_at: Option<String>,
    pub run_at_startup: Option<bool>,
}

impl RetentionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(days) = self.window_days {
            if days == 0 || days > MAX_WINDOW_DAYS {
                return Err(ConfigError::InvalidValue(format!(
                    "retention.window_days must be between 1 and {}",
                    MAX_WINDOW_DAYS
                )));
            }
        }
        if let Some(at) = &self.daily_at {
            NaiveTime::parse_from_str(at, DAILY_AT_FORMAT).map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "retention.daily_at '{}' is not HH:MM:SS: {}",
                    at, e
                ))
            })?;
        }
        Ok(())
    }
}

/// `[content]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ContentConfig {
    /// Fallback language for projections.
    pub default_language: Option<String>,
    /// Languages offered to editors; informational.
    pub languages: Option<Vec<String>>,
}

impl ContentConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let all = self
            .default_language
            .iter()
            .chain(self.languages.iter().flatten());
        for code in all {
            Language::new(code.clone()).map_err(|e| {
                ConfigError::InvalidValue(format!("content language '{}': {}", code, e))
            })?;
        }
        Ok(())
    }
}

/// `[logging]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(level) = &self.level {
            if !VALID_LOG_LEVELS.contains(&level.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "invalid logging level '{}', must be one of: {}",
                    level,
                    VALID_LOG_LEVELS.join(", ")
                )));
            }
        }
        Ok(())
    }
}
