//! telemetry
//!
//! Tracing subscriber setup for the `cw` binary.
//!
//! Level resolution, first match wins:
//!
//! 1. `RUST_LOG`
//! 2. `--debug` (forces `debug`)
//! 3. `[logging] level` from config
//! 4. `warn`
//!
//! Log lines go to stderr so command output on stdout stays parseable.

use tracing_subscriber::EnvFilter;

/// Fallback when neither the flag nor the config names a level.
pub const DEFAULT_LEVEL: &str = "warn";

/// Subscriber settings.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Level from config, e.g. `"info"`.
    pub level: Option<String>,
    pub debug: bool,
}

impl TelemetryConfig {
    /// The directive used when `RUST_LOG` is unset.
    pub fn directive(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            self.level.as_deref().unwrap_or(DEFAULT_LEVEL)
        }
    }
}

/// Install the global subscriber.
///
/// A second call is a no-op.
pub fn init(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directive()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_wins_over_config() {
        let config = TelemetryConfig {
            level: Some("error".into()),
            debug: true,
        };
        assert_eq!(config.directive(), "debug");
    }

    #[test]
    fn config_level_used() {
        let config = TelemetryConfig {
            level: Some("info".into()),
            debug: false,
        };
        assert_eq!(config.directive(), "info");
    }

    #[test]
    fn falls_back_to_warn() {
        assert_eq!(TelemetryConfig::default().directive(), DEFAULT_LEVEL);
    }

    #[test]
    fn init_twice_is_harmless() {
        init(&TelemetryConfig::default());
        init(&TelemetryConfig::default());
    }
}
