//! cli
//!
//! Command-line interface layer for casework.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Load configuration and initialize logging
//! - Delegate to command handlers
//! - Does NOT mutate stores directly
//!
//! # Architecture
//!
//! The CLI layer is thin. It parses arguments via clap and dispatches to the
//! [`crate::engine::workspace::Workspace`] for execution. Every invocation
//! opens the data directory under its process lock and persists on success.
//! The daemon is the exception: it takes the lock once per scheduled run.

pub mod args;
pub mod commands;

pub use args::Cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};

use crate::assets::NoopGenerator;
use crate::core::clock::SystemClock;
use crate::core::config::Config;
use crate::core::paths::DataPaths;
use crate::core::types::HolderId;
use crate::engine::scheduler::SchedulerHandle;
use crate::engine::workspace::{Workspace, WorkspaceOptions};
use crate::telemetry::{self, TelemetryConfig};
use crate::ui::output::Verbosity;

/// Execution context for commands.
///
/// Contains global settings derived from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Data directory override.
    pub data_dir: Option<PathBuf>,
    /// Lease holder override.
    pub holder: Option<String>,
    /// Debug logging enabled.
    pub debug: bool,
    /// Quiet mode (minimal output).
    pub quiet: bool,
}

impl Context {
    pub fn paths(&self) -> DataPaths {
        DataPaths::new(
            self.data_dir
                .clone()
                .unwrap_or_else(DataPaths::default_root),
        )
    }

    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.debug)
    }

    /// `--holder`, else `$USER`, else `$USERNAME`.
    pub fn holder(&self) -> Result<HolderId> {
        let raw = self
            .holder
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .ok_or_else(|| anyhow!("no holder identity; pass --holder or set $USER"))?;
        HolderId::new(raw).context("Invalid holder identity")
    }

    /// Merged global and workspace configuration.
    pub fn config(&self) -> Result<Config> {
        let paths = self.paths();
        let loaded = Config::load(Some(&paths)).context("Failed to load config")?;
        for warning in &loaded.warnings {
            crate::ui::output::warn(
                format!("{} ({})", warning.message, warning.path.display()),
                self.verbosity(),
            );
        }
        Ok(loaded.config)
    }

    /// Open the workspace under its process lock.
    pub fn open_workspace(&self) -> Result<Workspace> {
        let config = self.config()?;
        let paths = self.paths();
        Workspace::open(
            &paths,
            WorkspaceOptions::from_config(&config),
            Arc::new(SystemClock),
        )
        .with_context(|| format!("Failed to open workspace at {}", paths.root().display()))
    }

    /// Start the maintenance scheduler over the data directory.
    ///
    /// The data directory is opened only while a job runs, so other
    /// commands keep working. Must be called from within a tokio runtime.
    pub fn start_scheduler(&self) -> Result<SchedulerHandle> {
        let config = self.config()?;
        let paths = self.paths();
        Workspace::start_data_dir_scheduler(
            &paths,
            WorkspaceOptions::from_config(&config),
            Arc::new(SystemClock),
            Arc::new(NoopGenerator),
        )
        .with_context(|| format!("Failed to start scheduler at {}", paths.root().display()))
    }
}

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();

    let ctx = Context {
        data_dir: cli.data_dir.clone(),
        holder: cli.holder.clone(),
        debug: cli.debug,
        quiet: cli.quiet,
    };

    // Config errors are reported again by the command that needs it.
    let level = Config::load(Some(&ctx.paths()))
        .ok()
        .and_then(|loaded| loaded.config.log_level());
    telemetry::init(&TelemetryConfig {
        level,
        debug: ctx.debug,
    });

    commands::dispatch(cli.command, &ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_holder_wins() {
        let ctx = Context {
            holder: Some("alice".into()),
            ..Context::default()
        };
        assert_eq!(ctx.holder().unwrap().as_str(), "alice");
    }

    #[test]
    fn explicit_data_dir_used() {
        let ctx = Context {
            data_dir: Some(PathBuf::from("/tmp/cw-data")),
            ..Context::default()
        };
        assert_eq!(ctx.paths().root(), std::path::Path::new("/tmp/cw-data"));
    }

    #[test]
    fn verbosity_follows_flags() {
        let ctx = Context {
            quiet: true,
            ..Context::default()
        };
        assert_eq!(ctx.verbosity(), Verbosity::Quiet);
    }
}
