//! core::paths
//!
//! Centralized path routing for workspace storage.
//!
//! # Storage Layout
//!
//! All workspace data lives under one data directory:
//! - `config.toml` - Workspace configuration
//! - `lock` - Exclusive process lock
//! - `draft.json` - Draft store snapshot
//! - `published.json` - Published store snapshot
//! - `ledger.jsonl` - Transaction ledger, one record per line
//! - `sync-state.json` - Pending retries and review flags
//!
//! **Hard rule:** no code outside this module joins file names onto the
//! data directory.
//!
//! # Example
//!
//! ```
//! use casework::core::paths::DataPaths;
//! use std::path::PathBuf;
//!
//! let paths = DataPaths::new(PathBuf::from("/srv/casework"));
//! assert_eq!(paths.ledger_path(), PathBuf::from("/srv/casework/ledger.jsonl"));
//! ```

use std::path::{Path, PathBuf};

/// Environment variable that overrides the default data directory.
pub const DATA_DIR_ENV: &str = "CASEWORK_DATA_DIR";

/// Path routing for one workspace data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Resolve the data directory when none was given on the command line.
    ///
    /// Order: `$CASEWORK_DATA_DIR`, the platform data dir, `./.casework`.
    pub fn default_root() -> PathBuf {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        dirs::data_local_dir()
            .map(|d| d.join("casework"))
            .unwrap_or_else(|| PathBuf::from(".casework"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("lock")
    }

    pub fn draft_path(&self) -> PathBuf {
        self.root.join("draft.json")
    }

    pub fn published_path(&self) -> PathBuf {
        self.root.join("published.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("ledger.jsonl")
    }

    pub fn sync_state_path(&self) -> PathBuf {
        self.root.join("sync-state.json")
    }

    /// Whether `init` has run here.
    pub fn is_initialized(&self) -> bool {
        self.draft_path().exists()
    }

    /// Create the data directory if needed.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }
}
