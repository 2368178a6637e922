//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--data-dir <path>`: Use this workspace data directory
//! - `--holder <id>`: Act as this lease holder (default `$USER`)
//! - `--debug`: Enable debug logging
//! - `--quiet` / `-q`: Minimal output

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::core::types::{EntityType, NodeId};

/// Casework - draft and published content trees with edit leases
#[derive(Parser, Debug)]
#[command(name = "cw")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Workspace data directory (default: $CASEWORK_DATA_DIR or the platform data dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Lease holder identity (default: $USER)
    #[arg(long, global = true, value_name = "ID")]
    pub holder: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    // ========== Setup ==========
    /// Create an empty workspace data directory
    #[command(
        name = "init",
        long_about = "Create an empty workspace data directory.\n\n\
            Writes empty draft and published stores. Running init on an existing \
            workspace leaves its content untouched; use --default-language or \
            --languages to (re)write the workspace config.",
        after_help = "\
EXAMPLES:
    cw init
    cw --data-dir ./site init --default-language pl --languages pl,en"
    )]
    Init {
        /// Default language for projections
        #[arg(long, value_name = "CODE")]
        default_language: Option<String>,

        /// Comma-separated list of allowed languages
        #[arg(long, value_name = "CODES", value_delimiter = ',')]
        languages: Vec<String>,
    },

    // ========== Draft Editing ==========
    /// Create a draft node
    #[command(
        name = "create",
        long_about = "Create a draft node.\n\n\
            Without --parent the node becomes a new forest root and needs no lease. \
            With --parent you must hold a lease on the parent.",
        after_help = "\
EXAMPLES:
    cw create --type navigation
    cw lock 1 && cw create --parent 1 --type content --order 2"
    )]
    Create {
        /// Parent node; omit to create a forest root
        #[arg(long)]
        parent: Option<NodeId>,

        /// Entity type (name or numeric id)
        #[arg(long = "type", value_name = "TYPE")]
        entity_type: EntityType,

        /// Position among siblings
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        order: i32,
    },

    /// Attach a forest root under a parent
    Attach {
        /// Parent node (lease required)
        parent: NodeId,
        /// Node to attach
        child: NodeId,
    },

    /// Detach a child, making it a forest root
    Detach {
        /// Parent node (lease required)
        parent: NodeId,
        /// Child to detach
        child: NodeId,
    },

    /// Set the order of a node's children
    Reorder {
        /// Parent node (lease required)
        parent: NodeId,
        /// Every live child, in the new order
        #[arg(required = true, num_args = 1..)]
        children: Vec<NodeId>,
    },

    /// Set or remove a translation
    #[command(
        name = "translate",
        after_help = "\
EXAMPLES:
    cw translate 4 --lang en --title \"Welcome\" --body \"Hello there\"
    cw translate 4 --lang en --title \"Welcome\" --image hero.png
    cw translate 4 --lang pl --remove"
    )]
    Translate {
        /// Node to translate (lease required)
        node: NodeId,

        /// Language code
        #[arg(long = "lang", value_name = "CODE")]
        language: String,

        /// Title text
        #[arg(long, required_unless_present = "remove")]
        title: Option<String>,

        /// Body text
        #[arg(long)]
        body: Option<String>,

        /// Image file referenced by the translation (repeatable)
        #[arg(long = "image", value_name = "FILE")]
        images: Vec<String>,

        /// Remove the translation instead of setting it
        #[arg(long, conflicts_with_all = ["title", "body", "images"])]
        remove: bool,
    },

    /// Delete a draft node and its subtree
    Delete {
        /// Node to delete (lease required)
        node: NodeId,
    },

    // ========== Leases ==========
    /// Acquire an edit lease
    #[command(
        name = "lock",
        long_about = "Acquire an edit lease on a draft node.\n\n\
            Fails if another holder's lease is still valid. A lease within the \
            grace window of its expiry counts as released."
    )]
    Lock {
        node: NodeId,

        /// Lease duration in seconds (default from config)
        #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(i64).range(1..))]
        ttl: Option<i64>,
    },

    /// Extend a lease you hold
    Renew {
        node: NodeId,

        /// New lease duration in seconds, counted from now
        #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(i64).range(1..))]
        ttl: Option<i64>,
    },

    /// Release a lease you hold
    Unlock { node: NodeId },

    // ========== Reading ==========
    /// Show a node, or list forest roots
    #[command(
        name = "show",
        after_help = "\
EXAMPLES:
    cw show                   # draft roots
    cw show 1 --full          # whole draft subtree under 1
    cw show 1 --published --lang pl --json"
    )]
    Show {
        /// Node to show; omit to list roots
        node: Option<NodeId>,

        /// Read the published store instead of the draft
        #[arg(long)]
        published: bool,

        /// Preferred language
        #[arg(long = "lang", value_name = "CODE")]
        language: Option<String>,

        /// Expand the whole subtree
        #[arg(long)]
        full: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    // ========== Synchronization ==========
    /// Publish draft subtrees
    #[command(
        name = "sync",
        long_about = "Publish draft subtrees into the published store.\n\n\
            Each root is published atomically. A root whose content fingerprint is \
            already in the ledger is skipped. Roots with a locked node are deferred \
            and retried later by the daemon.",
        after_help = "\
EXAMPLES:
    cw sync 1               # one root
    cw sync --all           # every root
    cw sync --all --dry-run # show the plans only"
    )]
    Sync {
        /// Root to publish
        #[arg(conflicts_with = "all", required_unless_present = "all")]
        root: Option<NodeId>,

        /// Publish every root
        #[arg(long)]
        all: bool,

        /// Print the plans without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the transaction ledger
    Ledger {
        /// Only records for this root
        root: Option<NodeId>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    // ========== Maintenance ==========
    /// Purge tombstones and stale leases past the retention window
    Purge,

    /// List roots flagged for review, or clear a flag
    Review {
        /// Clear the flag on this root and queue it for retry
        #[arg(long, value_name = "ROOT")]
        clear: Option<NodeId>,
    },

    /// Run the scheduler (daily maintenance and sync retries) until interrupted
    #[command(
        name = "daemon",
        long_about = "Run the scheduler in the foreground.\n\n\
            Runs retention and a full sync once at startup (unless disabled in \
            config), then daily at [retention] daily_at (UTC), and retries \
            deferred or failed roots every [sync] retry_interval_secs. Stops on \
            Ctrl-C."
    )]
    Daemon,
}
