//! ui::output
//!
//! Output formatting and display.
//!
//! # Design
//!
//! Output is formatted consistently and respects the quiet flag.
//! When `--json` is enabled, output is machine-readable JSON.

use std::fmt::Display;

use serde::Serialize;

use crate::engine::ledger::TransactionRecord;
use crate::engine::sync::{DeferReason, SyncOutcome, SyncReport};
use crate::projection::ProjectionNode;

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Quiet mode - minimal output
    Quiet,
    /// Normal mode - standard output
    Normal,
    /// Debug mode - verbose output
    Debug,
}

impl Verbosity {
    /// Create verbosity from flags.
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        }
    }
}

/// Print a message (respects quiet mode).
pub fn print(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        println!("{}", message);
    }
}

/// Print an error message (always shown).
pub fn error(message: impl Display) {
    eprintln!("error: {}", message);
}

/// Print a warning message (respects quiet mode).
pub fn warn(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        eprintln!("warning: {}", message);
    }
}

/// Print pretty JSON. Always shown; the caller asked for it.
pub fn json<T: Serialize>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Render a projection as an indented tree.
///
/// ```text
/// 1 [navigation] Home
///   2 [content] Welcome (locked)
///   3 [question] ... +
/// ```
///
/// `+` marks a node with children that were not expanded.
pub fn format_tree(node: &ProjectionNode) -> String {
    let mut lines = Vec::new();
    render(node, 0, &mut lines);
    lines.join("\n")
}

fn render(node: &ProjectionNode, depth: usize, lines: &mut Vec<String>) {
    let title = if node.title().is_empty() {
        "..."
    } else {
        node.title()
    };
    let mut line = format!(
        "{}{} [{}] {}",
        "  ".repeat(depth),
        node.id,
        node.entity_type,
        title
    );
    if node.is_locked {
        line.push_str(" (locked)");
    }
    if node.has_children && node.children.is_empty() {
        line.push_str(" +");
    }
    lines.push(line);
    for child in &node.children {
        render(child, depth + 1, lines);
    }
}

/// One line per root outcome.
pub fn format_sync_report(report: &SyncReport) -> String {
    if report.outcomes.is_empty() {
        return "Nothing to synchronize.".to_string();
    }
    report
        .outcomes
        .iter()
        .map(|(root, outcome)| format!("{}: {}", root, describe_outcome(outcome)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe_outcome(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Applied { record, .. } => format!(
            "published ({} created, {} updated, {} deleted)",
            record.created, record.updated, record.deleted
        ),
        SyncOutcome::AlreadyApplied => "already up to date".to_string(),
        SyncOutcome::Deferred { reason } => match reason {
            DeferReason::Locked { node } => format!("deferred, node {} is locked", node),
            DeferReason::InProgress => "deferred, sync already running".to_string(),
            DeferReason::UnderReview => "skipped, flagged for review".to_string(),
        },
        SyncOutcome::Failed {
            error,
            attempts,
            flagged,
        } => {
            let mut s = format!("failed (attempt {}): {}", attempts, error);
            if *flagged {
                s.push_str(" [flagged for review]");
            }
            s
        }
    }
}

/// One line per ledger record.
pub fn format_record(record: &TransactionRecord) -> String {
    format!(
        "{}  {}  {:<7} {}  +{} ~{} -{}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        record.root,
        record.operation.to_string(),
        record.fingerprint.short(),
        record.created,
        record.updated,
        record.deleted
    )
}

/// Format a list of items.
pub fn format_list<T: Display>(items: &[T], prefix: &str) -> String {
    items
        .iter()
        .map(|item| format!("{}{}", prefix, item))
        .collect::<Vec<_>>()
        .join("\n")
}
