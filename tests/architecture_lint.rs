//! Architecture enforcement tests.
//!
//! Command handlers go through the `Workspace` boundary; only the engine's
//! executor writes to the published store. These tests scan the source tree
//! so violations are caught in CI.
//!
//! # Test Categories
//!
//! 1. **Boundary** - Commands must not reach into the stores
//! 2. **Publish path** - Published writes live in `engine::exec`
//! 3. **Error propagation** - No `unwrap()`/`expect()` outside tests

use std::fs;
use std::path::{Path, PathBuf};

/// Store-level patterns a command handler must not use.
const FORBIDDEN_IN_COMMANDS: &[&str] = &[
    "GraphStore",
    "use crate::core::graph::shared",
    ".draft()",
    ".published()",
    ".write()",
    "SyncEngine::new",
];

/// Store methods that rewrite published records.
const PUBLISH_WRITES: &[&str] = &[".insert_node(", ".replace_content(", ".set_parent("];

/// Files allowed to call [`PUBLISH_WRITES`] outside tests.
///
/// - `graph.rs` - Defines the methods
/// - `exec.rs` - The only sync-time writer
const PUBLISH_WRITERS: &[&str] = &["core/graph.rs", "engine/exec.rs"];

fn rust_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).expect("Failed to read directory") {
        let path = entry.expect("Failed to read entry").path();
        if path.is_dir() {
            files.extend(rust_files(&path));
        } else if path.extension().map(|e| e == "rs").unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    files
}

/// Source lines before the first `#[cfg(test)]`, comments dropped.
fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.contains("#[cfg(test)]"))
        .filter(|(_, line)| !line.trim_start().starts_with("//"))
        .map(|(i, line)| (i + 1, line))
        .collect()
}

fn relative(path: &Path) -> String {
    path.strip_prefix("src")
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

// =============================================================================
// Boundary
// =============================================================================

/// Command handlers call `Workspace` operations, never the stores.
#[test]
fn commands_do_not_touch_stores() {
    let mut violations = Vec::new();

    for path in rust_files(Path::new("src/cli/commands")) {
        let content = fs::read_to_string(&path).expect("Failed to read command file");
        for (line_no, line) in production_lines(&content) {
            for pattern in FORBIDDEN_IN_COMMANDS {
                if line.contains(pattern) {
                    violations.push(format!(
                        "{}:{}: uses `{}` - go through Workspace instead",
                        relative(&path),
                        line_no,
                        pattern
                    ));
                }
            }
        }
    }

    assert!(
        violations.is_empty(),
        "Architecture violations found:\n  {}",
        violations.join("\n  ")
    );
}

/// Every mutating command persists the workspace after the operation.
#[test]
fn mutating_commands_persist() {
    let mutating = ["edit.rs", "lease.rs", "sync.rs", "maintenance.rs"];
    let mut missing = Vec::new();

    for name in mutating {
        let path = Path::new("src/cli/commands").join(name);
        let content = fs::read_to_string(&path).expect("Failed to read command file");
        if !content.contains(".persist()") {
            missing.push(name);
        }
    }

    assert!(
        missing.is_empty(),
        "Mutating commands that never persist: {:?}",
        missing
    );
}

// =============================================================================
// Publish Path
// =============================================================================

/// Published records are rewritten only by the executor.
#[test]
fn published_writes_stay_in_engine() {
    let mut violations = Vec::new();

    for path in rust_files(Path::new("src")) {
        let rel = relative(&path);
        if PUBLISH_WRITERS.contains(&rel.as_str()) {
            continue;
        }
        let content = fs::read_to_string(&path).expect("Failed to read source file");
        for (line_no, line) in production_lines(&content) {
            for pattern in PUBLISH_WRITES {
                if line.contains(pattern) {
                    violations.push(format!("{}:{}: calls `{}`", rel, line_no, pattern));
                }
            }
        }
    }

    assert!(
        violations.is_empty(),
        "Published store written outside the engine:\n  {}",
        violations.join("\n  ")
    );
}

// =============================================================================
// Error Propagation
// =============================================================================

/// Library and binary code propagates errors instead of panicking.
#[test]
fn no_unwrap_outside_tests() {
    let mut violations = Vec::new();

    for path in rust_files(Path::new("src")) {
        let content = fs::read_to_string(&path).expect("Failed to read source file");
        for (line_no, line) in production_lines(&content) {
            if line.contains(".unwrap()") || line.contains(".expect(") {
                violations.push(format!("{}:{}: {}", relative(&path), line_no, line.trim()));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "unwrap()/expect() in non-test code:\n  {}",
        violations.join("\n  ")
    );
}
