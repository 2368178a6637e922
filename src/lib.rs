//! Casework - draft and published content trees with edit leases
//!
//! Editors change a draft forest of content nodes under time-bounded
//! leases. A synchronization engine publishes each draft subtree into a
//! separate published forest, atomically and at most once per content
//! fingerprint, and records every publish in an append-only ledger.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to engine)
//! - [`engine`] - Synchronization, ledger, retention, and scheduling
//! - [`core`] - Domain types, the graph store, leases, config, and persistence
//! - [`projection`] - Read-only client views of either store
//! - [`assets`] - Collaborators notified after a publish
//! - [`telemetry`] - Tracing subscriber setup
//! - [`ui`] - Terminal output
//!
//! # Correctness Invariants
//!
//! 1. A draft node is edited only by the holder of its valid lease
//! 2. Published content changes only through the sync engine
//! 3. Readers never observe a partially published subtree
//! 4. Every committed publish has exactly one ledger record

pub mod assets;
pub mod cli;
pub mod core;
pub mod engine;
pub mod projection;
pub mod telemetry;
pub mod ui;
