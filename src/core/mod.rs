//! core
//!
//! Core domain types, storage, and operations.
//!
//! # Modules
//!
//! - [`types`] - Strong types: NodeId, EntityType, Language, Fingerprint, etc.
//! - [`clock`] - Shared time source
//! - [`graph`] - Content forest storage and traversal
//! - [`ops`] - Leases, undo journaling, and process locking
//! - [`config`] - Configuration schema and loading
//! - [`paths`] - Centralized path routing for workspace storage
//! - [`persist`] - Atomic snapshot files
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Schemas are strict and self-describing
//! - Time is injected, never read ad hoc

pub mod clock;
pub mod config;
pub mod graph;
pub mod ops;
pub mod paths;
pub mod persist;
pub mod types;
