//! core::ops
//!
//! Leases, undo journaling, and process locking.
//!
//! # Modules
//!
//! - [`lease`] - Time-bounded edit leases on draft nodes
//! - [`journal`] - Undo journal for published applies
//! - [`lock`] - Exclusive data directory lock
//!
//! # Architecture
//!
//! Every CLI invocation:
//! 1. Acquires the data directory lock
//! 2. Loads both stores and the ledger
//! 3. Checks leases before any draft mutation
//! 4. Journals every published write during sync so it can be undone
//! 5. Saves snapshots and releases the lock on drop

pub mod journal;
pub mod lease;
pub mod lock;

pub use journal::{Journal, JournalError, OpId, OpPhase, StepKind};
pub use lease::{check_held_by, lease_is_held, Lease, LeaseConfig, LeaseError, LeaseToken, LockManager};
pub use lock::{DataDirLock, LockError};
