//! engine
//!
//! Synchronization, the transaction ledger, retention, and scheduling.
//!
//! # Architecture
//!
//! A synchronization of one draft root follows a fixed lifecycle:
//!
//! ```text
//! Claim -> Plan -> Idempotency check -> Apply (journaled) -> Verify -> Record -> Commit
//! ```
//!
//! 1. **Claim**: at most one sync per root runs at a time
//! 2. **Plan**: diff the draft subtree against the published store
//! 3. **Idempotency check**: a root whose fingerprint is the latest in the
//!    ledger, and whose published subtree still matches it, is skipped
//! 4. **Apply**: execute the plan under the published write lock, journaling
//!    a before-image for every write
//! 5. **Verify**: the draft fingerprint must still match the planned one
//! 6. **Record**: append the transaction to the ledger
//! 7. **Commit**: only now do published changes become final
//!
//! Any failure between Apply and Commit restores the before-images, so
//! readers never observe a partially published subtree.
//!
//! # Invariants
//!
//! - Published content changes only through [`exec::apply`]
//! - A ledger record exists for every committed apply and for nothing else
//! - Lock order is published before draft
//!
//! # Example
//!
//! ```
//! use casework::core::clock::SystemClock;
//! use casework::engine::sync::SyncTarget;
//! use casework::engine::workspace::{Workspace, WorkspaceOptions};
//! use std::sync::Arc;
//!
//! let ws = Workspace::in_memory(WorkspaceOptions::default(), Arc::new(SystemClock));
//! let report = ws.engine().sync(SyncTarget::All);
//! assert!(report.outcomes.is_empty());
//! ```

pub mod exec;
pub mod ledger;
pub mod plan;
pub mod retention;
pub mod rollback;
pub mod scheduler;
pub mod sync;
pub mod workspace;

// Test-only hooks for fault injection.
// Available under cfg(test) for unit tests, or feature = "fault_injection"
// for integration tests.
#[cfg(any(test, feature = "fault_injection"))]
pub mod engine_hooks;

pub use exec::{apply, ApplyReport, ExecuteError};
pub use ledger::{
    IdempotencyKey, LedgerError, SyncOperation, TransactionLedger, TransactionRecord,
};
pub use plan::{plan_subtree, sync_fingerprint, PlanError, SyncPlan, SyncStep};
pub use retention::{RetentionJob, RetentionReport};
pub use rollback::{rollback_journal, RollbackError, RollbackResult};
pub use scheduler::{ScheduleConfig, ScheduledJob, Scheduler, SchedulerHandle};
pub use sync::{
    DeferReason, SyncEngine, SyncError, SyncOutcome, SyncReport, SyncState, SyncTarget,
};
pub use workspace::{DraftOp, DraftOutcome, Workspace, WorkspaceError, WorkspaceOptions};
