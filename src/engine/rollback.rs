//! Rollback of a partially or fully applied sync.
//!
//! Used by the sync engine when an apply fails, when the draft changed
//! while the apply ran, and when the ledger write fails afterwards.
//!
//! # Rollback Order
//!
//! Before-images are restored in reverse journal order. A record written
//! twice in one apply is therefore left in its earliest captured state,
//! and edges created after a capture are gone before the capture is
//! put back.
//!
//! After the last image is restored the store is verified; a store that
//! fails verification means the journal did not cover every write.

use thiserror::Error;
use tracing::{debug, error};

use crate::core::graph::{GraphError, GraphStore};
use crate::core::ops::journal::{Journal, JournalError};
use crate::core::types::NodeId;

/// Errors from rollback operations.
#[derive(Debug, Error)]
pub enum RollbackError {
    /// The journal cannot be rolled back in its current phase.
    #[error("journal error during rollback: {0}")]
    Journal(#[from] JournalError),

    /// The restored store is not structurally sound.
    #[error("store inconsistent after rollback: {0}")]
    Verify(#[from] GraphError),
}

/// Result of a rollback attempt.
#[derive(Debug, Default)]
pub struct RollbackResult {
    /// Records put back, in restore order.
    pub restored: Vec<NodeId>,
    /// Why the rollback is not complete, if it is not.
    pub error: Option<RollbackError>,
}

impl RollbackResult {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        match &self.error {
            None => format!("Rolled back {} records", self.restored.len()),
            Some(e) => format!(
                "Rollback incomplete after {} records: {}",
                self.restored.len(),
                e
            ),
        }
    }
}

/// Undo every write recorded in `journal`.
///
/// The journal is marked rolled back. A committed journal is left alone
/// and reported as an error.
pub fn rollback_journal(store: &mut GraphStore, journal: &mut Journal) -> RollbackResult {
    let mut result = RollbackResult::default();

    if let Err(e) = journal.rollback() {
        result.error = Some(e.into());
        return result;
    }

    for image in journal.images_for_rollback() {
        store.restore(image);
        result.restored.push(image.id);
    }

    if let Err(e) = store.verify() {
        error!(op = %journal.op_id, error = %e, "store failed verification after rollback");
        result.error = Some(e.into());
    } else {
        debug!(op = %journal.op_id, records = result.restored.len(), "rolled back");
    }
    result
}
