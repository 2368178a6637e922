//! core::ops::journal
//!
//! Undo journal for published-store applies.
//!
//! # Architecture
//!
//! Before the executor mutates a published node it appends a
//! [`BeforeImage`] of that record. If anything goes wrong before the
//! ledger record is written, the images are restored newest-first and the
//! store ends up exactly as it was before the attempt.
//!
//! The journal lives in memory for the duration of one apply. Durability of
//! the published state is the snapshot writer's job; the journal only needs
//! to outlive the write lock it was created under.
//!
//! # Invariants
//!
//! - An image is appended before the mutation it describes
//! - Rollback restores images in reverse append order
//! - A committed journal is never rolled back
//!
//! # Example
//!
//! ```
//! use casework::core::graph::{GraphStore, NodeContent, StoreKind};
//! use casework::core::ops::journal::Journal;
//! use casework::core::types::{EntityOrder, EntityType, NodeId};
//! use chrono::Utc;
//!
//! let mut store = GraphStore::new(StoreKind::Published);
//! let mut journal = Journal::new("sync 1");
//!
//! let id = NodeId::new(1);
//! journal.append_node_write(store.before_image(id));
//! store
//!     .insert_node(id, None, NodeContent::new(EntityType::Content, EntityOrder(0)), Utc::now())
//!     .unwrap();
//!
//! for image in journal.images_for_rollback() {
//!     store.restore(image);
//! }
//! assert!(store.get(id).is_none());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::graph::BeforeImage;
use crate::core::types::{NodeId, UtcTimestamp};

/// Errors from journal operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JournalError {
    /// Invalid journal state.
    #[error("invalid journal state: {0}")]
    InvalidState(String),
}

/// Unique identifier for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpId(String);

impl OpId {
    /// Generate a new unique operation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OpId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The current phase of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpPhase {
    InProgress,
    Committed,
    RolledBack,
}

impl OpPhase {
    /// Check if the operation is finished (committed or rolled back).
    pub fn is_finished(&self) -> bool {
        matches!(self, OpPhase::Committed | OpPhase::RolledBack)
    }
}

/// A single step in an operation journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalStep {
    pub kind: StepKind,
    pub timestamp: UtcTimestamp,
}

/// The kind of journal step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// A node record is about to change.
    NodeWrite {
        /// Exact record and parent edge before the change.
        image: BeforeImage,
    },

    /// A marker for logging multi-step applies.
    Checkpoint { name: String },
}

/// An operation journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journal {
    pub op_id: OpId,
    /// What started this operation, for logs.
    pub command: String,
    pub started_at: UtcTimestamp,
    pub finished_at: Option<UtcTimestamp>,
    pub phase: OpPhase,
    pub steps: Vec<JournalStep>,
}

impl Journal {
    /// Create a new journal for an operation.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            op_id: OpId::new(),
            command: command.into(),
            started_at: UtcTimestamp::now(),
            finished_at: None,
            phase: OpPhase::InProgress,
            steps: vec![],
        }
    }

    fn push(&mut self, kind: StepKind) {
        self.steps.push(JournalStep {
            kind,
            timestamp: UtcTimestamp::now(),
        });
    }

    /// Record the prior state of a node about to be written.
    pub fn append_node_write(&mut self, image: BeforeImage) {
        self.push(StepKind::NodeWrite { image });
    }

    /// Record a named checkpoint.
    pub fn append_checkpoint(&mut self, name: impl Into<String>) {
        self.push(StepKind::Checkpoint { name: name.into() });
    }

    /// Mark the operation as committed.
    pub fn commit(&mut self) {
        self.phase = OpPhase::Committed;
        self.finished_at = Some(UtcTimestamp::now());
    }

    /// Mark the operation as rolled back.
    ///
    /// # Errors
    ///
    /// [`JournalError::InvalidState`] if the journal was already committed.
    pub fn rollback(&mut self) -> Result<(), JournalError> {
        if self.phase == OpPhase::Committed {
            return Err(JournalError::InvalidState(format!(
                "operation {} is already committed",
                self.op_id
            )));
        }
        self.phase = OpPhase::RolledBack;
        self.finished_at = Some(UtcTimestamp::now());
        Ok(())
    }

    /// Before-images, most recent first.
    pub fn images_for_rollback(&self) -> Vec<&BeforeImage> {
        self.steps
            .iter()
            .rev()
            .filter_map(|step| match &step.kind {
                StepKind::NodeWrite { image } => Some(image),
                StepKind::Checkpoint { .. } => None,
            })
            .collect()
    }

    /// Distinct nodes touched so far.
    pub fn touched_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .steps
            .iter()
            .filter_map(|step| match &step.kind {
                StepKind::NodeWrite { image } => Some(image.id),
                StepKind::Checkpoint { .. } => None,
            })
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Summary of what a rollback would do.
    pub fn rollback_summary(&self) -> RollbackSummary {
        let mut summary = RollbackSummary::default();
        for image in self.images_for_rollback() {
            match &image.node {
                None => summary.removals += 1,
                Some(_) => summary.restores += 1,
            }
        }
        summary
    }
}

/// Summary of what a rollback would do.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RollbackSummary {
    /// Records that did not exist before and will be removed.
    pub removals: usize,
    /// Records that will be put back to their prior state.
    pub restores: usize,
}

impl RollbackSummary {
    pub fn total_items(&self) -> usize {
        self.removals + self.restores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::{GraphStore, NodeContent, StoreKind};
    use crate::core::types::{EntityOrder, EntityType};
    use chrono::Utc;

    #[test]
    fn new_journal_is_in_progress() {
        let journal = Journal::new("sync 1");
        assert_eq!(journal.phase, OpPhase::InProgress);
        assert!(!journal.phase.is_finished());
        assert!(journal.steps.is_empty());
    }

    #[test]
    fn images_come_back_newest_first() {
        let store = GraphStore::new(StoreKind::Published);
        let mut journal = Journal::new("sync");
        journal.append_node_write(store.before_image(NodeId::new(1)));
        journal.append_checkpoint("creates done");
        journal.append_node_write(store.before_image(NodeId::new(2)));

        let ids: Vec<NodeId> = journal.images_for_rollback().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![NodeId::new(2), NodeId::new(1)]);
    }

    #[test]
    fn summary_separates_creates_from_updates() {
        let mut store = GraphStore::new(StoreKind::Published);
        let content = NodeContent::new(EntityType::Content, EntityOrder(0));
        store
            .insert_node(NodeId::new(1), None, content, Utc::now())
            .unwrap();

        let mut journal = Journal::new("sync");
        journal.append_node_write(store.before_image(NodeId::new(1)));
        journal.append_node_write(store.before_image(NodeId::new(2)));
        journal.append_node_write(store.before_image(NodeId::new(1)));

        let summary = journal.rollback_summary();
        assert_eq!(summary.restores, 2);
        assert_eq!(summary.removals, 1);
        assert_eq!(summary.total_items(), 3);
        assert_eq!(journal.touched_nodes(), vec![NodeId::new(1), NodeId::new(2)]);
    }

    #[test]
    fn committed_journal_cannot_roll_back() {
        let mut journal = Journal::new("sync");
        journal.commit();
        assert!(journal.phase.is_finished());
        assert!(journal.rollback().is_err());
    }

    #[test]
    fn rollback_marks_phase() {
        let mut journal = Journal::new("sync");
        journal.rollback().unwrap();
        assert_eq!(journal.phase, OpPhase::RolledBack);
        assert!(journal.finished_at.is_some());
    }
}
