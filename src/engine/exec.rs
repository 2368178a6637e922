//! engine::exec
//!
//! The single writer of the published store.
//!
//! # Architecture
//!
//! The executor applies a [`SyncPlan`] step by step to a published store
//! the caller has already write-locked. Before each record is written its
//! exact prior state goes into the [`Journal`], so a failure at any step
//! can be undone by [`rollback`](super::rollback).
//!
//! The executor does not roll back by itself. The caller decides, since
//! only the caller knows whether the ledger write that follows succeeded.
//!
//! # Invariants
//!
//! - Every published write is preceded by a journaled before-image
//! - Steps run in plan order
//! - The first failing step stops the apply
//!
//! # Example
//!
//! ```ignore
//! let mut journal = Journal::new("sync 3");
//! match exec::apply(&plan, &mut published, &mut journal, now) {
//!     Ok(report) => println!("created {}", report.created),
//!     Err(e) => rollback::rollback_journal(&mut published, &mut journal),
//! }
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, trace};

use super::plan::{SyncPlan, SyncStep};
use crate::core::graph::{GraphError, GraphStore};
use crate::core::ops::journal::Journal;

/// Errors from execution.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// A store operation rejected the step.
    #[error("step {index} failed: {source}")]
    Step { index: usize, source: GraphError },

    /// A fault was injected at this step.
    #[error("injected failure at step {0}")]
    Injected(usize),
}

impl ExecuteError {
    /// Index of the step that failed.
    pub fn step_index(&self) -> usize {
        match self {
            ExecuteError::Step { index, .. } | ExecuteError::Injected(index) => *index,
        }
    }
}

/// Counts of what an apply changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: usize,
    /// Moves and content updates.
    pub updated: usize,
    /// Published nodes tombstoned, descendants included.
    pub deleted: usize,
}

impl ApplyReport {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Apply every step of `plan` to `published`.
///
/// # Errors
///
/// [`ExecuteError`] naming the first step that could not be applied.
/// Steps before it have been applied and journaled.
pub fn apply(
    plan: &SyncPlan,
    published: &mut GraphStore,
    journal: &mut Journal,
    now: DateTime<Utc>,
) -> Result<ApplyReport, ExecuteError> {
    let mut report = ApplyReport::default();
    journal.append_checkpoint(format!("apply {} ({} steps)", plan.root, plan.step_count()));

    for (index, step) in plan.steps.iter().enumerate() {
        #[cfg(any(test, feature = "fault_injection"))]
        if super::engine_hooks::should_fail_step(index) {
            return Err(ExecuteError::Injected(index));
        }

        trace!(index, step = %step.description(), "applying step");
        apply_step(step, published, journal, now, &mut report)
            .map_err(|source| ExecuteError::Step { index, source })?;
    }

    debug!(
        root = %plan.root,
        created = report.created,
        updated = report.updated,
        deleted = report.deleted,
        "plan applied"
    );
    Ok(report)
}

fn apply_step(
    step: &SyncStep,
    published: &mut GraphStore,
    journal: &mut Journal,
    now: DateTime<Utc>,
    report: &mut ApplyReport,
) -> Result<(), GraphError> {
    match step {
        SyncStep::CreateNode {
            id,
            parent,
            content,
        } => {
            journal.append_node_write(published.before_image(*id));
            published.insert_node(*id, *parent, content.clone(), now)?;
            report.created += 1;
        }
        SyncStep::MoveNode { id, to, .. } => {
            journal.append_node_write(published.before_image(*id));
            published.set_parent(*id, *to)?;
            report.updated += 1;
        }
        SyncStep::UpdateNode { id, content } => {
            journal.append_node_write(published.before_image(*id));
            published.replace_content(*id, content.clone(), now)?;
            report.updated += 1;
        }
        SyncStep::DeleteSubtree { id } => {
            published.get_live(*id)?;
            let mut targets = vec![*id];
            targets.extend(published.descendants(*id));
            for target in &targets {
                journal.append_node_write(published.before_image(*target));
            }
            report.deleted += published.delete_subtree(*id, now)?.len();
        }
    }
    Ok(())
}
