//! engine::retention
//!
//! Purges tombstones and stale leases past the retention window.
//!
//! A draft tombstone is only purged once its published counterpart is gone
//! or tombstoned too, so an unsynchronized deletion is never lost. Each
//! purge takes one store's write lock for one subtree; the job never holds
//! the draft and published locks together.
//!
//! The job is re-entrant: running it twice in a row finds nothing the
//! second time.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::graph::{GraphStore, Node, SharedStore};
use crate::core::ops::lease::LockManager;
use crate::core::types::NodeId;

/// What one retention run removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    /// Draft records physically removed.
    pub draft_purged: usize,
    /// Published records physically removed.
    pub published_purged: usize,
    pub leases_cleared: usize,
}

impl RetentionReport {
    pub fn is_empty(&self) -> bool {
        self.draft_purged == 0 && self.published_purged == 0 && self.leases_cleared == 0
    }
}

/// The retention job.
#[derive(Debug, Clone)]
pub struct RetentionJob {
    draft: SharedStore,
    published: SharedStore,
    locks: LockManager,
    window: Duration,
}

impl RetentionJob {
    pub fn new(
        draft: SharedStore,
        published: SharedStore,
        locks: LockManager,
        window: Duration,
    ) -> Self {
        Self {
            draft,
            published,
            locks,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Run one retention pass as of `now`.
    pub fn run(&self, now: DateTime<Utc>) -> RetentionReport {
        let cutoff = now - self.window;
        let report = RetentionReport {
            published_purged: self.purge_published(cutoff),
            draft_purged: self.purge_draft(cutoff),
            leases_cleared: self.locks.clear_expired(cutoff),
        };

        if report.is_empty() {
            debug!(%cutoff, "retention found nothing to purge");
        } else {
            info!(
                draft = report.draft_purged,
                published = report.published_purged,
                leases = report.leases_cleared,
                "retention pass complete"
            );
        }
        report
    }

    fn purge_published(&self, cutoff: DateTime<Utc>) -> usize {
        let candidates = expired_tombstone_roots(&self.published.read(), cutoff);
        let mut purged = 0;
        for root in candidates {
            let mut published = self.published.write();
            if !is_expired_tombstone_root(&published, root, cutoff) {
                continue;
            }
            match published.purge_subtree(root) {
                Ok(removed) => purged += removed.len(),
                Err(e) => warn!(%root, error = %e, "failed to purge published tombstone"),
            }
        }
        purged
    }

    fn purge_draft(&self, cutoff: DateTime<Utc>) -> usize {
        let candidates = expired_tombstone_roots(&self.draft.read(), cutoff);
        let mut purged = 0;
        for root in candidates {
            let ids = self.draft.read().subtree_ids(root);
            let synchronized = {
                let published = self.published.read();
                ids.iter()
                    .all(|id| published.get(*id).map_or(true, Node::is_tombstoned))
            };
            if !synchronized {
                debug!(%root, "draft tombstone not yet synchronized, keeping");
                continue;
            }

            let mut draft = self.draft.write();
            if !is_expired_tombstone_root(&draft, root, cutoff) {
                continue;
            }
            match draft.purge_subtree(root) {
                Ok(removed) => purged += removed.len(),
                Err(e) => warn!(%root, error = %e, "failed to purge draft tombstone"),
            }
        }
        purged
    }
}

/// Tops of fully tombstoned subtrees deleted at or before `cutoff`.
fn expired_tombstone_roots(store: &GraphStore, cutoff: DateTime<Utc>) -> Vec<NodeId> {
    let mut roots: Vec<NodeId> = store
        .nodes()
        .map(|n| n.id)
        .filter(|id| is_expired_tombstone_root(store, *id, cutoff))
        .collect();
    roots.sort();
    roots
}

fn is_expired_tombstone_root(store: &GraphStore, id: NodeId, cutoff: DateTime<Utc>) -> bool {
    let expired = |id: &NodeId| {
        store
            .get(*id)
            .and_then(|n| n.tombstoned_at)
            .is_some_and(|at| at <= cutoff)
    };
    if !expired(&id) {
        return false;
    }
    let parent_tombstoned = store
        .parent(id)
        .and_then(|p| store.get(p))
        .is_some_and(Node::is_tombstoned);
    !parent_tombstoned && store.subtree_ids(id).iter().all(expired)
}
