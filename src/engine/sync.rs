//! engine::sync
//!
//! Reconciles draft subtrees into the published store.
//!
//! # Architecture
//!
//! One sync attempt for a root runs these phases:
//!
//! ```text
//! Claim -> LockCheck -> Plan -> Idempotency -> Apply -> Verify -> Record
//!                                                 |         |        |
//!                                                 +---------+--------+--> Rollback
//! ```
//!
//! - **Claim**: per-root exclusion; a second attempt on the same root is
//!   deferred immediately.
//! - **LockCheck**: any valid lease in the draft subtree defers the root
//!   and queues it for the retry cycle.
//! - **Idempotency**: the latest ledger record for the root already
//!   carries the current draft fingerprint and the published subtree still
//!   matches it, nothing to do.
//! - **Plan/Apply/Verify/Record**: run under the published write lock, so
//!   readers never see a half-applied subtree and the ledger record is
//!   linearized with the apply it describes.
//!
//! Failures are tracked per root in [`SyncState`] with exponential backoff.
//! A root that keeps failing is flagged for review and left alone until
//! [`SyncEngine::clear_review`].
//!
//! # Invariants
//!
//! - Lock order is published then draft
//! - A failed attempt leaves the published store as it was
//! - A successful attempt writes exactly one ledger record
//!
//! # Example
//!
//! ```ignore
//! let engine = SyncEngine::new(draft, published, ledger, clock, grace, policy);
//! let report = engine.sync(SyncTarget::All);
//! println!("{} applied, {} failed", report.applied(), report.failed());
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::exec::{self, ExecuteError};
use super::ledger::{LedgerError, TransactionLedger, TransactionRecord};
use super::plan::{plan_subtree, sync_fingerprint, PlanError, SyncPlan, SyncStep};
use super::rollback::rollback_journal;
use crate::assets::AssetRequest;
use crate::core::clock::SharedClock;
use crate::core::config::SyncPolicy;
use crate::core::graph::{GraphError, GraphStore, SharedStore};
use crate::core::ops::journal::Journal;
use crate::core::ops::lease::lease_is_held;
use crate::core::types::NodeId;

/// Errors from a sync attempt.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The draft subtree changed while it was being applied.
    #[error("draft subtree {root} changed during sync")]
    Conflict { root: NodeId },

    /// The ledger record could not be written; the apply was undone.
    #[error("ledger write failed: {0}")]
    Ledger(#[from] LedgerError),

    /// A store operation failed outside the apply.
    #[error("store error: {0}")]
    Graph(#[from] GraphError),

    /// The root's draft parent has no published counterpart yet.
    #[error("node {root} cannot be published before its parent {parent}")]
    ParentNotPublished { root: NodeId, parent: NodeId },

    /// Placing the root under its draft parent would form a cycle in
    /// published.
    #[error(
        "placing {root} under {parent} would form a cycle through {through}; \
         sync the draft root above {parent} first"
    )]
    PlacementCycle {
        root: NodeId,
        parent: NodeId,
        through: NodeId,
    },

    /// A plan step failed; the apply was undone.
    #[error("apply failed: {0}")]
    Apply(#[from] ExecuteError),

    /// The attempt stopped between apply and ledger write.
    #[error("sync of {root} interrupted before the ledger write")]
    Interrupted { root: NodeId },
}

impl From<PlanError> for SyncError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::ParentNotPublished { root, parent } => {
                SyncError::ParentNotPublished { root, parent }
            }
            PlanError::PlacementCycle {
                root,
                parent,
                through,
            } => SyncError::PlacementCycle {
                root,
                parent,
                through,
            },
        }
    }
}

/// What to synchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    /// One draft subtree.
    Root(NodeId),
    /// Every draft forest root, plus every published root gone from draft.
    All,
}

/// Why an attempt did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// A node of the subtree holds a valid lease.
    Locked { node: NodeId },
    /// Another attempt on the same root is running.
    InProgress,
    /// The root failed too often and waits for an operator.
    UnderReview,
}

/// Result of one sync attempt.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Changes were published (or a missing ledger record was written).
    Applied {
        record: TransactionRecord,
        assets: Vec<AssetRequest>,
    },
    /// The ledger already holds the current fingerprint.
    AlreadyApplied,
    /// The attempt was skipped and may be retried.
    Deferred { reason: DeferReason },
    /// The attempt failed and was rolled back.
    Failed {
        error: SyncError,
        attempts: u32,
        flagged: bool,
    },
}

impl SyncOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, SyncOutcome::Applied { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SyncOutcome::Failed { .. })
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, SyncOutcome::Deferred { .. })
    }
}

/// Outcomes of a batch of attempts, in attempt order.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub outcomes: Vec<(NodeId, SyncOutcome)>,
}

impl SyncReport {
    pub fn applied(&self) -> usize {
        self.count(SyncOutcome::is_applied)
    }

    pub fn already_applied(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::AlreadyApplied))
    }

    pub fn deferred(&self) -> usize {
        self.count(SyncOutcome::is_deferred)
    }

    pub fn failed(&self) -> usize {
        self.count(SyncOutcome::is_failed)
    }

    pub fn outcome(&self, root: NodeId) -> Option<&SyncOutcome> {
        self.outcomes
            .iter()
            .find(|(r, _)| *r == root)
            .map(|(_, o)| o)
    }

    /// Asset requests from every applied root.
    pub fn assets(&self) -> Vec<AssetRequest> {
        self.outcomes
            .iter()
            .filter_map(|(_, o)| match o {
                SyncOutcome::Applied { assets, .. } => Some(assets.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn count(&self, f: impl Fn(&SyncOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| f(o)).count()
    }
}

// ============================================================================
// Failure tracking
// ============================================================================

/// A root waiting for the retry cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRetry {
    /// Consecutive failures; deferrals do not count.
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A root that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFlag {
    pub attempts: u32,
    pub flagged_at: DateTime<Utc>,
    pub last_error: String,
}

/// Persistent retry and review state, stored as `sync-state.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub pending: BTreeMap<NodeId, PendingRetry>,
    #[serde(default)]
    pub review: BTreeMap<NodeId, ReviewFlag>,
}

impl SyncState {
    /// Delay before retry number `attempts + 1`.
    pub fn backoff(policy: &SyncPolicy, attempts: u32) -> Duration {
        let factor = 1i64
            .checked_shl(attempts.saturating_sub(1))
            .filter(|f| *f > 0)
            .unwrap_or(i64::MAX);
        let millis = policy
            .backoff_base
            .num_milliseconds()
            .saturating_mul(factor);
        Duration::milliseconds(millis.min(policy.backoff_max.num_milliseconds()))
    }

    /// Queue a root without counting a failure.
    fn defer(&mut self, root: NodeId, now: DateTime<Utc>) {
        self.pending.entry(root).or_insert(PendingRetry {
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
        });
    }

    /// Count a failure. Returns the attempt count and whether the root is
    /// now flagged for review.
    fn record_failure(
        &mut self,
        root: NodeId,
        error: String,
        now: DateTime<Utc>,
        policy: &SyncPolicy,
    ) -> (u32, bool) {
        let entry = self.pending.entry(root).or_insert(PendingRetry {
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
        });
        entry.attempts += 1;
        let attempts = entry.attempts;

        if attempts >= policy.max_attempts {
            self.pending.remove(&root);
            self.review.insert(
                root,
                ReviewFlag {
                    attempts,
                    flagged_at: now,
                    last_error: error,
                },
            );
            return (attempts, true);
        }

        entry.next_attempt_at = now + Self::backoff(policy, attempts);
        entry.last_error = Some(error);
        (attempts, false)
    }

    fn record_success(&mut self, root: NodeId) {
        self.pending.remove(&root);
    }

    /// Pending roots whose retry time has come.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<NodeId> {
        self.pending
            .iter()
            .filter(|(root, p)| p.next_attempt_at <= now && !self.review.contains_key(root))
            .map(|(root, _)| *root)
            .collect()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Holds a root's claim until dropped.
struct ClaimGuard<'a> {
    claims: &'a Mutex<HashSet<NodeId>>,
    root: NodeId,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.root);
    }
}

enum Attempt {
    Applied {
        record: TransactionRecord,
        assets: Vec<AssetRequest>,
    },
    Skipped,
}

/// The synchronization engine.
pub struct SyncEngine {
    draft: SharedStore,
    published: SharedStore,
    ledger: Arc<TransactionLedger>,
    clock: SharedClock,
    grace: Duration,
    policy: SyncPolicy,
    claims: Mutex<HashSet<NodeId>>,
    state: Mutex<SyncState>,
}

impl SyncEngine {
    pub fn new(
        draft: SharedStore,
        published: SharedStore,
        ledger: Arc<TransactionLedger>,
        clock: SharedClock,
        grace: Duration,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            draft,
            published,
            ledger,
            clock,
            grace,
            policy,
            claims: Mutex::new(HashSet::new()),
            state: Mutex::new(SyncState::default()),
        }
    }

    /// Builder-style restore of persisted retry state.
    pub fn with_state(self, state: SyncState) -> Self {
        *self.state.lock() = state;
        self
    }

    pub fn ledger(&self) -> &Arc<TransactionLedger> {
        &self.ledger
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Copy of the retry and review state.
    pub fn state(&self) -> SyncState {
        self.state.lock().clone()
    }

    /// Roots flagged for manual review.
    pub fn review_flags(&self) -> Vec<(NodeId, ReviewFlag)> {
        self.state
            .lock()
            .review
            .iter()
            .map(|(root, flag)| (*root, flag.clone()))
            .collect()
    }

    /// Lift a review flag and queue the root for the next retry cycle.
    ///
    /// Returns whether the root was flagged.
    pub fn clear_review(&self, root: NodeId) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.review.remove(&root).is_none() {
            return false;
        }
        state.defer(root, now);
        info!(%root, "review flag cleared");
        true
    }

    /// Roots `target` expands to.
    pub fn roots_for(&self, target: SyncTarget) -> Vec<NodeId> {
        match target {
            SyncTarget::Root(root) => vec![root],
            SyncTarget::All => {
                let published = self.published.read();
                let draft = self.draft.read();
                let mut roots = draft.roots();
                roots.extend(
                    published
                        .roots()
                        .into_iter()
                        .filter(|r| !draft.is_live(*r)),
                );
                roots
            }
        }
    }

    /// Plans for `target` without applying them.
    pub fn plan_only(&self, target: SyncTarget) -> Result<Vec<SyncPlan>, SyncError> {
        let roots = self.roots_for(target);
        let published = self.published.read();
        let draft = self.draft.read();
        roots
            .into_iter()
            .map(|root| plan_subtree(&draft, &published, root).map_err(SyncError::from))
            .collect()
    }

    /// Synchronize every root of `target`.
    pub fn sync(&self, target: SyncTarget) -> SyncReport {
        let roots = self.roots_for(target);
        let outcomes = roots
            .into_iter()
            .map(|root| (root, self.sync_root(root)))
            .collect();
        SyncReport { outcomes }
    }

    /// Retry every pending root whose backoff has elapsed.
    pub fn retry_pending(&self) -> SyncReport {
        let due = self.state.lock().due(self.clock.now());
        if !due.is_empty() {
            debug!(roots = due.len(), "retrying pending syncs");
        }
        let outcomes = due
            .into_iter()
            .map(|root| (root, self.sync_root(root)))
            .collect();
        SyncReport { outcomes }
    }

    /// Synchronize one draft subtree.
    ///
    /// `root` may be any draft node, not just a forest root. When the
    /// published store already mirrors the subtree but the ledger has no
    /// record for it, the attempt applies nothing and appends a record with
    /// zero counts. That is how an apply interrupted before its ledger
    /// write is completed, and it also happens the first time a node is
    /// synced on its own after an ancestor's sync already published it.
    /// Either way the next attempt is skipped.
    pub fn sync_root(&self, root: NodeId) -> SyncOutcome {
        if self.state.lock().review.contains_key(&root) {
            return SyncOutcome::Deferred {
                reason: DeferReason::UnderReview,
            };
        }
        let Some(_claim) = self.claim(root) else {
            debug!(%root, "sync already in progress");
            return SyncOutcome::Deferred {
                reason: DeferReason::InProgress,
            };
        };

        let now = self.clock.now();
        if let Some(node) = self.locked_node(root, now) {
            info!(%root, %node, "sync deferred, subtree is locked");
            self.state.lock().defer(root, now);
            return SyncOutcome::Deferred {
                reason: DeferReason::Locked { node },
            };
        }

        match self.attempt(root) {
            Ok(Attempt::Applied { record, assets }) => {
                self.state.lock().record_success(root);
                info!(
                    %root,
                    operation = %record.operation,
                    created = record.created,
                    updated = record.updated,
                    deleted = record.deleted,
                    "subtree published"
                );
                SyncOutcome::Applied { record, assets }
            }
            Ok(Attempt::Skipped) => {
                self.state.lock().record_success(root);
                debug!(%root, "already applied");
                SyncOutcome::AlreadyApplied
            }
            Err(error) => {
                let (attempts, flagged) = self.state.lock().record_failure(
                    root,
                    error.to_string(),
                    self.clock.now(),
                    &self.policy,
                );
                if flagged {
                    error!(%root, attempts, error = %error, "sync flagged for review");
                } else {
                    warn!(%root, attempts, error = %error, "sync failed");
                }
                SyncOutcome::Failed {
                    error,
                    attempts,
                    flagged,
                }
            }
        }
    }

    fn claim(&self, root: NodeId) -> Option<ClaimGuard<'_>> {
        if !self.claims.lock().insert(root) {
            return None;
        }
        Some(ClaimGuard {
            claims: &self.claims,
            root,
        })
    }

    fn locked_node(&self, root: NodeId, now: DateTime<Utc>) -> Option<NodeId> {
        let draft = self.draft.read();
        std::iter::once(root)
            .chain(draft.descendants(root))
            .find(|id| {
                draft
                    .get_live(*id)
                    .is_ok_and(|n| lease_is_held(n.lease.as_ref(), now, self.grace))
            })
    }

    fn attempt(&self, root: NodeId) -> Result<Attempt, SyncError> {
        let mut published = self.published.write();
        let plan = {
            let draft = self.draft.read();
            plan_subtree(&draft, &published, root)?
        };
        // A ledger hit only counts while published still mirrors the draft.
        if self.ledger.has_applied(&plan.key())
            && sync_fingerprint(&published, root) == plan.fingerprint
        {
            return Ok(Attempt::Skipped);
        }
        debug!(%root, steps = plan.step_count(), fingerprint = %plan.fingerprint.short(), "plan ready");

        #[cfg(any(test, feature = "fault_injection"))]
        super::engine_hooks::invoke_before_apply(root);

        let now = self.clock.now();
        let mut journal = Journal::new(format!("sync {}", root));
        let report = match exec::apply(&plan, &mut published, &mut journal, now) {
            Ok(report) => report,
            Err(e) => {
                undo(&mut published, &mut journal);
                return Err(e.into());
            }
        };

        let current = sync_fingerprint(&self.draft.read(), root);
        if current != plan.fingerprint {
            undo(&mut published, &mut journal);
            return Err(SyncError::Conflict { root });
        }

        #[cfg(any(test, feature = "fault_injection"))]
        if super::engine_hooks::take_crash_after_apply() {
            warn!(%root, "simulated crash between apply and ledger write");
            return Err(SyncError::Interrupted { root });
        }

        if plan.is_empty() {
            info!(%root, "published state current, recording missing ledger entry");
        }
        let record = TransactionRecord::new(root, plan.operation, plan.fingerprint.clone(), now)
            .with_counts(report.created, report.updated, report.deleted);
        let record = match self.ledger.record(record) {
            Ok(record) => record,
            Err(e) => {
                undo(&mut published, &mut journal);
                return Err(e.into());
            }
        };
        journal.commit();
        drop(published);

        Ok(Attempt::Applied {
            record,
            assets: asset_requests(&plan),
        })
    }
}

fn undo(published: &mut GraphStore, journal: &mut Journal) {
    let result = rollback_journal(published, journal);
    if result.is_complete() {
        debug!(op = %journal.op_id, "{}", result.summary());
    } else {
        error!(op = %journal.op_id, "{}", result.summary());
    }
}

fn asset_requests(plan: &SyncPlan) -> Vec<AssetRequest> {
    plan.steps
        .iter()
        .flat_map(|step| match step {
            SyncStep::CreateNode { id, content, .. } | SyncStep::UpdateNode { id, content } => {
                AssetRequest::for_content(*id, content)
            }
            SyncStep::MoveNode { .. } | SyncStep::DeleteSubtree { .. } => vec![],
        })
        .collect()
}
