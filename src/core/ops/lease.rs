//! core::ops::lease
//!
//! Time-bounded edit leases on draft nodes.
//!
//! # Architecture
//!
//! A lease lives inside the draft node record ([`Node::lease`]). Nothing
//! caches whether a node is locked: every caller evaluates
//! [`lease_is_held`] against the shared [`Clock`] at call time.
//!
//! A lease counts as held only while `expires_at > now + grace`. A lease
//! that will expire within the grace window is already treated as released,
//! so a holder whose lease is about to lapse cannot race a new holder.
//!
//! Acquisition is a compare-and-set on the node's lease field. The decision
//! is made against an observed value and committed only if the stored value
//! is unchanged; a lost race re-reads and re-decides.
//!
//! # Invariants
//!
//! - At most one holder has a valid lease on a node at any instant
//! - Renewal never resurrects an expired lease
//! - Release by a non-holder never clears a valid lease
//!
//! [`Node::lease`]: crate::core::graph::Node
//! [`Clock`]: crate::core::clock::Clock

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::core::clock::SharedClock;
use crate::core::graph::{GraphError, GraphStore, SharedStore};
use crate::core::types::{HolderId, NodeId};

/// Number of compare-and-set attempts before giving up.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Errors from lease operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LeaseError {
    /// Another holder's lease is currently valid.
    #[error("node is locked by {holder} until {expires_at}")]
    Held {
        holder: HolderId,
        expires_at: DateTime<Utc>,
    },

    /// Node is absent or tombstoned.
    #[error("node {0} not found")]
    NotFound(NodeId),

    /// The caller's lease lapsed (grace window included).
    #[error("lease on node {0} has expired")]
    Expired(NodeId),

    /// The caller holds no lease on the node.
    #[error("no lease held on node {node} by {holder}")]
    NotHeld { node: NodeId, holder: HolderId },

    /// TTL is zero, negative, or above the configured maximum.
    #[error("invalid lease ttl {requested}s (must be 1..={max}s)")]
    InvalidTtl { requested: i64, max: i64 },

    /// Too many concurrent writers on the lease field.
    #[error("lease on node {0} is contended, retry later")]
    Contended(NodeId),

    #[error(transparent)]
    Graph(GraphError),
}

impl From<GraphError> for LeaseError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::NotFound(id) => LeaseError::NotFound(id),
            other => LeaseError::Graph(other),
        }
    }
}

/// A lease record stored on a draft node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: HolderId,
    /// Changes on every acquire and renew.
    pub token: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Receipt handed to the caller on acquire or renew.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaseToken {
    pub node: NodeId,
    pub holder: HolderId,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Lease timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseConfig {
    pub grace: Duration,
    pub default_ttl: Duration,
    pub max_ttl: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            grace: Duration::seconds(5),
            default_ttl: Duration::seconds(300),
            max_ttl: Duration::seconds(3600),
        }
    }
}

/// Whether `lease` is valid at `now`.
///
/// This is the only place the grace rule is written down.
pub fn lease_is_held(lease: Option<&Lease>, now: DateTime<Utc>, grace: Duration) -> bool {
    match lease {
        Some(lease) => lease.expires_at > now + grace,
        None => false,
    }
}

/// Succeed only if `holder` has a valid lease on `node` in `store`.
///
/// For callers that already hold the store lock and must check and mutate
/// in one critical section.
pub fn check_held_by(
    store: &GraphStore,
    node: NodeId,
    holder: &HolderId,
    now: DateTime<Utc>,
    grace: Duration,
) -> Result<(), LeaseError> {
    let lease = store.lease(node)?;
    let valid = lease_is_held(lease, now, grace);
    match lease {
        Some(l) if &l.holder == holder && valid => Ok(()),
        Some(l) if &l.holder == holder => Err(LeaseError::Expired(node)),
        Some(l) if valid => Err(LeaseError::Held {
            holder: l.holder.clone(),
            expires_at: l.expires_at,
        }),
        _ => Err(LeaseError::NotHeld {
            node,
            holder: holder.clone(),
        }),
    }
}

/// Succeed unless a holder other than `holder` has a valid lease on
/// `node`.
///
/// Used for nodes an operation moves but does not edit.
pub fn check_free_for(
    store: &GraphStore,
    node: NodeId,
    holder: &HolderId,
    now: DateTime<Utc>,
    grace: Duration,
) -> Result<(), LeaseError> {
    match store.lease(node)? {
        Some(l) if &l.holder != holder && lease_is_held(Some(l), now, grace) => {
            Err(LeaseError::Held {
                holder: l.holder.clone(),
                expires_at: l.expires_at,
            })
        }
        _ => Ok(()),
    }
}

/// Grants, renews, and releases leases on the draft store.
#[derive(Debug, Clone)]
pub struct LockManager {
    draft: SharedStore,
    clock: SharedClock,
    config: LeaseConfig,
}

enum Decision {
    Write(Option<Lease>),
    Done,
}

impl LockManager {
    pub fn new(draft: SharedStore, clock: SharedClock, config: LeaseConfig) -> Self {
        Self {
            draft,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    fn check_ttl(&self, ttl: Duration) -> Result<(), LeaseError> {
        if ttl <= Duration::zero() || ttl > self.config.max_ttl {
            return Err(LeaseError::InvalidTtl {
                requested: ttl.num_seconds(),
                max: self.config.max_ttl.num_seconds(),
            });
        }
        Ok(())
    }

    /// Observe, decide, compare-and-set; retry on a lost race.
    fn cas_loop<F>(&self, node: NodeId, mut decide: F) -> Result<(), LeaseError>
    where
        F: FnMut(Option<&Lease>, DateTime<Utc>) -> Result<Decision, LeaseError>,
    {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let observed = self.draft.read().lease(node)?.cloned();
            let now = self.clock.now();

            let new = match decide(observed.as_ref(), now)? {
                Decision::Write(new) => new,
                Decision::Done => return Ok(()),
            };

            if self
                .draft
                .write()
                .compare_and_set_lease(node, observed.as_ref(), new)?
            {
                return Ok(());
            }
            debug!(node = %node, attempt, "lease compare-and-set lost race");
        }
        Err(LeaseError::Contended(node))
    }

    /// Acquire (or refresh) a lease for `holder`.
    ///
    /// # Errors
    ///
    /// - [`LeaseError::Held`] if another holder's lease is valid
    /// - [`LeaseError::InvalidTtl`] if `ttl` is out of range
    /// - [`LeaseError::NotFound`] if the node is absent or tombstoned
    /// - [`LeaseError::Contended`] after repeated lost races
    pub fn acquire(
        &self,
        node: NodeId,
        holder: &HolderId,
        ttl: Duration,
    ) -> Result<LeaseToken, LeaseError> {
        self.check_ttl(ttl)?;
        let grace = self.config.grace;
        let mut granted = None;

        self.cas_loop(node, |observed, now| {
            if let Some(current) = observed {
                if lease_is_held(Some(current), now, grace) && &current.holder != holder {
                    return Err(LeaseError::Held {
                        holder: current.holder.clone(),
                        expires_at: current.expires_at,
                    });
                }
            }
            let lease = Lease {
                holder: holder.clone(),
                token: Uuid::new_v4(),
                acquired_at: now,
                expires_at: now + ttl,
            };
            granted = Some(lease.clone());
            Ok(Decision::Write(Some(lease)))
        })?;

        let lease = granted.ok_or(LeaseError::Contended(node))?;
        debug!(node = %node, holder = %holder, expires_at = %lease.expires_at, "lease acquired");
        Ok(LeaseToken {
            node,
            holder: lease.holder,
            token: lease.token,
            expires_at: lease.expires_at,
        })
    }

    /// Extend the caller's still-valid lease to `now + ttl`.
    ///
    /// # Errors
    ///
    /// - [`LeaseError::Expired`] if the caller's lease lapsed
    /// - [`LeaseError::Held`] if someone else holds the node
    /// - [`LeaseError::NotHeld`] if there is no lease at all
    pub fn renew(
        &self,
        node: NodeId,
        holder: &HolderId,
        ttl: Duration,
    ) -> Result<LeaseToken, LeaseError> {
        self.check_ttl(ttl)?;
        let grace = self.config.grace;
        let mut granted = None;

        self.cas_loop(node, |observed, now| {
            let current = observed.ok_or_else(|| LeaseError::NotHeld {
                node,
                holder: holder.clone(),
            })?;
            let valid = lease_is_held(Some(current), now, grace);
            if &current.holder != holder {
                return Err(if valid {
                    LeaseError::Held {
                        holder: current.holder.clone(),
                        expires_at: current.expires_at,
                    }
                } else {
                    LeaseError::NotHeld {
                        node,
                        holder: holder.clone(),
                    }
                });
            }
            if !valid {
                return Err(LeaseError::Expired(node));
            }
            let lease = Lease {
                holder: holder.clone(),
                token: Uuid::new_v4(),
                acquired_at: current.acquired_at,
                expires_at: now + ttl,
            };
            granted = Some(lease.clone());
            Ok(Decision::Write(Some(lease)))
        })?;

        let lease = granted.ok_or(LeaseError::Contended(node))?;
        debug!(node = %node, holder = %holder, expires_at = %lease.expires_at, "lease renewed");
        Ok(LeaseToken {
            node,
            holder: lease.holder,
            token: lease.token,
            expires_at: lease.expires_at,
        })
    }

    /// Release the caller's lease.
    ///
    /// Releasing an expired or absent lease is a no-op.
    pub fn release(&self, node: NodeId, holder: &HolderId) -> Result<(), LeaseError> {
        let grace = self.config.grace;
        self.cas_loop(node, |observed, now| match observed {
            None => Ok(Decision::Done),
            Some(current) if &current.holder == holder => Ok(Decision::Write(None)),
            Some(current) if lease_is_held(Some(current), now, grace) => Err(LeaseError::Held {
                holder: current.holder.clone(),
                expires_at: current.expires_at,
            }),
            Some(_) => Ok(Decision::Done),
        })?;
        debug!(node = %node, holder = %holder, "lease released");
        Ok(())
    }

    /// Whether any holder has a valid lease on `node`.
    pub fn is_locked(&self, node: NodeId) -> Result<bool, LeaseError> {
        let store = self.draft.read();
        Ok(lease_is_held(
            store.lease(node)?,
            self.clock.now(),
            self.config.grace,
        ))
    }

    /// The valid holder of `node`, if any.
    pub fn holder_of(&self, node: NodeId) -> Result<Option<HolderId>, LeaseError> {
        let store = self.draft.read();
        let lease = store.lease(node)?;
        if lease_is_held(lease, self.clock.now(), self.config.grace) {
            Ok(lease.map(|l| l.holder.clone()))
        } else {
            Ok(None)
        }
    }

    /// Succeed only if `holder` has a valid lease on `node`.
    pub fn ensure_held_by(&self, node: NodeId, holder: &HolderId) -> Result<(), LeaseError> {
        let store = self.draft.read();
        check_held_by(&store, node, holder, self.clock.now(), self.config.grace)
    }

    /// Drop lease records that expired at or before `older_than`.
    ///
    /// Returns the number of leases cleared.
    pub fn clear_expired(&self, older_than: DateTime<Utc>) -> usize {
        let stale: Vec<(NodeId, Lease)> = {
            let store = self.draft.read();
            store
                .nodes()
                .filter(|n| !n.is_tombstoned())
                .filter_map(|n| n.lease.clone().map(|l| (n.id, l)))
                .filter(|(_, l)| l.expires_at <= older_than)
                .collect()
        };

        let mut store = self.draft.write();
        stale
            .into_iter()
            .filter(|(id, lease)| {
                matches!(store.compare_and_set_lease(*id, Some(lease), None), Ok(true))
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::clock::Clock;
    use crate::core::graph::{shared, GraphStore, StoreKind};
    use crate::core::types::{EntityOrder, EntityType};
    use std::sync::Arc;

    struct Fixture {
        clock: ManualClock,
        locks: LockManager,
        node: NodeId,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::default();
        let mut store = GraphStore::new(StoreKind::Draft);
        let node = store
            .create_node(None, EntityType::Content, EntityOrder(0), clock.now())
            .unwrap();
        let draft = shared(store);
        let locks = LockManager::new(draft, Arc::new(clock.clone()), LeaseConfig::default());
        Fixture { clock, locks, node }
    }

    fn holder(name: &str) -> HolderId {
        HolderId::new(name).unwrap()
    }

    #[test]
    fn grace_rule_boundary() {
        let now = ManualClock::default().now();
        let grace = Duration::seconds(5);
        let lease = |secs| Lease {
            holder: holder("a"),
            token: Uuid::nil(),
            acquired_at: now,
            expires_at: now + Duration::seconds(secs),
        };
        assert!(!lease_is_held(None, now, grace));
        assert!(!lease_is_held(Some(&lease(5)), now, grace));
        assert!(lease_is_held(Some(&lease(6)), now, grace));
        assert!(!lease_is_held(Some(&lease(-1)), now, grace));
    }

    #[test]
    fn second_holder_blocked_until_expiry() {
        let f = fixture();
        f.locks
            .acquire(f.node, &holder("user1"), Duration::seconds(30))
            .unwrap();

        let err = f
            .locks
            .acquire(f.node, &holder("user2"), Duration::seconds(30))
            .unwrap_err();
        assert!(matches!(err, LeaseError::Held { ref holder, .. } if holder.as_str() == "user1"));

        f.clock.advance(Duration::seconds(30));
        let token = f
            .locks
            .acquire(f.node, &holder("user2"), Duration::seconds(30))
            .unwrap();
        assert_eq!(token.holder.as_str(), "user2");
    }

    #[test]
    fn short_lease_is_unlocked_within_grace() {
        let f = fixture();
        f.locks
            .acquire(f.node, &holder("user1"), Duration::seconds(3))
            .unwrap();
        f.clock.advance(Duration::seconds(1));
        assert!(!f.locks.is_locked(f.node).unwrap());
        assert_eq!(f.locks.holder_of(f.node).unwrap(), None);
    }

    #[test]
    fn reacquire_by_holder_refreshes() {
        let f = fixture();
        let first = f
            .locks
            .acquire(f.node, &holder("user1"), Duration::seconds(30))
            .unwrap();
        f.clock.advance(Duration::seconds(10));
        let second = f
            .locks
            .acquire(f.node, &holder("user1"), Duration::seconds(30))
            .unwrap();
        assert!(second.expires_at > first.expires_at);
        assert_ne!(second.token, first.token);
    }

    #[test]
    fn invalid_ttl_rejected() {
        let f = fixture();
        let h = holder("user1");
        assert!(matches!(
            f.locks.acquire(f.node, &h, Duration::zero()),
            Err(LeaseError::InvalidTtl { .. })
        ));
        assert!(matches!(
            f.locks.acquire(f.node, &h, Duration::hours(2)),
            Err(LeaseError::InvalidTtl { .. })
        ));
    }

    #[test]
    fn renew_extends_valid_lease() {
        let f = fixture();
        let h = holder("user1");
        f.locks.acquire(f.node, &h, Duration::seconds(30)).unwrap();
        f.clock.advance(Duration::seconds(20));
        let token = f.locks.renew(f.node, &h, Duration::seconds(60)).unwrap();
        assert_eq!(token.expires_at, f.clock.now() + Duration::seconds(60));
    }

    #[test]
    fn renew_after_grace_is_expired() {
        let f = fixture();
        let h = holder("user1");
        f.locks.acquire(f.node, &h, Duration::seconds(30)).unwrap();
        f.clock.advance(Duration::seconds(26));
        assert_eq!(
            f.locks.renew(f.node, &h, Duration::seconds(30)),
            Err(LeaseError::Expired(f.node))
        );
    }

    #[test]
    fn renew_by_other_is_held() {
        let f = fixture();
        f.locks
            .acquire(f.node, &holder("user1"), Duration::seconds(30))
            .unwrap();
        assert!(matches!(
            f.locks.renew(f.node, &holder("user2"), Duration::seconds(30)),
            Err(LeaseError::Held { .. })
        ));
    }

    #[test]
    fn release_semantics() {
        let f = fixture();
        let a = holder("user1");
        let b = holder("user2");

        // nothing to release
        f.locks.release(f.node, &a).unwrap();

        f.locks.acquire(f.node, &a, Duration::seconds(30)).unwrap();
        assert!(matches!(
            f.locks.release(f.node, &b),
            Err(LeaseError::Held { .. })
        ));
        assert!(f.locks.is_locked(f.node).unwrap());

        f.locks.release(f.node, &a).unwrap();
        assert!(!f.locks.is_locked(f.node).unwrap());
    }

    #[test]
    fn release_by_other_after_expiry_is_noop() {
        let f = fixture();
        f.locks
            .acquire(f.node, &holder("user1"), Duration::seconds(10))
            .unwrap();
        f.clock.advance(Duration::seconds(10));
        f.locks.release(f.node, &holder("user2")).unwrap();
    }

    #[test]
    fn ensure_held_by_reports_reason() {
        let f = fixture();
        let a = holder("user1");
        assert!(matches!(
            f.locks.ensure_held_by(f.node, &a),
            Err(LeaseError::NotHeld { .. })
        ));
        f.locks.acquire(f.node, &a, Duration::seconds(30)).unwrap();
        f.locks.ensure_held_by(f.node, &a).unwrap();
        assert!(matches!(
            f.locks.ensure_held_by(f.node, &holder("user2")),
            Err(LeaseError::Held { .. })
        ));
        f.clock.advance(Duration::seconds(29));
        assert_eq!(
            f.locks.ensure_held_by(f.node, &a),
            Err(LeaseError::Expired(f.node))
        );
    }

    #[test]
    fn free_for_allows_owner_and_lapsed_leases() {
        let f = fixture();
        let (a, b) = (holder("user1"), holder("user2"));
        let check = |who: &HolderId| {
            let store = f.locks.draft.read();
            check_free_for(&store, f.node, who, f.clock.now(), Duration::seconds(5))
        };

        assert_eq!(check(&b), Ok(()));
        f.locks.acquire(f.node, &a, Duration::seconds(30)).unwrap();
        assert_eq!(check(&a), Ok(()));
        assert!(matches!(check(&b), Err(LeaseError::Held { holder, .. }) if holder == a));

        f.clock.advance(Duration::seconds(26));
        assert_eq!(check(&b), Ok(()));
    }

    #[test]
    fn missing_node_not_found() {
        let f = fixture();
        let ghost = NodeId::new(404);
        assert_eq!(
            f.locks.acquire(ghost, &holder("u"), Duration::seconds(30)),
            Err(LeaseError::NotFound(ghost))
        );
        assert_eq!(f.locks.is_locked(ghost), Err(LeaseError::NotFound(ghost)));
    }

    #[test]
    fn clear_expired_only_touches_old_leases() {
        let f = fixture();
        f.locks
            .acquire(f.node, &holder("user1"), Duration::seconds(30))
            .unwrap();
        assert_eq!(f.locks.clear_expired(f.clock.now()), 0);

        f.clock.advance(Duration::days(31));
        assert_eq!(
            f.locks.clear_expired(f.clock.now() - Duration::days(30)),
            1
        );
        assert_eq!(f.locks.clear_expired(f.clock.now()), 0);
    }
}
