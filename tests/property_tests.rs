//! Property-based tests for the content forest, leases, and sync.
//!
//! These tests use proptest to drive random edit sequences and check that
//! the invariants hold after every step.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use proptest::sample::Index;

use casework::core::clock::{Clock, ManualClock};
use casework::core::graph::{shared, GraphStore, StoreKind, Translation};
use casework::core::ops::lease::{LeaseConfig, LeaseError, LockManager};
use casework::core::types::{EntityOrder, EntityType, HolderId, Language, NodeId};
use casework::engine::sync::SyncTarget;
use casework::engine::workspace::{Workspace, WorkspaceOptions};

// =============================================================================
// Strategies
// =============================================================================

/// One random structural edit. Indices pick among the nodes that exist when
/// the edit is applied.
#[derive(Debug, Clone)]
enum Edit {
    Create { parent: Option<Index>, order: i32 },
    Attach { parent: Index, child: Index },
    Detach { child: Index },
    Reorder { parent: Index, rotate: usize },
    Translate { node: Index, title: String },
    Delete { node: Index },
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        4 => (proptest::option::of(any::<Index>()), 0..3i32)
            .prop_map(|(parent, order)| Edit::Create { parent, order }),
        2 => (any::<Index>(), any::<Index>())
            .prop_map(|(parent, child)| Edit::Attach { parent, child }),
        1 => any::<Index>().prop_map(|child| Edit::Detach { child }),
        1 => (any::<Index>(), 0..4usize)
            .prop_map(|(parent, rotate)| Edit::Reorder { parent, rotate }),
        2 => (any::<Index>(), "[a-z]{1,8}")
            .prop_map(|(node, title)| Edit::Translate { node, title }),
        1 => any::<Index>().prop_map(|node| Edit::Delete { node }),
    ]
}

fn pick(ids: &[NodeId], index: &Index) -> Option<NodeId> {
    (!ids.is_empty()).then(|| ids[index.index(ids.len())])
}

fn live_ids(store: &GraphStore) -> Vec<NodeId> {
    let mut ids: Vec<NodeId> = store
        .nodes()
        .filter(|n| !n.is_tombstoned())
        .map(|n| n.id)
        .collect();
    ids.sort();
    ids
}

/// Apply an edit, ignoring the ones the store rejects.
fn apply(store: &mut GraphStore, edit: &Edit) {
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let live = live_ids(store);

    match edit {
        Edit::Create { parent, order } => {
            let parent = parent.as_ref().and_then(|p| pick(&live, p));
            let _ = store.create_node(parent, EntityType::Content, EntityOrder(*order), now);
        }
        Edit::Attach { parent, child } => {
            let roots = store.roots();
            if let (Some(parent), Some(child)) = (pick(&live, parent), pick(&roots, child)) {
                let _ = store.attach_child(parent, child);
            }
        }
        Edit::Detach { child } => {
            let attached: Vec<NodeId> = live
                .iter()
                .copied()
                .filter(|id| store.parent(*id).is_some())
                .collect();
            if let Some(child) = pick(&attached, child) {
                if let Some(parent) = store.parent(child) {
                    let _ = store.detach_child(parent, child);
                }
            }
        }
        Edit::Reorder { parent, rotate } => {
            if let Some(parent) = pick(&live, parent) {
                let mut children = store.children(parent);
                if !children.is_empty() {
                    let by = rotate % children.len();
                    children.rotate_left(by);
                    let _ = store.reorder(parent, &children);
                }
            }
        }
        Edit::Translate { node, title } => {
            if let Some(node) = pick(&live, node) {
                let _ = store.set_translation(
                    node,
                    Language::english(),
                    Translation::titled(title.as_str()),
                    now,
                );
            }
        }
        Edit::Delete { node } => {
            if let Some(node) = pick(&live, node) {
                let _ = store.delete_subtree(node, now);
            }
        }
    }
}

/// Published holds exactly the live draft nodes, with the same content,
/// placement, and sibling order.
fn assert_mirror(draft: &GraphStore, published: &GraphStore) -> Result<(), TestCaseError> {
    prop_assert_eq!(live_ids(draft), live_ids(published));
    for id in live_ids(draft) {
        let d = draft.get_live(id).unwrap();
        let p = published.get_live(id).unwrap();
        prop_assert_eq!(&d.content, &p.content, "content of {}", id);
        prop_assert_eq!(draft.parent(id), published.parent(id), "parent of {}", id);
        prop_assert_eq!(draft.children(id), published.children(id), "children of {}", id);
    }
    Ok(())
}

fn workspace() -> Workspace {
    Workspace::in_memory(
        WorkspaceOptions::default(),
        Arc::new(ManualClock::default()),
    )
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    /// Any edit sequence leaves the draft an acyclic, consistent forest.
    #[test]
    fn edits_preserve_forest_invariants(edits in prop::collection::vec(edit(), 1..40)) {
        let mut store = GraphStore::new(StoreKind::Draft);
        for e in &edits {
            apply(&mut store, e);
            prop_assert!(store.find_cycle().is_none(), "cycle after {:?}", e);
            prop_assert!(store.verify().is_ok(), "verify failed after {:?}", e);
        }

        for root in store.roots() {
            prop_assert!(store.parent(root).is_none());
        }
        for id in live_ids(&store) {
            if let Some(parent) = store.parent(id) {
                prop_assert!(store.is_live(parent));
                prop_assert!(store.children(parent).contains(&id));
            }
        }
    }

    /// Sync of everything makes published mirror the draft, and a second
    /// sync changes nothing.
    #[test]
    fn sync_all_mirrors_draft_and_is_idempotent(
        first in prop::collection::vec(edit(), 1..25),
        second in prop::collection::vec(edit(), 0..25),
    ) {
        let ws = workspace();
        for round in [&first, &second] {
            {
                let mut draft = ws.draft().write();
                for e in round.iter() {
                    apply(&mut draft, e);
                }
            }

            let report = ws.engine().sync(SyncTarget::All);
            prop_assert_eq!(report.failed(), 0, "{:?}", report);
            assert_mirror(&ws.draft().read(), &ws.published().read())?;
            prop_assert!(ws.published().read().verify().is_ok());
        }

        let records = ws.ledger().len();
        let version = ws.published().read().version();
        let report = ws.engine().sync(SyncTarget::All);
        prop_assert_eq!(report.applied(), 0, "{:?}", report);
        prop_assert_eq!(ws.ledger().len(), records);
        prop_assert_eq!(ws.published().read().version(), version);
    }

    /// A lease granted to one holder is never granted to another while it
    /// is valid, and a lapsed lease is always free to take.
    #[test]
    fn at_most_one_valid_holder(
        steps in prop::collection::vec((0..3usize, 0..3u8, 1..90i64), 1..60),
    ) {
        let clock = ManualClock::default();
        let draft = shared(GraphStore::new(StoreKind::Draft));
        let node = draft
            .write()
            .create_node(None, EntityType::Content, EntityOrder(0), clock.now())
            .unwrap();
        let locks = LockManager::new(draft, Arc::new(clock.clone()), LeaseConfig::default());
        let holders: Vec<HolderId> = ["ann", "bob", "cid"]
            .iter()
            .map(|h| HolderId::new(*h).unwrap())
            .collect();

        for (who, action, secs) in steps {
            let holder = &holders[who];
            let before = locks.holder_of(node).unwrap();
            match action {
                0 => {
                    let result = locks.acquire(node, holder, Duration::seconds(secs));
                    match &before {
                        Some(current) if current != holder => {
                            let rejected = matches!(result, Err(LeaseError::Held { .. }));
                            prop_assert!(rejected, "granted over {}", current);
                        }
                        _ => prop_assert!(result.is_ok()),
                    }
                }
                1 => {
                    let result = locks.release(node, holder);
                    match &before {
                        Some(current) if current != holder => prop_assert!(result.is_err()),
                        _ => prop_assert!(result.is_ok()),
                    }
                }
                _ => clock.advance(Duration::seconds(secs)),
            }

            let now_held = locks.holder_of(node).unwrap();
            prop_assert_eq!(now_held.is_some(), locks.is_locked(node).unwrap());
            if action != 2 {
                if let (Some(prev), Some(now)) = (&before, &now_held) {
                    prop_assert_eq!(prev, now);
                }
            }
        }
    }
}
