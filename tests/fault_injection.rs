//! Fault injection through the workspace boundary.
//!
//! Run with `--features fault_injection`. Every test clears the hooks first;
//! hooks are thread-local, so tests cannot see each other's faults.

#![cfg(feature = "fault_injection")]

use std::sync::Arc;

use tempfile::TempDir;

use casework::core::clock::ManualClock;
use casework::core::graph::{StoreKind, Translation};
use casework::core::paths::DataPaths;
use casework::core::types::{EntityOrder, EntityType, HolderId, Language, NodeId};
use casework::engine::engine_hooks;
use casework::engine::sync::{SyncError, SyncOutcome, SyncTarget};
use casework::engine::workspace::{DraftOp, DraftOutcome, Workspace, WorkspaceOptions};

fn editor() -> HolderId {
    HolderId::new("editor").unwrap()
}

fn create(ws: &Workspace, parent: Option<NodeId>, order: i32) -> NodeId {
    let who = editor();
    if let Some(p) = parent {
        ws.acquire_lock(p, &who, None).unwrap();
    }
    let outcome = ws
        .mutate_draft(
            &who,
            DraftOp::Create {
                parent,
                entity_type: EntityType::Content,
                order: EntityOrder(order),
            },
        )
        .unwrap();
    if let Some(p) = parent {
        ws.release_lock(p, &who).unwrap();
    }
    match outcome {
        DraftOutcome::Created(id) => id,
        other => panic!("expected Created, got {:?}", other),
    }
}

fn sync(ws: &Workspace, root: NodeId) -> SyncOutcome {
    let report = tokio_test::block_on(ws.trigger_synchronization(SyncTarget::Root(root)));
    report
        .outcomes
        .into_iter()
        .find_map(|(id, outcome)| (id == root).then_some(outcome))
        .expect("outcome for root")
}

fn memory_workspace() -> Workspace {
    engine_hooks::clear();
    Workspace::in_memory(
        WorkspaceOptions::default(),
        Arc::new(ManualClock::default()),
    )
}

#[test]
fn crash_between_apply_and_ledger_recovers_on_restart() {
    engine_hooks::clear();
    let dir = TempDir::new().unwrap();
    let paths = DataPaths::new(dir.path().to_path_buf());
    Workspace::init(&paths).unwrap();
    let clock = ManualClock::default();
    let open = || {
        Workspace::open(
            &paths,
            WorkspaceOptions::default(),
            Arc::new(clock.clone()),
        )
        .unwrap()
    };

    let root = {
        let ws = open();
        let root = create(&ws, None, 0);
        create(&ws, Some(root), 0);
        create(&ws, Some(root), 1);
        ws.persist().unwrap();

        engine_hooks::set_crash_after_apply();
        let outcome = sync(&ws, root);
        assert!(matches!(
            outcome,
            SyncOutcome::Failed {
                error: SyncError::Interrupted { .. },
                ..
            }
        ));
        // The process "dies" after the published snapshot hit disk.
        ws.persist().unwrap();
        root
    };

    let ws = open();
    assert!(ws.query_ledger(root).is_empty());
    assert_eq!(ws.published().read().children(root).len(), 2);

    let SyncOutcome::Applied { record, .. } = sync(&ws, root) else {
        panic!("expected the retry to apply");
    };
    assert_eq!(record.created, 0);
    assert_eq!(ws.published().read().len(), 3);
    assert_eq!(ws.query_ledger(root).len(), 1);

    assert!(matches!(sync(&ws, root), SyncOutcome::AlreadyApplied));
}

#[test]
fn failed_step_leaves_published_untouched() {
    let ws = memory_workspace();
    let root = create(&ws, None, 0);
    create(&ws, Some(root), 0);
    create(&ws, Some(root), 1);
    let before = ws.published().read().snapshot();

    engine_hooks::set_fail_at_step(2);
    assert!(sync(&ws, root).is_failed());
    engine_hooks::clear();

    let after = ws.published().read().snapshot();
    assert_eq!(after.nodes, before.nodes);
    assert!(ws.roots(StoreKind::Published).is_empty());
    assert!(ws.query_ledger(root).is_empty());
}

#[test]
fn ledger_failure_rolls_back_update() {
    let ws = memory_workspace();
    let root = create(&ws, None, 0);
    assert!(sync(&ws, root).is_applied());

    let who = editor();
    ws.acquire_lock(root, &who, None).unwrap();
    ws.mutate_draft(
        &who,
        DraftOp::SetTranslation {
            node: root,
            language: Language::english(),
            translation: Translation::titled("Changed"),
        },
    )
    .unwrap();
    ws.release_lock(root, &who).unwrap();

    engine_hooks::set_fail_ledger_write();
    assert!(sync(&ws, root).is_failed());
    engine_hooks::clear();

    let published = ws.published().read();
    assert!(published
        .get(root)
        .unwrap()
        .content
        .translations
        .is_empty());
    drop(published);
    assert_eq!(ws.query_ledger(root).len(), 1);
}
