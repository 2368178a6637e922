//! engine::plan
//!
//! Deterministic sync plan generation.
//!
//! # Architecture
//!
//! A plan is the only intermediate representation between the draft and
//! published stores. The planner walks one draft subtree top-down and
//! compares each node with the published record of the same id:
//!
//! | draft        | published            | step               |
//! |--------------|----------------------|--------------------|
//! | live         | absent or tombstoned | `CreateNode`       |
//! | live         | live, other parent   | `MoveNode`         |
//! | live         | live, other content  | `UpdateNode`       |
//! | absent/dead  | live child of a node | `DeleteSubtree`    |
//! | elsewhere    | live child of a node | `MoveNode` to root |
//!
//! Deletes are emitted after every create, move, and update, so a node
//! that moved out of a deleted published subtree is relocated before the
//! tombstones are laid.
//!
//! Plans are:
//! - **Deterministic**: same stores, same plan
//! - **Previewable**: shown by `cw sync --dry-run`
//! - **Serializable**: steps carry full content, no store references
//!
//! # Invariants
//!
//! - Planner does not mutate any state
//! - A parent is always created or placed before its children
//! - A plan never places a node below itself
//! - The plan's fingerprint is the draft fingerprint it was computed from

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::graph::{FileKind, GraphStore, Node, NodeContent};
use crate::core::ops::journal::OpId;
use crate::core::types::{Fingerprint, NodeId};
use crate::engine::ledger::{IdempotencyKey, SyncOperation};

/// Errors from plan generation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    /// The root hangs under a draft parent that has never been published.
    #[error("node {root} cannot be published before its parent {parent}")]
    ParentNotPublished { root: NodeId, parent: NodeId },

    /// In published, the root's draft parent sits below `through`, a node
    /// of the root's own draft subtree.
    #[error(
        "placing {root} under {parent} would form a cycle through {through}; \
         sync the draft root above {parent} first"
    )]
    PlacementCycle {
        root: NodeId,
        parent: NodeId,
        through: NodeId,
    },
}

/// A typed plan step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncStep {
    /// Insert (or revive) a published node.
    CreateNode {
        id: NodeId,
        parent: Option<NodeId>,
        content: NodeContent,
    },

    /// Re-parent a published node.
    MoveNode {
        id: NodeId,
        from: Option<NodeId>,
        to: Option<NodeId>,
    },

    /// Overwrite the synchronized payload.
    UpdateNode { id: NodeId, content: NodeContent },

    /// Tombstone a published node and everything beneath it.
    DeleteSubtree { id: NodeId },
}

impl SyncStep {
    /// The node the step targets.
    pub fn node(&self) -> NodeId {
        match self {
            SyncStep::CreateNode { id, .. }
            | SyncStep::MoveNode { id, .. }
            | SyncStep::UpdateNode { id, .. }
            | SyncStep::DeleteSubtree { id } => *id,
        }
    }

    pub fn description(&self) -> String {
        match self {
            SyncStep::CreateNode { id, parent, content } => match parent {
                Some(p) => format!("Create {} {} under {}", content.entity_type, id, p),
                None => format!("Create {} {} as root", content.entity_type, id),
            },
            SyncStep::MoveNode { id, from, to } => format!(
                "Move {} from {} to {}",
                id,
                from.map_or("root level".to_string(), |p| p.to_string()),
                to.map_or("root level".to_string(), |p| p.to_string()),
            ),
            SyncStep::UpdateNode { id, .. } => format!("Update {}", id),
            SyncStep::DeleteSubtree { id } => format!("Delete subtree {}", id),
        }
    }

    fn is_delete(&self) -> bool {
        matches!(self, SyncStep::DeleteSubtree { .. })
    }
}

/// A complete plan for one root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPlan {
    pub op_id: OpId,
    pub root: NodeId,
    /// Draft fingerprint the plan was computed from.
    pub fingerprint: Fingerprint,
    pub operation: SyncOperation,
    pub steps: Vec<SyncStep>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey {
            root: self.root,
            fingerprint: self.fingerprint.clone(),
        }
    }

    /// Every node the plan touches directly.
    pub fn touched_nodes(&self) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.steps
            .iter()
            .map(SyncStep::node)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Human-readable description for dry runs.
    pub fn preview(&self) -> String {
        let header = format!("sync {} ({})", self.root, self.operation);
        if self.is_empty() {
            return format!("{}: No changes needed", header);
        }
        let mut lines = vec![format!("{}:", header)];
        for (i, step) in self.steps.iter().enumerate() {
            lines.push(format!("  {}. {}", i + 1, step.description()));
        }
        lines.join("\n")
    }
}

// ============================================================================
// Fingerprints
// ============================================================================

/// Fingerprint of one node's payload and its ordered live children.
pub fn node_fingerprint(node: &Node, children: &[NodeId]) -> Fingerprint {
    let content = &node.content;
    let mut b = Fingerprint::builder()
        .field("node")
        .field(node.id.get().to_le_bytes())
        .field(content.entity_type.id().to_le_bytes())
        .field(content.order.0.to_le_bytes())
        .field((content.translations.len() as u64).to_le_bytes());

    for (language, translation) in &content.translations {
        b = b
            .field(language.as_str())
            .field(&translation.title)
            .field(&translation.body)
            .field((translation.files.len() as u64).to_le_bytes());
        for file in &translation.files {
            let kind = match file.kind {
                FileKind::Image => "image",
                FileKind::Voice => "voice",
            };
            b = b.field(kind).field(&file.file_name);
        }
    }

    b = b.field((children.len() as u64).to_le_bytes());
    for child in children {
        b = b.field(child.get().to_le_bytes());
    }
    b.finish()
}

/// Merkle fingerprint of a live subtree, `None` if `root` is not live.
pub fn subtree_fingerprint(store: &GraphStore, root: NodeId) -> Option<Fingerprint> {
    let node = store.get_live(root).ok()?;
    let children = store.children(root);
    let mut b = Fingerprint::builder()
        .field("subtree")
        .child(&node_fingerprint(node, &children));
    for child in &children {
        b = b.child(&subtree_fingerprint(store, *child)?);
    }
    Some(b.finish())
}

/// Fingerprint of a root that is gone from the draft.
pub fn deletion_fingerprint(root: NodeId) -> Fingerprint {
    Fingerprint::builder()
        .field("deleted")
        .field(root.get().to_le_bytes())
        .finish()
}

/// The idempotency fingerprint for syncing `root`.
///
/// Covers the root's placement (its parent) as well as its subtree, so a
/// detach or re-attach of the root is a change worth publishing.
pub fn sync_fingerprint(store: &GraphStore, root: NodeId) -> Fingerprint {
    match subtree_fingerprint(store, root) {
        Some(subtree) => {
            let parent = store.parent(root).map_or(0, NodeId::get);
            Fingerprint::builder()
                .field("root")
                .field(parent.to_le_bytes())
                .child(&subtree)
                .finish()
        }
        None => deletion_fingerprint(root),
    }
}

// ============================================================================
// Planner
// ============================================================================

/// Diff the draft subtree at `root` against the published store.
pub fn plan_subtree(
    draft: &GraphStore,
    published: &GraphStore,
    root: NodeId,
) -> Result<SyncPlan, PlanError> {
    let fingerprint = sync_fingerprint(draft, root);

    if !draft.is_live(root) {
        let steps = if published.is_live(root) {
            vec![SyncStep::DeleteSubtree { id: root }]
        } else {
            vec![]
        };
        return Ok(SyncPlan {
            op_id: OpId::new(),
            root,
            fingerprint,
            operation: SyncOperation::Delete,
            steps,
        });
    }

    let root_parent = draft.parent(root);
    if let Some(parent) = root_parent {
        if !published.is_live(parent) {
            return Err(PlanError::ParentNotPublished { root, parent });
        }
    }

    let operation = if published.is_live(root) {
        SyncOperation::Update
    } else {
        SyncOperation::Create
    };

    let in_subtree: HashSet<NodeId> = std::iter::once(root)
        .chain(draft.descendants(root))
        .collect();

    // Nodes are placed top-down, so only the chain above the root's new
    // parent can close a loop.
    if let Some(parent) = root_parent {
        let mut chain = std::iter::once(parent).chain(published.ancestors(parent));
        if let Some(through) = chain.find(|id| in_subtree.contains(id)) {
            return Err(PlanError::PlacementCycle {
                root,
                parent,
                through,
            });
        }
    }

    let mut steps = Vec::new();
    let mut deletes = Vec::new();
    walk(
        draft,
        published,
        root,
        root_parent,
        &in_subtree,
        &mut steps,
        &mut deletes,
    );
    steps.extend(deletes);

    debug_assert!(steps
        .iter()
        .skip_while(|s| !s.is_delete())
        .all(SyncStep::is_delete));

    Ok(SyncPlan {
        op_id: OpId::new(),
        root,
        fingerprint,
        operation,
        steps,
    })
}

fn walk(
    draft: &GraphStore,
    published: &GraphStore,
    id: NodeId,
    parent: Option<NodeId>,
    in_subtree: &HashSet<NodeId>,
    steps: &mut Vec<SyncStep>,
    deletes: &mut Vec<SyncStep>,
) {
    let Ok(node) = draft.get_live(id) else {
        return;
    };
    let draft_children = draft.children(id);

    match published.get_live(id) {
        Err(_) => steps.push(SyncStep::CreateNode {
            id,
            parent,
            content: node.content.clone(),
        }),
        Ok(existing) => {
            let current_parent = published.parent(id);
            if current_parent != parent {
                steps.push(SyncStep::MoveNode {
                    id,
                    from: current_parent,
                    to: parent,
                });
            }
            if existing.content != node.content {
                steps.push(SyncStep::UpdateNode {
                    id,
                    content: node.content.clone(),
                });
            }
            for stale in published.children(id) {
                if in_subtree.contains(&stale) {
                    continue;
                }
                if draft.is_live(stale) {
                    // Moved to another subtree; its new owner places it.
                    steps.push(SyncStep::MoveNode {
                        id: stale,
                        from: Some(id),
                        to: None,
                    });
                } else {
                    deletes.push(SyncStep::DeleteSubtree { id: stale });
                }
            }
        }
    }

    for child in draft_children {
        walk(
            draft,
            published,
            child,
            Some(id),
            in_subtree,
            steps,
            deletes,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::{StoreKind, Translation};
    use crate::core::types::{EntityOrder, EntityType, Language};
    use chrono::Utc;

    fn en() -> Language {
        Language::new("en").unwrap()
    }

    fn draft_with_tree() -> (GraphStore, NodeId, NodeId, NodeId) {
        let mut draft = GraphStore::new(StoreKind::Draft);
        let now = Utc::now();
        let a = draft
            .create_node(None, EntityType::Navigation, EntityOrder(0), now)
            .unwrap();
        let b = draft
            .create_node(Some(a), EntityType::Content, EntityOrder(0), now)
            .unwrap();
        let c = draft
            .create_node(Some(a), EntityType::Question, EntityOrder(1), now)
            .unwrap();
        (draft, a, b, c)
    }

    fn publish_all(draft: &GraphStore, root: NodeId) -> GraphStore {
        let mut published = GraphStore::new(StoreKind::Published);
        let plan = plan_subtree(draft, &published, root).unwrap();
        for step in plan.steps {
            if let SyncStep::CreateNode {
                id,
                parent,
                content,
            } = step
            {
                published.insert_node(id, parent, content, Utc::now()).unwrap();
            }
        }
        published
    }

    mod fingerprints {
        use super::*;

        #[test]
        fn stable_for_equal_trees() {
            let (draft, a, _, _) = draft_with_tree();
            assert_eq!(sync_fingerprint(&draft, a), sync_fingerprint(&draft, a));
        }

        #[test]
        fn changes_with_translation() {
            let (mut draft, a, b, _) = draft_with_tree();
            let before = sync_fingerprint(&draft, a);
            draft
                .set_translation(b, en(), Translation::titled("Hello"), Utc::now())
                .unwrap();
            assert_ne!(before, sync_fingerprint(&draft, a));
        }

        #[test]
        fn changes_with_sibling_order() {
            let (mut draft, a, b, c) = draft_with_tree();
            let before = sync_fingerprint(&draft, a);
            draft.reorder(a, &[c, b]).unwrap();
            assert_ne!(before, sync_fingerprint(&draft, a));
        }

        #[test]
        fn changes_with_root_placement() {
            let (mut draft, a, b, _) = draft_with_tree();
            let before = sync_fingerprint(&draft, b);
            draft.detach_child(a, b).unwrap();
            assert_ne!(before, sync_fingerprint(&draft, b));
        }

        #[test]
        fn deleted_root_uses_deletion_fingerprint() {
            let (mut draft, a, _, _) = draft_with_tree();
            draft.delete_subtree(a, Utc::now()).unwrap();
            assert_eq!(sync_fingerprint(&draft, a), deletion_fingerprint(a));
            assert!(subtree_fingerprint(&draft, a).is_none());
        }
    }

    mod planner {
        use super::*;

        #[test]
        fn fresh_subtree_is_all_creates_in_preorder() {
            let (draft, a, b, c) = draft_with_tree();
            let published = GraphStore::new(StoreKind::Published);
            let plan = plan_subtree(&draft, &published, a).unwrap();

            assert_eq!(plan.operation, SyncOperation::Create);
            assert_eq!(plan.touched_nodes(), vec![a, b, c]);
            assert!(plan
                .steps
                .iter()
                .all(|s| matches!(s, SyncStep::CreateNode { .. })));
        }

        #[test]
        fn unchanged_subtree_yields_empty_plan() {
            let (draft, a, _, _) = draft_with_tree();
            let published = publish_all(&draft, a);
            let plan = plan_subtree(&draft, &published, a).unwrap();
            assert!(plan.is_empty());
            assert_eq!(plan.operation, SyncOperation::Update);
            assert!(plan.preview().contains("No changes needed"));
        }

        #[test]
        fn content_change_is_update() {
            let (mut draft, a, b, _) = draft_with_tree();
            let published = publish_all(&draft, a);
            draft
                .set_translation(b, en(), Translation::titled("New"), Utc::now())
                .unwrap();

            let plan = plan_subtree(&draft, &published, a).unwrap();
            assert_eq!(plan.steps.len(), 1);
            assert!(matches!(plan.steps[0], SyncStep::UpdateNode { id, .. } if id == b));
        }

        #[test]
        fn removed_child_is_delete_and_comes_last() {
            let (mut draft, a, b, c) = draft_with_tree();
            let published = publish_all(&draft, a);
            draft.delete_subtree(b, Utc::now()).unwrap();
            draft
                .set_translation(c, en(), Translation::titled("x"), Utc::now())
                .unwrap();

            let plan = plan_subtree(&draft, &published, a).unwrap();
            assert_eq!(plan.steps.len(), 2);
            assert!(matches!(plan.steps[0], SyncStep::UpdateNode { id, .. } if id == c));
            assert_eq!(plan.steps[1], SyncStep::DeleteSubtree { id: b });
        }

        #[test]
        fn move_within_subtree_is_move_not_delete() {
            let (mut draft, a, b, c) = draft_with_tree();
            let published = publish_all(&draft, a);
            draft.detach_child(a, c).unwrap();
            draft.attach_child(b, c).unwrap();

            let plan = plan_subtree(&draft, &published, a).unwrap();
            assert!(plan.steps.contains(&SyncStep::MoveNode {
                id: c,
                from: Some(a),
                to: Some(b),
            }));
            assert!(!plan.steps.iter().any(|s| s.is_delete()));
        }

        #[test]
        fn child_moved_out_of_subtree_is_detached_not_deleted() {
            let (mut draft, a, b, _) = draft_with_tree();
            let published = publish_all(&draft, a);
            draft.detach_child(a, b).unwrap();

            let plan = plan_subtree(&draft, &published, a).unwrap();
            assert_eq!(
                plan.steps,
                vec![SyncStep::MoveNode {
                    id: b,
                    from: Some(a),
                    to: None,
                }]
            );
        }

        #[test]
        fn deleted_root_plans_single_delete() {
            let (mut draft, a, _, _) = draft_with_tree();
            let published = publish_all(&draft, a);
            draft.delete_subtree(a, Utc::now()).unwrap();

            let plan = plan_subtree(&draft, &published, a).unwrap();
            assert_eq!(plan.operation, SyncOperation::Delete);
            assert_eq!(plan.steps, vec![SyncStep::DeleteSubtree { id: a }]);
        }

        #[test]
        fn placement_under_own_descendant_rejected() {
            // draft: p -> r -> x; published: x -> p -> r
            let mut draft = GraphStore::new(StoreKind::Draft);
            let now = Utc::now();
            let p = draft
                .create_node(None, EntityType::Navigation, EntityOrder(0), now)
                .unwrap();
            let r = draft
                .create_node(Some(p), EntityType::Content, EntityOrder(0), now)
                .unwrap();
            let x = draft
                .create_node(Some(r), EntityType::Content, EntityOrder(0), now)
                .unwrap();

            let mut published = GraphStore::new(StoreKind::Published);
            for (id, parent) in [(x, None), (p, Some(x)), (r, Some(p))] {
                let content = draft.get(id).unwrap().content.clone();
                published.insert_node(id, parent, content, now).unwrap();
            }

            assert_eq!(
                plan_subtree(&draft, &published, r).unwrap_err(),
                PlanError::PlacementCycle {
                    root: r,
                    parent: p,
                    through: x
                }
            );

            // From the top the loop unwinds: p leaves x before x moves.
            let plan = plan_subtree(&draft, &published, p).unwrap();
            assert_eq!(
                plan.steps,
                vec![
                    SyncStep::MoveNode {
                        id: p,
                        from: Some(x),
                        to: None
                    },
                    SyncStep::MoveNode {
                        id: x,
                        from: None,
                        to: Some(r)
                    },
                ]
            );
        }

        #[test]
        fn unpublished_parent_rejected() {
            let (draft, a, b, _) = draft_with_tree();
            let published = GraphStore::new(StoreKind::Published);
            assert_eq!(
                plan_subtree(&draft, &published, b).unwrap_err(),
                PlanError::ParentNotPublished { root: b, parent: a }
            );
        }

        #[test]
        fn preview_lists_steps() {
            let (draft, a, _, _) = draft_with_tree();
            let plan = plan_subtree(&draft, &GraphStore::new(StoreKind::Published), a).unwrap();
            let preview = plan.preview();
            assert!(preview.contains("1. Create navigation"));
            assert!(preview.contains("3. Create question"));
        }
    }
}
