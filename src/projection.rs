//! projection
//!
//! Client-facing tree views over either store.
//!
//! # Architecture
//!
//! A projection is a read-only copy of one node and some of its
//! descendants with the translation already resolved:
//!
//! 1. the requested language
//! 2. the configured default language
//! 3. the first language the node has
//!
//! Draft and published nodes are mapped by separate functions. Only the
//! draft mapping evaluates leases; a published projection never shows a
//! node as locked.
//!
//! # Example
//!
//! ```
//! use casework::core::graph::{GraphStore, StoreKind};
//! use casework::core::types::{EntityOrder, EntityType, Language};
//! use casework::projection::{project, Depth, LanguagePreference};
//! use chrono::{Duration, Utc};
//!
//! let mut store = GraphStore::new(StoreKind::Draft);
//! let root = store
//!     .create_node(None, EntityType::Navigation, EntityOrder(0), Utc::now())
//!     .unwrap();
//!
//! let prefs = LanguagePreference::new(Language::english(), Language::english());
//! let view = project(&store, root, &prefs, Depth::Immediate, Utc::now(), Duration::seconds(5)).unwrap();
//! assert!(!view.has_children);
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::core::graph::{GraphError, GraphStore, Node, StoreKind, TranslationFile};
use crate::core::ops::lease::lease_is_held;
use crate::core::types::{EntityOrder, EntityType, Language, NodeId};

/// How far below the requested node to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Depth {
    /// The node and its immediate children.
    #[default]
    Immediate,
    /// The whole live subtree.
    Full,
}

/// Which translation to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguagePreference {
    pub requested: Language,
    pub default: Language,
}

impl LanguagePreference {
    pub fn new(requested: Language, default: Language) -> Self {
        Self { requested, default }
    }
}

/// The translation chosen for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTranslation {
    pub language: Language,
    pub title: String,
    pub body: String,
    pub files: Vec<TranslationFile>,
}

/// One node of a projected tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectionNode {
    pub id: NodeId,
    pub entity_type: EntityType,
    pub order: EntityOrder,
    /// `None` when the node has no translations at all.
    pub translation: Option<ResolvedTranslation>,
    /// Every language the node is translated into.
    pub languages: Vec<Language>,
    pub has_children: bool,
    pub is_locked: bool,
    pub children: Vec<ProjectionNode>,
}

impl ProjectionNode {
    /// Title in the resolved language, or an empty string.
    pub fn title(&self) -> &str {
        self.translation.as_ref().map_or("", |t| t.title.as_str())
    }

    /// Number of nodes in this projection.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(ProjectionNode::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Project `id` from `store`.
///
/// # Errors
///
/// [`GraphError::NotFound`] if the node is absent or tombstoned.
pub fn project(
    store: &GraphStore,
    id: NodeId,
    prefs: &LanguagePreference,
    depth: Depth,
    now: DateTime<Utc>,
    grace: Duration,
) -> Result<ProjectionNode, GraphError> {
    let levels = match depth {
        Depth::Immediate => Some(1),
        Depth::Full => None,
    };
    match store.kind() {
        StoreKind::Draft => project_draft(store, id, prefs, levels, now, grace),
        StoreKind::Published => project_published(store, id, prefs, levels),
    }
}

fn project_draft(
    store: &GraphStore,
    id: NodeId,
    prefs: &LanguagePreference,
    levels: Option<usize>,
    now: DateTime<Utc>,
    grace: Duration,
) -> Result<ProjectionNode, GraphError> {
    let node = store.get_live(id)?;
    let children = match levels {
        Some(0) => vec![],
        _ => store
            .children(id)
            .into_iter()
            .map(|c| project_draft(store, c, prefs, levels.map(|l| l - 1), now, grace))
            .collect::<Result<_, _>>()?,
    };
    Ok(ProjectionNode {
        is_locked: lease_is_held(node.lease.as_ref(), now, grace),
        ..base(store, node, prefs, children)
    })
}

fn project_published(
    store: &GraphStore,
    id: NodeId,
    prefs: &LanguagePreference,
    levels: Option<usize>,
) -> Result<ProjectionNode, GraphError> {
    let node = store.get_live(id)?;
    let children = match levels {
        Some(0) => vec![],
        _ => store
            .children(id)
            .into_iter()
            .map(|c| project_published(store, c, prefs, levels.map(|l| l - 1)))
            .collect::<Result<_, _>>()?,
    };
    Ok(base(store, node, prefs, children))
}

fn base(
    store: &GraphStore,
    node: &Node,
    prefs: &LanguagePreference,
    children: Vec<ProjectionNode>,
) -> ProjectionNode {
    ProjectionNode {
        id: node.id,
        entity_type: node.content.entity_type,
        order: node.content.order,
        translation: resolve_translation(node, prefs),
        languages: node.content.translations.keys().cloned().collect(),
        has_children: store.has_children(node.id),
        is_locked: false,
        children,
    }
}

fn resolve_translation(node: &Node, prefs: &LanguagePreference) -> Option<ResolvedTranslation> {
    let translations = &node.content.translations;
    let (language, translation) = translations
        .get_key_value(&prefs.requested)
        .or_else(|| translations.get_key_value(&prefs.default))
        .or_else(|| translations.iter().next())?;
    Some(ResolvedTranslation {
        language: language.clone(),
        title: translation.title.clone(),
        body: translation.body.clone(),
        files: translation.files.clone(),
    })
}
