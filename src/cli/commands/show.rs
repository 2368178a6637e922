//! cli::commands::show
//!
//! Print a projection of one node, or the forest roots of a store.

use crate::cli::Context;
use crate::core::graph::StoreKind;
use crate::core::types::{Language, NodeId};
use crate::projection::{Depth, ProjectionNode};
use crate::ui::output;
use anyhow::{Context as _, Result};

/// Arguments to [`show`].
#[derive(Debug, Clone, Default)]
pub struct ShowArgs {
    pub node: Option<NodeId>,
    pub published: bool,
    pub language: Option<String>,
    pub full: bool,
    pub json: bool,
}

pub fn show(ctx: &Context, args: ShowArgs) -> Result<()> {
    let ws = ctx.open_workspace()?;
    let store = if args.published {
        StoreKind::Published
    } else {
        StoreKind::Draft
    };
    let language = args
        .language
        .map(Language::new)
        .transpose()
        .context("Invalid language code")?;

    let depth = if args.full { Depth::Full } else { Depth::Immediate };

    if let Some(node) = args.node {
        let view = ws
            .get_projection(store, node, language, depth)
            .with_context(|| format!("Cannot show node {} in {} store", node, store))?;
        if args.json {
            return output::json(&view).context("Failed to encode JSON");
        }
        // Printed even with --quiet.
        println!("{}", output::format_tree(&view));
        return Ok(());
    }

    let mut views: Vec<ProjectionNode> = Vec::new();
    for root in ws.roots(store) {
        let mut view = ws.get_projection(store, root, language.clone(), depth)?;
        if !args.full {
            view.children.clear();
        }
        views.push(view);
    }

    if args.json {
        return output::json(&views).context("Failed to encode JSON");
    }
    if views.is_empty() {
        output::print(format!("The {} store is empty.", store), ctx.verbosity());
    }
    for view in &views {
        println!("{}", output::format_tree(view));
    }
    Ok(())
}
