//! cli::commands::edit
//!
//! Draft editing commands: create, attach, detach, reorder, translate, delete.
//!
//! Every command except a root `create` needs the caller's lease on the
//! affected node; acquire one with `cw lock` first.

use crate::cli::Context;
use crate::core::graph::{FileKind, Translation};
use crate::core::types::{EntityOrder, EntityType, Language, NodeId};
use crate::engine::workspace::{DraftOp, DraftOutcome};
use crate::ui::output;
use anyhow::{Context as _, Result};

/// Apply one draft op as the context's holder and persist.
fn apply(ctx: &Context, op: DraftOp) -> Result<DraftOutcome> {
    let holder = ctx.holder()?;
    let ws = ctx.open_workspace()?;
    let outcome = ws.mutate_draft(&holder, op)?;
    ws.persist().context("Failed to save workspace")?;
    Ok(outcome)
}

/// Create a draft node and print its id.
pub fn create(
    ctx: &Context,
    parent: Option<NodeId>,
    entity_type: EntityType,
    order: i32,
) -> Result<()> {
    let outcome = apply(
        ctx,
        DraftOp::Create {
            parent,
            entity_type,
            order: EntityOrder(order),
        },
    )?;
    if let DraftOutcome::Created(id) = outcome {
        // Printed even with --quiet.
        println!("{}", id);
    }
    Ok(())
}

pub fn attach(ctx: &Context, parent: NodeId, child: NodeId) -> Result<()> {
    apply(ctx, DraftOp::Attach { parent, child })?;
    output::print(format!("Attached {} under {}", child, parent), ctx.verbosity());
    Ok(())
}

pub fn detach(ctx: &Context, parent: NodeId, child: NodeId) -> Result<()> {
    apply(ctx, DraftOp::Detach { parent, child })?;
    output::print(
        format!("Detached {} from {}; it is now a root", child, parent),
        ctx.verbosity(),
    );
    Ok(())
}

pub fn reorder(ctx: &Context, parent: NodeId, children: Vec<NodeId>) -> Result<()> {
    apply(ctx, DraftOp::Reorder { parent, children })?;
    output::print(format!("Reordered children of {}", parent), ctx.verbosity());
    Ok(())
}

/// Arguments to [`translate`].
#[derive(Debug, Clone)]
pub struct TranslateArgs {
    pub node: NodeId,
    pub language: String,
    pub title: Option<String>,
    pub body: Option<String>,
    pub images: Vec<String>,
    pub remove: bool,
}

/// Set or remove one translation.
pub fn translate(ctx: &Context, args: TranslateArgs) -> Result<()> {
    let language = Language::new(args.language).context("Invalid language code")?;

    let op = if args.remove {
        DraftOp::RemoveTranslation {
            node: args.node,
            language: language.clone(),
        }
    } else {
        let mut translation = Translation::titled(args.title.unwrap_or_default());
        if let Some(body) = args.body {
            translation = translation.with_body(body);
        }
        for image in args.images {
            translation = translation.with_file(FileKind::Image, image);
        }
        DraftOp::SetTranslation {
            node: args.node,
            language: language.clone(),
            translation,
        }
    };

    apply(ctx, op)?;
    let verb = if args.remove { "Removed" } else { "Set" };
    output::print(
        format!("{} '{}' translation of {}", verb, language, args.node),
        ctx.verbosity(),
    );
    Ok(())
}

/// Tombstone a node and its subtree.
pub fn delete(ctx: &Context, node: NodeId) -> Result<()> {
    let outcome = apply(ctx, DraftOp::Delete { node })?;
    if let DraftOutcome::Deleted(ids) = outcome {
        let listed: Vec<String> = ids.iter().map(NodeId::to_string).collect();
        output::print(
            format!("Deleted {} node(s): {}", ids.len(), listed.join(", ")),
            ctx.verbosity(),
        );
    }
    Ok(())
}
