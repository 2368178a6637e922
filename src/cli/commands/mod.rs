//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Validates command-specific arguments
//! 2. Opens the workspace and calls one boundary operation
//! 3. Persists if anything changed
//! 4. Formats and displays output
//!
//! Handlers do NOT mutate stores directly.
//!
//! # Async Commands
//!
//! `sync` and `daemon` drive the async asset dispatch and the scheduler, so
//! they build a tokio runtime and block on it.

mod edit;
mod init;
mod lease;
mod ledger;
mod maintenance;
mod show;
mod sync;

// Re-export command functions for testing and direct invocation
pub use edit::{attach, create, delete, detach, reorder, translate, TranslateArgs};
pub use init::init;
pub use lease::{lock, renew, unlock};
pub use ledger::ledger;
pub use maintenance::{daemon, purge, review};
pub use show::{show, ShowArgs};
pub use sync::sync;

use crate::cli::args::Command;
use crate::cli::Context;
use anyhow::Result;

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        // Setup
        Command::Init {
            default_language,
            languages,
        } => init::init(ctx, default_language.as_deref(), &languages),

        // Draft editing
        Command::Create {
            parent,
            entity_type,
            order,
        } => edit::create(ctx, parent, entity_type, order),
        Command::Attach { parent, child } => edit::attach(ctx, parent, child),
        Command::Detach { parent, child } => edit::detach(ctx, parent, child),
        Command::Reorder { parent, children } => edit::reorder(ctx, parent, children),
        Command::Translate {
            node,
            language,
            title,
            body,
            images,
            remove,
        } => edit::translate(
            ctx,
            TranslateArgs {
                node,
                language,
                title,
                body,
                images,
                remove,
            },
        ),
        Command::Delete { node } => edit::delete(ctx, node),

        // Leases
        Command::Lock { node, ttl } => lease::lock(ctx, node, ttl),
        Command::Renew { node, ttl } => lease::renew(ctx, node, ttl),
        Command::Unlock { node } => lease::unlock(ctx, node),

        // Reading
        Command::Show {
            node,
            published,
            language,
            full,
            json,
        } => show::show(
            ctx,
            ShowArgs {
                node,
                published,
                language,
                full,
                json,
            },
        ),
        Command::Ledger { root, json } => ledger::ledger(ctx, root, json),

        // Synchronization
        Command::Sync { root, all, dry_run } => sync::sync(ctx, root, all, dry_run),

        // Maintenance
        Command::Purge => maintenance::purge(ctx),
        Command::Review { clear } => maintenance::review(ctx, clear),
        Command::Daemon => maintenance::daemon(ctx),
    }
}
