//! cli::commands::maintenance
//!
//! Retention, review flags, and the scheduler daemon.

use crate::cli::Context;
use crate::core::types::NodeId;
use crate::ui::output;
use anyhow::{bail, Context as _, Result};
use tracing::info;

/// Run one retention pass now.
pub fn purge(ctx: &Context) -> Result<()> {
    let ws = ctx.open_workspace()?;
    let report = ws.run_retention();
    ws.persist().context("Failed to save workspace")?;

    if report.is_empty() {
        output::print("Nothing to purge.", ctx.verbosity());
    } else {
        output::print(
            format!(
                "Purged {} draft and {} published record(s), cleared {} stale lease(s)",
                report.draft_purged, report.published_purged, report.leases_cleared
            ),
            ctx.verbosity(),
        );
    }
    Ok(())
}

/// List review flags, or clear one.
pub fn review(ctx: &Context, clear: Option<NodeId>) -> Result<()> {
    let ws = ctx.open_workspace()?;

    if let Some(root) = clear {
        if !ws.clear_review(root) {
            bail!("Root {} is not flagged for review", root);
        }
        ws.persist().context("Failed to save workspace")?;
        output::print(
            format!("Cleared review flag on {}; queued for retry", root),
            ctx.verbosity(),
        );
        return Ok(());
    }

    let flags = ws.review_flags();
    if flags.is_empty() {
        output::print("No roots flagged for review.", ctx.verbosity());
    }
    for (root, flag) in &flags {
        println!(
            "{}  {} attempts  flagged {}  {}",
            root,
            flag.attempts,
            flag.flagged_at.format("%Y-%m-%d %H:%M:%S"),
            flag.last_error
        );
    }
    Ok(())
}

/// Run the scheduler until Ctrl-C.
///
/// Each scheduled run opens the data directory, works, persists, and
/// closes it, so edits and syncs from other commands go through meanwhile.
pub fn daemon(ctx: &Context) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let handle = ctx.start_scheduler()?;
        output::print("Scheduler running; press Ctrl-C to stop.", ctx.verbosity());

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        info!("shutdown requested");

        handle
            .shutdown()
            .await
            .context("Scheduler task panicked")?;
        Ok::<(), anyhow::Error>(())
    })?;

    output::print("Scheduler stopped.", ctx.verbosity());
    Ok(())
}
