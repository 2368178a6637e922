//! cli::commands::sync
//!
//! Publish draft subtrees.
//!
//! # Design
//!
//! - `cw sync ROOT` publishes one root; `cw sync --all` every root
//! - `--dry-run` prints the plans and changes nothing
//! - Asset requests from applied roots go to the configured generator
//! - Deferred and failed roots are recorded for the daemon's retry cycle
//!
//! # Example
//!
//! ```bash
//! cw sync 1
//! cw sync --all --dry-run
//! ```

use crate::cli::Context;
use crate::core::types::NodeId;
use crate::engine::sync::SyncTarget;
use crate::ui::output;
use anyhow::{bail, Context as _, Result};

/// Run the sync command.
///
/// This is a synchronous wrapper that uses tokio to run the async implementation.
pub fn sync(ctx: &Context, root: Option<NodeId>, all: bool, dry_run: bool) -> Result<()> {
    let target = match (root, all) {
        (_, true) => SyncTarget::All,
        (Some(root), false) => SyncTarget::Root(root),
        (None, false) => bail!("Pass a root id or --all"),
    };

    let ws = ctx.open_workspace()?;

    if dry_run {
        let plans = ws.plan_sync(target)?;
        if plans.is_empty() {
            output::print("Nothing to synchronize.", ctx.verbosity());
        }
        for plan in &plans {
            println!("{}", plan.preview());
        }
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(ws.trigger_synchronization(target));
    ws.persist().context("Failed to save workspace")?;

    output::print(output::format_sync_report(&report), ctx.verbosity());

    if report.failed() > 0 {
        bail!(
            "{} root(s) failed to synchronize and were queued for retry",
            report.failed()
        );
    }
    Ok(())
}
