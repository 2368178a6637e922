//! cli::commands::lease
//!
//! Lease commands: lock, renew, unlock.

use crate::cli::Context;
use crate::core::ops::lease::LeaseToken;
use crate::core::types::NodeId;
use crate::ui::output;
use anyhow::{anyhow, Context as _, Result};
use chrono::Duration;

fn describe(token: &LeaseToken) -> String {
    format!(
        "{} locked by {} until {}",
        token.node,
        token.holder,
        token.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

/// `--ttl` seconds as a duration; the lease manager checks the range.
fn ttl_arg(secs: Option<i64>) -> Result<Option<Duration>> {
    secs.map(|s| Duration::try_seconds(s).ok_or_else(|| anyhow!("ttl of {}s is out of range", s)))
        .transpose()
}

/// Acquire a lease on `node`.
///
/// `ttl` is in seconds; `None` uses `[locks] default_ttl_secs`.
pub fn lock(ctx: &Context, node: NodeId, ttl: Option<i64>) -> Result<()> {
    let holder = ctx.holder()?;
    let ws = ctx.open_workspace()?;
    let token = ws.acquire_lock(node, &holder, ttl_arg(ttl)?)?;
    ws.persist().context("Failed to save workspace")?;
    output::print(describe(&token), ctx.verbosity());
    Ok(())
}

/// Extend a lease the caller holds.
pub fn renew(ctx: &Context, node: NodeId, ttl: Option<i64>) -> Result<()> {
    let holder = ctx.holder()?;
    let ws = ctx.open_workspace()?;
    let token = ws.renew_lock(node, &holder, ttl_arg(ttl)?)?;
    ws.persist().context("Failed to save workspace")?;
    output::print(describe(&token), ctx.verbosity());
    Ok(())
}

/// Release a lease the caller holds.
pub fn unlock(ctx: &Context, node: NodeId) -> Result<()> {
    let holder = ctx.holder()?;
    let ws = ctx.open_workspace()?;
    ws.release_lock(node, &holder)?;
    ws.persist().context("Failed to save workspace")?;
    output::print(format!("Released {}", node), ctx.verbosity());
    Ok(())
}
