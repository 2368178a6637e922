//! ledger command - Show the transaction ledger

use crate::cli::Context;
use crate::core::types::NodeId;
use crate::ui::output;
use anyhow::{Context as _, Result};

/// Print ledger records, oldest first.
pub fn ledger(ctx: &Context, root: Option<NodeId>, json: bool) -> Result<()> {
    let ws = ctx.open_workspace()?;
    let records = match root {
        Some(root) => ws.query_ledger(root),
        None => ws.ledger(),
    };

    if json {
        return output::json(&records).context("Failed to encode JSON");
    }
    if records.is_empty() {
        output::print("No transactions recorded.", ctx.verbosity());
    }
    for record in &records {
        println!("{}", output::format_record(record));
    }
    Ok(())
}
