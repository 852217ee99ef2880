//! Restore command - reactivate soft-deleted pieces.

use anyhow::Result;
use clap::Args;
use lore_knowledge::Deleter;

use super::{Context, print_operations};

/// Arguments for the restore command.
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Piece ids to restore
    #[arg(required = true)]
    pub ids: Vec<String>,
}

/// Run the restore command.
pub async fn run(args: RestoreArgs, ctx: &Context) -> Result<()> {
    let services = ctx.open()?;
    let deleter = Deleter::new(services.store.clone());
    let results = args
        .ids
        .iter()
        .map(|id| deleter.restore_by_id(id))
        .collect::<lore_knowledge::Result<Vec<_>>>()?;
    print_operations(&results, ctx)
}
