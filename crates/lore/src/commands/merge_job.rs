//! Merge-job command - process pending merges, or review suggestions.

use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};
use lore_knowledge::MergeJob;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Context, parse_spaces};

/// Arguments for the merge-job command.
#[derive(Args, Debug)]
pub struct MergeJobArgs {
    /// Spaces to scan (repeatable, default all)
    #[arg(short, long = "space")]
    pub spaces: Vec<String>,

    #[command(subcommand)]
    pub review: Option<ReviewCommand>,
}

#[derive(Subcommand, Debug)]
pub enum ReviewCommand {
    /// Accept a pending merge suggestion
    Accept { id: String },

    /// Reject a pending merge suggestion
    Reject { id: String },
}

/// Run the merge-job command.
pub async fn run(args: MergeJobArgs, ctx: &Context) -> Result<()> {
    let services = ctx.open()?;
    let manager = Arc::new(services.merger(&ctx.config));

    if let Some(review) = args.review {
        let piece = match review {
            ReviewCommand::Accept { id } => manager.accept_suggestion(&id)?,
            ReviewCommand::Reject { id } => manager.reject_suggestion(&id)?,
        };
        let status = piece.suggestion_status.map(|s| s.to_string()).unwrap_or_default();
        if ctx.json_output {
            println!("{}", serde_json::to_string_pretty(&piece)?);
        } else {
            println!("{} {}", style(status).green(), piece.piece_id);
        }
        return Ok(());
    }

    let spaces = parse_spaces(&args.spaces)?;
    let cancel = CancellationToken::new();
    let job = Arc::new(MergeJob::new(manager));
    let handle = job.spawn(spaces, cancel.clone());

    let abort = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping merge job");
            abort.cancel();
        }
    });

    let result = handle.await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style("Merge Job").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!("  Processed:    {}", style(result.processed).cyan());
    println!("  Merged:       {}", style(result.merged).green());
    println!("  Suggestions:  {}", result.suggestions);
    println!("  Elapsed:      {:.1?}", result.duration);
    if result.cancelled {
        println!("  {}", Style::new().yellow().apply_to("cancelled"));
    }
    for error in &result.errors {
        println!("  {}", Style::new().red().apply_to(error));
    }
    println!();
    Ok(())
}
