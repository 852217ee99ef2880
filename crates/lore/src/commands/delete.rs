//! Delete command - soft or hard deletion.

use std::str::FromStr;

use anyhow::{Result, bail};
use clap::Args;
use console::{Style, style};
use lore_knowledge::{Deleter, KnowledgeError};
use lore_types::DeleteMode;

use super::{Context, print_operations, truncate};

/// Arguments for the delete command.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Piece ids to delete
    pub ids: Vec<String>,

    /// Find candidates by query; nothing is deleted until ids are passed
    #[arg(long, conflicts_with = "ids")]
    pub query: Option<String>,

    /// soft (deactivate) or hard (remove)
    #[arg(short, long, default_value = "soft")]
    pub mode: String,

    /// Candidates to list for --query
    #[arg(short = 'k', long, default_value = "10")]
    pub top_k: usize,
}

/// Run the delete command.
pub async fn run(args: DeleteArgs, ctx: &Context) -> Result<()> {
    let mode = DeleteMode::from_str(&args.mode)?;
    let services = ctx.open()?;
    let deleter = Deleter::new(services.store.clone());

    if let Some(query) = args.query {
        return match deleter.delete_by_query(&query, None, mode, args.top_k) {
            Ok(results) => print_operations(&results, ctx),
            Err(KnowledgeError::ConfirmationRequired { candidates }) => {
                if ctx.json_output {
                    println!("{}", serde_json::to_string_pretty(&candidates)?);
                    return Ok(());
                }
                let dim = Style::new().dim();
                println!("{}", style("Confirm by passing ids").bold());
                println!("{}", dim.apply_to("─".repeat(50)));
                for candidate in &candidates {
                    println!(
                        "  {}  {} {}",
                        style(&candidate.piece.piece_id).cyan(),
                        truncate(&candidate.piece.content, 60),
                        dim.apply_to(format!("({:.3})", candidate.score))
                    );
                }
                Ok(())
            }
            Err(e) => Err(e.into()),
        };
    }

    if args.ids.is_empty() {
        bail!("pass piece ids or --query");
    }
    let results = deleter.delete_by_query("", Some(args.ids.as_slice()), mode, args.top_k)?;
    print_operations(&results, ctx)
}
