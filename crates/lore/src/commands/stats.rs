//! Stats command - store statistics.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use lore_memory::{KnowledgePieceStore, MetadataStore};
use serde_json::json;

use super::Context;

/// Arguments for the stats command.
#[derive(Args, Debug)]
pub struct StatsArgs {}

/// Run the stats command.
pub async fn run(_args: StatsArgs, ctx: &Context) -> Result<()> {
    let services = ctx.open()?;
    let stats = KnowledgePieceStore::stats(services.store.as_ref())?;
    let entities = services.store.list_entities(None)?.len();

    if ctx.json_output {
        let body = json!({
            "database": ctx.db_path,
            "total": stats.total,
            "active": stats.active,
            "inactive": stats.inactive,
            "with_embeddings": stats.with_embeddings,
            "per_space": stats.per_space,
            "entities": entities,
            "llm": services.completer.is_some(),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style("Knowledge Statistics").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!("  Database:    {}", dim.apply_to(ctx.db_path.display()));
    println!("  Pieces:      {}", style(stats.total).cyan());
    println!("  Active:      {}", style(stats.active).cyan());
    println!("  Inactive:    {}", stats.inactive);
    println!("  Embeddings:  {}", stats.with_embeddings);
    println!("  Entities:    {}", entities);
    println!();

    println!("{}", style("Spaces").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    if stats.per_space.is_empty() {
        println!("  {}", dim.apply_to("(empty)"));
    }
    for (space, count) in &stats.per_space {
        println!("  {:<14} {}", space, style(count).cyan());
    }
    println!();

    match services.completer {
        Some(_) => println!("  LLM:         {}", Style::new().green().apply_to("configured")),
        None => println!("  LLM:         {}", dim.apply_to("(not configured)")),
    }
    println!();
    Ok(())
}
