//! Ingest command - load documents into the knowledge base.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use console::{Style, style};
use lore_knowledge::{DocumentIngester, IngestionReport};

use super::Context;

/// Arguments for the ingest command.
#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Markdown document, or a JSON ingestion payload with --structured
    pub path: PathBuf,

    /// Owning entity for pieces that do not name one
    #[arg(short, long)]
    pub entity: Option<String>,

    /// The file is an already-structured JSON payload
    #[arg(long)]
    pub structured: bool,

    /// Skip dedup, validation and merge routing
    #[arg(long)]
    pub raw: bool,

    /// Record a debug session under this directory
    #[arg(long)]
    pub debug_dir: Option<PathBuf>,
}

/// Run the ingest command.
pub async fn run(args: IngestArgs, ctx: &Context) -> Result<()> {
    let text = std::fs::read_to_string(&args.path)
        .with_context(|| format!("reading {}", args.path.display()))?;
    let structured = args.structured
        || args
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let services = ctx.open()?;
    if !structured && services.completer.is_none() {
        bail!(
            "structuring markdown needs an LLM; set {} or pass a JSON payload with --structured",
            ctx.config.llm().api_key_env
        );
    }

    let mut ingester =
        DocumentIngester::from_config(services.kb.clone(), services.completer.clone(), &ctx.config);
    if ingester.settings().enhance && !args.raw {
        ingester = ingester
            .with_deduplicator(Arc::new(services.deduplicator(&ctx.config)))
            .with_validator(Arc::new(services.validator(&ctx.config)?))
            .with_merger(Arc::new(services.merger(&ctx.config)));
    }
    if let Some(dir) = args.debug_dir {
        ingester = ingester.with_debug_dir(dir);
    }

    let report = if structured {
        ingester.ingest_json(&text).await?
    } else {
        ingester.ingest(&text, args.entity.as_deref()).await?
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, ctx);
    }
    Ok(())
}

fn print_report(report: &IngestionReport, ctx: &Context) {
    let dim = Style::new().dim();
    println!("{}", style("Ingestion Complete").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    if report.chunks > 0 {
        println!("  Chunks:      {} ({} failed)", style(report.chunks).cyan(), report.chunks_failed);
    }
    println!("  Structured:  {}", style(report.pieces_structured).cyan());
    println!("  Added:       {}", style(report.pieces_added).green());
    println!("  Superseded:  {}", style(report.pieces_superseded).green());
    println!("  Skipped:     {}", report.pieces_skipped);
    println!("  Suggested:   {}", report.pieces_suggested);
    println!("  Invalid:     {}", report.pieces_invalid);
    println!("  Metadata:    {}", report.metadata_saved);
    println!("  Graph:       {} nodes, {} edges", report.nodes_added, report.edges_added);
    if let Some(dir) = &report.debug_dir {
        println!("  Debug:       {}", dim.apply_to(dir.display()));
    }

    if report.has_errors() {
        println!();
        let yellow = Style::new().yellow();
        println!("  {}", yellow.apply_to(format!("{} error(s)", report.errors.len())));
        let shown = if ctx.verbose { report.errors.len() } else { 5 };
        for error in report.errors.iter().take(shown) {
            println!("    {}", dim.apply_to(error));
        }
    }
    println!();
}
