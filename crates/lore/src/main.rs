//! Lore - knowledge retrieval and lifecycle engine
//!
//! Main entry point for the Lore CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{add, delete, ingest, merge_job, query, restore, revalidate, stats, update};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Lore - knowledge retrieval and lifecycle engine
#[derive(Parser)]
#[command(name = "lore")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Database path (default: [store].database_path or the platform data dir)
    #[arg(long, global = true, env = "LORE_DB")]
    pub db: Option<PathBuf>,

    /// Load this config file instead of discovering one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Retrieve knowledge for a query
    Query(query::QueryArgs),

    /// Ingest a markdown document or a structured JSON payload
    Ingest(ingest::IngestArgs),

    /// Add a single knowledge piece
    Add(add::AddArgs),

    /// Update a piece by id or by semantic query
    Update(update::UpdateArgs),

    /// Delete pieces by id or by semantic query
    Delete(delete::DeleteArgs),

    /// Restore a soft-deleted piece
    Restore(restore::RestoreArgs),

    /// Process pending merges
    MergeJob(merge_job::MergeJobArgs),

    /// Re-run validation over a space
    Revalidate(revalidate::RevalidateArgs),

    /// Show store statistics
    Stats(stats::StatsArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "lore=debug,lore_knowledge=debug,lore_memory=debug,lore_llm=debug,lore_config=debug,info"
    } else {
        "lore=info,lore_knowledge=info,lore_memory=warn,lore_llm=warn,warn"
    };

    let log_dir = lore_config::xdg_config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "lore.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "lore=trace,lore_knowledge=trace,lore_memory=debug,lore_llm=debug,lore_config=debug,info",
                )),
        )
        .init();

    let ctx = commands::Context::load(cli.db, cli.config.as_deref(), cli.json, cli.verbose)?;

    match cli.command {
        Commands::Query(args) => query::run(args, &ctx).await,
        Commands::Ingest(args) => ingest::run(args, &ctx).await,
        Commands::Add(args) => add::run(args, &ctx).await,
        Commands::Update(args) => update::run(args, &ctx).await,
        Commands::Delete(args) => delete::run(args, &ctx).await,
        Commands::Restore(args) => restore::run(args, &ctx).await,
        Commands::MergeJob(args) => merge_job::run(args, &ctx).await,
        Commands::Revalidate(args) => revalidate::run(args, &ctx).await,
        Commands::Stats(args) => stats::run(args, &ctx).await,
    }
}
