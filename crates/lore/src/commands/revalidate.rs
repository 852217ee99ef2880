//! Revalidate command - re-run validation over a space.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use lore_knowledge::RevalidationJob;
use lore_types::Space;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::Context;

/// Arguments for the revalidate command.
#[derive(Args, Debug)]
pub struct RevalidateArgs {
    /// Space to re-check
    #[arg(short, long, default_value = "main")]
    pub space: String,
}

/// Run the revalidate command.
pub async fn run(args: RevalidateArgs, ctx: &Context) -> Result<()> {
    let space = Space::from_str(&args.space)?;
    let services = ctx.open()?;
    let validator = Arc::new(services.validator(&ctx.config)?);
    let job = Arc::new(RevalidationJob::new(services.store.clone(), validator));

    let cancel = CancellationToken::new();
    let abort = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.cancel();
        }
    });
    let report = job.spawn(space, cancel).await?;

    if ctx.json_output {
        let body = json!({
            "space": space.as_str(),
            "checked": report.checked,
            "newly_invalid": report.newly_invalid,
            "moved": report.moved,
            "errors": report.errors,
            "duration_ms": report.duration.as_millis() as u64,
            "cancelled": report.cancelled,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style(format!("Revalidation ({})", space)).bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!("  Checked:        {}", style(report.checked).cyan());
    println!("  Newly invalid:  {}", report.newly_invalid);
    println!("  Moved:          {}", report.moved);
    if report.cancelled {
        println!("  {}", Style::new().yellow().apply_to("cancelled"));
    }
    for error in &report.errors {
        println!("  {}", Style::new().red().apply_to(error));
    }
    println!();
    Ok(())
}
