//! Update command - supersede or rewrite pieces.

use anyhow::{Result, bail};
use clap::Args;
use lore_knowledge::{SensitiveContentFilter, UpdateSettings, Updater};

use super::{Context, print_operations};

/// Arguments for the update command.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// New information to apply
    pub content: String,

    /// Update this piece
    #[arg(long, conflicts_with = "query")]
    pub id: Option<String>,

    /// Update every piece similar enough to this query
    #[arg(long)]
    pub query: Option<String>,

    /// Print the version chain after updating by id
    #[arg(long, requires = "id")]
    pub history: bool,
}

/// Run the update command.
pub async fn run(args: UpdateArgs, ctx: &Context) -> Result<()> {
    let services = ctx.open()?;
    let security = SensitiveContentFilter::from_config(&ctx.config.security())?;
    let mut updater = Updater::new(services.store.clone(), UpdateSettings::from(&ctx.config.update()))
        .with_security(security);
    if let Some(completer) = &services.completer {
        updater = updater.with_completer(completer.clone());
    }
    if let Some(embedder) = &services.embedder {
        updater = updater.with_embedder(embedder.clone());
    }

    let results = match (&args.id, &args.query) {
        (Some(id), _) => vec![updater.update_by_id(id, &args.content).await?],
        (None, Some(query)) => updater.update_by_content(query, &args.content).await?,
        (None, None) => bail!("pass --id or --query"),
    };
    print_operations(&results, ctx)?;

    if args.history
        && let Some(result) = results.first()
    {
        let head = result
            .new_piece_id
            .as_deref()
            .or(result.piece_id.as_deref())
            .unwrap_or_default();
        let chain = updater.history(head)?;
        if ctx.json_output {
            println!("{}", serde_json::to_string_pretty(&chain)?);
        } else {
            for piece in chain {
                let state = if piece.is_active { "active" } else { "inactive" };
                println!("  v{} {} ({})", piece.version, piece.piece_id, state);
            }
        }
    }
    Ok(())
}
