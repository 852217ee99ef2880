//! Add command - store a single piece through dedup and validation.

use std::str::FromStr;

use anyhow::{Result, bail};
use clap::Args;
use console::{Style, style};
use lore_knowledge::{SkillSettings, SkillSynthesizer};
use lore_types::{DedupAction, KnowledgePiece, KnowledgeType, ValidationStatus};
use serde_json::json;
use tracing::warn;

use super::{Context, parse_spaces};

/// Arguments for the add command.
#[derive(Args, Debug)]
pub struct AddArgs {
    /// Piece content
    pub content: String,

    /// Knowledge type (fact, instruction, preference, procedure, ...)
    #[arg(short = 't', long = "type", default_value = "fact")]
    pub knowledge_type: String,

    /// Prompt section the piece routes to
    #[arg(short, long, default_value = "context")]
    pub info_type: String,

    /// Owning entity (global when omitted)
    #[arg(short, long)]
    pub entity: Option<String>,

    /// Tags (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    #[arg(short, long)]
    pub domain: Option<String>,

    /// Spaces (repeatable, default main)
    #[arg(short, long = "space")]
    pub spaces: Vec<String>,

    /// Store even if dedup finds a duplicate
    #[arg(long)]
    pub force: bool,
}

/// Run the add command.
pub async fn run(args: AddArgs, ctx: &Context) -> Result<()> {
    if args.content.trim().is_empty() {
        bail!("content is empty");
    }
    let services = ctx.open()?;

    let knowledge_type = KnowledgeType::from_str(&args.knowledge_type)?;
    let mut piece = KnowledgePiece::new(args.content, knowledge_type)
        .with_info_type(args.info_type)
        .with_tags(args.tags);
    if let Some(entity) = args.entity {
        piece = piece.with_entity(entity);
    }
    if let Some(domain) = args.domain {
        piece = piece.with_domain(domain);
    }
    let spaces = parse_spaces(&args.spaces)?;
    if !spaces.is_empty() {
        piece = piece.with_spaces(spaces);
    }

    if !args.force {
        let decision = services.deduplicator(&ctx.config).deduplicate(&piece).await?;
        if decision.action == DedupAction::NoOp {
            let matched = decision.matched_piece_id.unwrap_or_default();
            if ctx.json_output {
                let body = json!({"added": false, "duplicate_of": matched, "reason": decision.reason});
                println!("{}", body);
            } else {
                let dim = Style::new().dim();
                println!("{} duplicate of {}", style("skipped").yellow(), matched);
                println!("  {}", dim.apply_to(decision.reason));
            }
            return Ok(());
        }
    }

    let validation = services.validator(&ctx.config)?.check(&mut piece).await;
    let id = services.kb.add_piece(piece.clone()).await?;
    let stored = services.kb.get_piece(&id)?.unwrap_or(piece);

    // skill synthesis is best effort; the piece is already stored
    let mut skill = None;
    if let Some(completer) = &services.completer {
        let mut synthesizer = SkillSynthesizer::new(
            services.store.clone(),
            SkillSettings::from(&ctx.config.skills()),
        )
        .with_completer(completer.clone());
        if let Some(embedder) = &services.embedder {
            synthesizer = synthesizer.with_embedder(embedder.clone());
        }
        match synthesizer.synthesize_and_store(&stored).await {
            Ok(skill_id) => skill = skill_id,
            Err(e) => warn!(piece_id = %id, error = %e, "Skill synthesis failed"),
        }
    }

    if ctx.json_output {
        let body = json!({
            "added": true,
            "piece_id": id,
            "validation_status": stored.validation_status.as_str(),
            "issues": validation.issues,
            "skill_id": skill,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("{} {}", style("added").green(), id);
    if stored.validation_status == ValidationStatus::Invalid {
        let yellow = Style::new().yellow();
        println!("  {} routed to {}", yellow.apply_to("invalid:"), stored.space);
        for issue in &validation.issues {
            println!("    {}", Style::new().dim().apply_to(issue));
        }
    }
    if let Some(skill) = skill {
        println!("{} {}", style("skill").cyan(), skill);
    }
    Ok(())
}
