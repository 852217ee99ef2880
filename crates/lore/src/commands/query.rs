//! Query command - retrieve knowledge.

use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Args;
use console::{Style, style};
use lore_knowledge::{
    AgenticRetriever, AgenticSettings, ContextProvider, LlmQueryDecomposer, ProviderSettings,
    RetrievalRequest,
};
use lore_memory::{EntityScope, PieceFilter};
use lore_types::ScoredPiece;
use serde_json::json;

use super::{Context, parse_spaces, truncate};

/// Arguments for the query command.
#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Query text (empty returns metadata and graph context only)
    #[arg(default_value = "")]
    pub query: String,

    /// Scope retrieval to an entity
    #[arg(short, long)]
    pub entity: Option<String>,

    /// Maximum results to return
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Restrict to spaces (repeatable)
    #[arg(short, long = "space")]
    pub spaces: Vec<String>,

    /// Restrict to a domain
    #[arg(short, long)]
    pub domain: Option<String>,

    /// Decompose the query into sub-queries (needs an LLM)
    #[arg(long, conflicts_with = "prompt")]
    pub agentic: bool,

    /// Render the budgeted prompt sections instead of a result list
    #[arg(long)]
    pub prompt: bool,
}

/// Run the query command.
pub async fn run(args: QueryArgs, ctx: &Context) -> Result<()> {
    let services = ctx.open()?;
    let spaces = parse_spaces(&args.spaces)?;

    if args.prompt {
        let provider = ContextProvider::new(ProviderSettings::from(&ctx.config.provider()));
        let context = provider
            .provide(&services.kb, &args.query, args.entity.as_deref(), &spaces)
            .await?;
        if ctx.json_output {
            let sections: Vec<_> = context
                .sections
                .iter()
                .map(|s| json!({"name": s.name, "entries": s.entries, "tokens": s.tokens}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&sections)?);
        } else {
            println!("{}", context.render());
        }
        return Ok(());
    }

    if args.agentic {
        let Some(completer) = services.completer.clone() else {
            bail!("--agentic needs an LLM; set the key named by [llm].api_key_env");
        };
        let agentic = ctx.config.retrieval().agentic;
        let mut retriever = AgenticRetriever::new(
            services.store.clone(),
            Arc::new(LlmQueryDecomposer::new(completer, agentic.max_sub_queries)),
            AgenticSettings::from(&agentic),
        );
        if let Some(embedder) = &services.embedder {
            retriever = retriever.with_embedder(embedder.clone());
        }
        let mut filter = PieceFilter::new()
            .with_scope(EntityScope::from_entity(args.entity.as_deref()))
            .with_spaces(spaces);
        if let Some(domain) = args.domain {
            filter = filter.with_domains(vec![domain]);
        }
        let top_k = args.top_k.unwrap_or(ctx.config.retrieval().top_k);
        let results = retriever.retrieve(&args.query, &filter, top_k).await?;
        return print_pieces(&results, ctx);
    }

    let mut request = RetrievalRequest::new(args.query).with_spaces(spaces);
    if let Some(entity) = args.entity {
        request = request.for_entity(entity);
    }
    if let Some(top_k) = args.top_k {
        request = request.with_top_k(top_k);
    }
    if let Some(domain) = args.domain {
        request = request.with_domain(domain);
    }

    let result = services.kb.retrieve(&request).await?;

    if ctx.json_output {
        let body = json!({
            "strategy": format!("{:?}", result.strategy),
            "metadata": result.metadata,
            "global_metadata": result.global_metadata,
            "pieces": result.pieces,
            "graph_pieces": result.graph_context.pieces,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    if ctx.verbose {
        let dim = Style::new().dim();
        println!("{}", dim.apply_to(format!("strategy: {:?}", result.strategy)));
    }
    if result.is_empty() {
        println!("{}", Style::new().dim().apply_to("No results found"));
        return Ok(());
    }
    println!("{}", result.format());
    Ok(())
}

fn print_pieces(results: &[ScoredPiece], ctx: &Context) -> Result<()> {
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }
    let dim = Style::new().dim();
    if results.is_empty() {
        println!("{}", dim.apply_to("No results found"));
        return Ok(());
    }

    println!("{}", style("Results").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    for (i, result) in results.iter().enumerate() {
        println!("{}. {}", style(i + 1).cyan(), truncate(&result.piece.content, 70));
        println!(
            "   {}",
            dim.apply_to(format!(
                "{} · {} · score {:.3}",
                result.piece.piece_id, result.piece.info_type, result.score
            ))
        );
        println!();
    }
    Ok(())
}
