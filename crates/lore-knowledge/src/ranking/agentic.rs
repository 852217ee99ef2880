//! Multi-query (agentic) retrieval.
//!
//! A decomposer splits one question into weighted sub-queries, each with its
//! own domain/tag filter. Sub-queries are retrieved independently and their
//! scores aggregated per piece. A small aggregate is topped up with an
//! unfiltered fallback search.

use std::collections::HashMap;

use async_trait::async_trait;
use lore_config::{AgenticConfig, Aggregation};
use lore_llm::{SharedCompleter, SharedEmbedder, parse_json_response};
use lore_memory::{PieceFilter, PieceQuery, SharedPieceStore};
use lore_types::{Id, ScoredPiece, sort_scored};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::space::space_aware_search;
use crate::error::Result;

/// One facet of a decomposed query.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubQuery {
    #[serde(alias = "query")]
    pub text: String,
    #[serde(default = "default_weight")]
    pub weight: f32,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_weight() -> f32 {
    1.0
}

impl SubQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            weight: 1.0,
            domains: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_domains(mut self, domains: Vec<String>) -> Self {
        self.domains = domains;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Splits a query into sub-queries.
#[async_trait]
pub trait QueryDecomposer: Send + Sync {
    async fn decompose(&self, query: &str) -> Result<Vec<SubQuery>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM decomposer
// ─────────────────────────────────────────────────────────────────────────────

const DECOMPOSE_INSTRUCTION: &str = r#"You split a search question into independent sub-queries for a knowledge base.

Return a JSON object:
```json
{"sub_queries": [{"text": "...", "weight": 1.0, "domains": [], "tags": []}]}
```

Rules:
- One sub-query per distinct information need; a simple question needs only one
- `weight` in (0, 1] reflects how central the sub-query is to the question
- Only fill `domains`/`tags` when the question clearly implies them
- Respond with ONLY the JSON object"#;

#[derive(Debug, Deserialize)]
struct DecomposeResponse {
    #[serde(default)]
    sub_queries: Vec<SubQuery>,
}

/// Decomposer backed by a completer.
pub struct LlmQueryDecomposer {
    completer: SharedCompleter,
    max_sub_queries: usize,
}

impl LlmQueryDecomposer {
    pub fn new(completer: SharedCompleter, max_sub_queries: usize) -> Self {
        Self {
            completer,
            max_sub_queries: max_sub_queries.max(1),
        }
    }
}

#[async_trait]
impl QueryDecomposer for LlmQueryDecomposer {
    async fn decompose(&self, query: &str) -> Result<Vec<SubQuery>> {
        let prompt = format!(
            "{DECOMPOSE_INSTRUCTION}\n\nAt most {} sub-queries.\n\nQuestion: {query}\n",
            self.max_sub_queries
        );
        let raw = self.completer.complete(&prompt).await?;
        let parsed: DecomposeResponse = parse_json_response(&raw)?;
        let mut subs: Vec<SubQuery> = parsed
            .sub_queries
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .collect();
        subs.truncate(self.max_sub_queries);
        Ok(subs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregation
// ─────────────────────────────────────────────────────────────────────────────

/// Combine per-sub-query results `(weight, results)` into one ranking.
///
/// Every score is multiplied by its sub-query weight first; `Max` keeps the
/// best weighted score per piece, `Sum` adds them.
pub fn aggregate(per_query: Vec<(f32, Vec<ScoredPiece>)>, strategy: Aggregation) -> Vec<ScoredPiece> {
    let mut combined: HashMap<Id, ScoredPiece> = HashMap::new();
    for (weight, results) in per_query {
        for result in results {
            let contribution = weight * result.score;
            match combined.get_mut(result.id()) {
                Some(existing) => match strategy {
                    Aggregation::Max => existing.score = existing.score.max(contribution),
                    Aggregation::Sum => existing.score += contribution,
                },
                None => {
                    let id = result.piece.piece_id.clone();
                    let mut entry = result;
                    entry.score = contribution;
                    combined.insert(id, entry);
                }
            }
        }
    }
    let mut results: Vec<ScoredPiece> = combined.into_values().collect();
    sort_scored(&mut results);
    results
}

/// Add fallback results to `primary`.
///
/// A fallback piece is taken only if absent from `primary` or strictly
/// higher-scoring there; primary wins ties.
pub fn merge_fallback(primary: Vec<ScoredPiece>, fallback: Vec<ScoredPiece>) -> Vec<ScoredPiece> {
    let mut merged: HashMap<Id, ScoredPiece> = primary
        .into_iter()
        .map(|r| (r.piece.piece_id.clone(), r))
        .collect();
    for result in fallback {
        match merged.get(result.id()) {
            Some(existing) if existing.score >= result.score => {}
            _ => {
                merged.insert(result.piece.piece_id.clone(), result);
            }
        }
    }
    let mut results: Vec<ScoredPiece> = merged.into_values().collect();
    sort_scored(&mut results);
    results
}

// ─────────────────────────────────────────────────────────────────────────────
// Retriever
// ─────────────────────────────────────────────────────────────────────────────

/// Aggregation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AgenticSettings {
    pub aggregation: Aggregation,
    pub min_results: usize,
}

impl Default for AgenticSettings {
    fn default() -> Self {
        Self::from(&AgenticConfig::default())
    }
}

impl From<&AgenticConfig> for AgenticSettings {
    fn from(config: &AgenticConfig) -> Self {
        Self {
            aggregation: config.aggregation,
            min_results: config.min_results,
        }
    }
}

/// Decompose, retrieve per sub-query, aggregate, top up.
pub struct AgenticRetriever {
    store: SharedPieceStore,
    decomposer: std::sync::Arc<dyn QueryDecomposer>,
    embedder: Option<SharedEmbedder>,
    settings: AgenticSettings,
}

impl AgenticRetriever {
    pub fn new(
        store: SharedPieceStore,
        decomposer: std::sync::Arc<dyn QueryDecomposer>,
        settings: AgenticSettings,
    ) -> Self {
        Self {
            store,
            decomposer,
            embedder: None,
            settings,
        }
    }

    pub fn with_embedder(mut self, embedder: SharedEmbedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Retrieve `top_k` pieces for `query` within `base` (scope, spaces, ...).
    ///
    /// A failed decomposition degrades to the original query as the single
    /// sub-query.
    pub async fn retrieve(
        &self,
        query: &str,
        base: &PieceFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredPiece>> {
        let mut subs = match self.decomposer.decompose(query).await {
            Ok(subs) => subs,
            Err(e) => {
                warn!(error = %e, "Query decomposition failed, using the original query");
                Vec::new()
            }
        };
        if subs.is_empty() {
            subs.push(SubQuery::new(query));
        }

        let mut per_query = Vec::with_capacity(subs.len());
        for sub in &subs {
            let mut filter = base.clone();
            if !sub.domains.is_empty() {
                filter = filter.with_domains(sub.domains.clone());
            }
            if !sub.tags.is_empty() {
                filter = filter.with_tags(sub.tags.clone());
            }
            let search = self.query_for(&sub.text, top_k).await.with_filter(filter);
            let results = space_aware_search(self.store.as_ref(), &search)?;
            debug!(sub_query = %sub.text, weight = sub.weight, results = results.len(), "Sub-query retrieved");
            per_query.push((sub.weight, results));
        }

        let mut results = aggregate(per_query, self.settings.aggregation);

        if results.len() < self.settings.min_results {
            let fallback_query = self.query_for(query, top_k).await.with_filter(base.clone());
            let fallback = space_aware_search(self.store.as_ref(), &fallback_query)?;
            debug!(
                primary = results.len(),
                fallback = fallback.len(),
                "Topping up with unfiltered fallback search"
            );
            results = merge_fallback(results, fallback);
        }

        results.truncate(top_k);
        info!(sub_queries = subs.len(), results = results.len(), "Agentic retrieval complete");
        Ok(results)
    }

    async fn query_for(&self, text: &str, top_k: usize) -> PieceQuery {
        let mut query = PieceQuery::new(text, top_k);
        if let Some(embedder) = &self.embedder {
            match embedder.embed(text).await {
                Ok(v) => query = query.with_embedding(v),
                Err(e) => warn!(error = %e, "Query embedding failed, searching by keywords"),
            }
        }
        query
    }
}
