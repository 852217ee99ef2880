//! Merge strategy resolution and execution.
//!
//! [`MergeStrategyManager::process`] decides what happens to an incoming
//! piece and never writes. [`MergeStrategyManager::commit`] persists a
//! `Merged` outcome (new version first, then the old one retired).

use std::collections::BTreeMap;
use std::str::FromStr;

use lore_config::MergeConfig;
use lore_llm::{SharedCompleter, SharedEmbedder, parse_json_response};
use lore_memory::{EntityScope, PieceFilter, SharedPieceStore};
use lore_types::{
    KnowledgePiece, KnowledgeType, MergeAction, MergeCandidate, MergeResult, MergeStrategy,
    SuggestionStatus,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{add_then_retire, nearest_neighbors};
use crate::embedding::{embed_text, ensure_embedding};
use crate::error::{KnowledgeError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct MergeSettings {
    pub enabled: bool,
    pub similarity_threshold: f32,
    pub default_strategy: MergeStrategy,
    pub type_defaults: BTreeMap<KnowledgeType, MergeStrategy>,
    pub batch_size: usize,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self::from(&MergeConfig::default())
    }
}

impl From<&MergeConfig> for MergeSettings {
    fn from(config: &MergeConfig) -> Self {
        let mut type_defaults = BTreeMap::new();
        for (name, strategy) in &config.type_defaults {
            match KnowledgeType::from_str(name) {
                Ok(kt) => {
                    type_defaults.insert(kt, *strategy);
                }
                Err(e) => warn!(error = %e, "Ignoring merge default for unknown knowledge type"),
            }
        }
        Self {
            enabled: config.enabled,
            similarity_threshold: config.similarity_threshold,
            default_strategy: config.default_strategy,
            type_defaults,
            batch_size: config.batch_size.max(1),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Merge Prompt
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the content-merge prompt.
pub struct MergePrompt;

impl MergePrompt {
    pub fn build(existing: &KnowledgePiece, incoming: &KnowledgePiece) -> String {
        let mut prompt = String::with_capacity(2048);
        prompt.push_str(MERGE_INSTRUCTION);
        prompt.push_str(&format!(
            "\n\nKnowledge type: {}\n\nEXISTING:\n{}\n\nNEW:\n{}\n",
            existing.knowledge_type, existing.content, incoming.content
        ));
        prompt.push_str("\nRespond with ONLY the JSON object. No markdown, no explanation.\n");
        prompt
    }
}

const MERGE_INSTRUCTION: &str = r#"You merge two overlapping knowledge pieces into one.

Keep every distinct detail from both. Drop only exact repetition. Where they conflict, prefer NEW.

Return a JSON object:
```json
{"merged_content": "...", "reasoning": "..."}
```"#;

#[derive(Debug, Deserialize)]
struct MergeResponse {
    merged_content: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

pub struct MergeStrategyManager {
    store: SharedPieceStore,
    embedder: Option<SharedEmbedder>,
    completer: Option<SharedCompleter>,
    settings: MergeSettings,
}

impl MergeStrategyManager {
    pub fn new(store: SharedPieceStore, settings: MergeSettings) -> Self {
        Self {
            store,
            embedder: None,
            completer: None,
            settings,
        }
    }

    pub fn with_embedder(mut self, embedder: SharedEmbedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_completer(mut self, completer: SharedCompleter) -> Self {
        self.completer = Some(completer);
        self
    }

    pub fn settings(&self) -> &MergeSettings {
        &self.settings
    }

    pub fn store(&self) -> &SharedPieceStore {
        &self.store
    }

    pub fn embedder(&self) -> Option<&SharedEmbedder> {
        self.embedder.as_ref()
    }

    pub fn has_completer(&self) -> bool {
        self.completer.is_some()
    }

    /// Piece override, then the type table, then the default.
    pub fn resolve_strategy(&self, piece: &KnowledgePiece) -> MergeStrategy {
        piece
            .merge_strategy
            .or_else(|| self.settings.type_defaults.get(&piece.knowledge_type).copied())
            .unwrap_or(self.settings.default_strategy)
    }

    /// The most similar active piece of the same type, owner and primary
    /// space, if it clears the similarity threshold.
    pub async fn find_candidate(&self, piece: &KnowledgePiece) -> Result<Option<MergeCandidate>> {
        let embedding = match &piece.embedding {
            Some(v) => Some(v.clone()),
            None => embed_text(self.embedder.as_ref(), piece.text_for_embedding()).await,
        };
        let Some(embedding) = embedding else {
            return Ok(None);
        };

        let filter = PieceFilter::new()
            .with_scope(EntityScope::from_entity(piece.entity_id.as_deref()))
            .with_types(vec![piece.knowledge_type])
            .with_spaces(vec![piece.space]);
        let best = nearest_neighbors(self.store.as_ref(), &embedding, filter, 1, Some(&piece.piece_id))?
            .into_iter()
            .next();

        Ok(best
            .filter(|(_, sim)| *sim >= self.settings.similarity_threshold)
            .map(|(existing, similarity)| MergeCandidate { existing, similarity }))
    }

    /// Ask the LLM for the merged content of two pieces.
    pub async fn merge_content(
        &self,
        existing: &KnowledgePiece,
        incoming: &KnowledgePiece,
    ) -> Result<String> {
        let completer = self
            .completer
            .as_ref()
            .ok_or_else(|| KnowledgeError::config("no completer configured for merging"))?;
        let raw = completer.complete(&MergePrompt::build(existing, incoming)).await?;
        let response: MergeResponse = parse_json_response(&raw)?;
        let merged = response.merged_content.trim();
        if merged.is_empty() {
            return Err(KnowledgeError::Parse("merge produced empty content".into()));
        }
        Ok(merged.to_string())
    }

    /// The next version of `existing` carrying the merged content, with the
    /// union of both pieces' tags.
    pub async fn merged_version(
        &self,
        existing: &KnowledgePiece,
        incoming: &KnowledgePiece,
    ) -> Result<KnowledgePiece> {
        let content = self.merge_content(existing, incoming).await?;
        let mut merged = existing.superseding(content);
        merged.tags = lore_types::normalize_tags(existing.tags.iter().chain(incoming.tags.iter()));
        Ok(merged)
    }

    /// Decide what to do with an incoming piece. Nothing is written.
    pub async fn process(&self, mut piece: KnowledgePiece) -> Result<MergeResult> {
        let strategy = self.resolve_strategy(&piece);
        if !self.settings.enabled {
            return Ok(MergeResult::new(MergeAction::Skipped, strategy, piece, "merging disabled"));
        }

        match strategy {
            MergeStrategy::ManualOnly => {
                return Ok(MergeResult::new(MergeAction::Skipped, strategy, piece, "manual only"));
            }
            s if s.is_deferred() => {
                piece.merge_processed = false;
                return Ok(MergeResult::new(
                    MergeAction::Deferred,
                    strategy,
                    piece,
                    "deferred to merge job",
                ));
            }
            _ => {}
        }

        let Some(candidate) = self.find_candidate(&piece).await? else {
            return Ok(MergeResult::new(MergeAction::Skipped, strategy, piece, "no merge candidate"));
        };
        let target_id = candidate.existing.piece_id.clone();

        if strategy == MergeStrategy::AutoMergeOnIngest {
            if self.completer.is_some() {
                match self.merged_version(&candidate.existing, &piece).await {
                    Ok(merged) => {
                        debug!(target = %target_id, new_id = %merged.piece_id, "Auto-merged piece");
                        return Ok(MergeResult::new(
                            MergeAction::Merged,
                            strategy,
                            merged,
                            format!("merged at similarity {:.3}", candidate.similarity),
                        )
                        .with_target(target_id));
                    }
                    Err(e) => {
                        warn!(target = %target_id, error = %e, "Merge failed, suggesting instead");
                    }
                }
            } else {
                debug!(target = %target_id, "No completer for auto-merge, suggesting instead");
            }
        }

        let reason = format!("similar to {} ({:.3})", target_id, candidate.similarity);
        attach_suggestion(&mut piece, &target_id, &reason);
        Ok(MergeResult::new(MergeAction::Suggested, strategy, piece, reason).with_target(target_id))
    }

    /// Persist a `Merged` result. Other actions leave storing the incoming
    /// piece to the caller.
    pub async fn commit(&self, result: &MergeResult) -> Result<()> {
        if result.action != MergeAction::Merged {
            return Ok(());
        }
        let target = result
            .target_id
            .as_deref()
            .ok_or_else(|| KnowledgeError::internal("merged result without a target"))?;
        let mut merged = result.piece.clone();
        ensure_embedding(self.embedder.as_ref(), &mut merged).await;
        add_then_retire(self.store.as_ref(), &merged, target)?;
        info!(new_id = %merged.piece_id, target, version = merged.version, "Committed merge");
        Ok(())
    }

    pub fn accept_suggestion(&self, piece_id: &str) -> Result<KnowledgePiece> {
        self.review_suggestion(piece_id, SuggestionStatus::Accepted)
    }

    pub fn reject_suggestion(&self, piece_id: &str) -> Result<KnowledgePiece> {
        self.review_suggestion(piece_id, SuggestionStatus::Rejected)
    }

    fn review_suggestion(&self, piece_id: &str, status: SuggestionStatus) -> Result<KnowledgePiece> {
        let mut piece = self
            .store
            .get(piece_id)?
            .ok_or_else(|| KnowledgeError::NotFound(piece_id.to_string()))?;
        if piece.pending_merge_suggestion.is_none()
            || piece.suggestion_status != Some(SuggestionStatus::Pending)
        {
            return Err(KnowledgeError::invalid(format!(
                "piece {} has no pending merge suggestion",
                piece_id
            )));
        }
        piece.suggestion_status = Some(status);
        piece.touch();
        self.store.update(&piece)?;
        info!(piece_id, status = %status, "Reviewed merge suggestion");
        Ok(piece)
    }
}

/// Mark `piece` as a pending merge suggestion against `target_id`.
pub(crate) fn attach_suggestion(piece: &mut KnowledgePiece, target_id: &str, reason: &str) {
    piece.pending_merge_suggestion = Some(target_id.to_string());
    piece.merge_suggestion_reason = Some(reason.to_string());
    piece.suggestion_status = Some(SuggestionStatus::Pending);
}
