//! Three-tier deduplication.
//!
//! | Tier | Check | Outcome |
//! |------|-------|---------|
//! | 1 | exact content hash | NO_OP |
//! | 2 | cosine similarity to nearest neighbors | ≥ auto: NO_OP, < judge: ADD |
//! | 3 | LLM judge on the borderline band | ADD / UPDATE / MERGE / NO_OP |
//!
//! Every failure along the way resolves to ADD. Data is never dropped on a
//! guess.

use std::str::FromStr;

use lore_config::DedupConfig;
use lore_llm::{SharedCompleter, SharedEmbedder, parse_json_response};
use lore_memory::{EntityScope, PieceFilter, SharedPieceStore};
use lore_types::{DedupAction, DedupResult, KnowledgePiece};
use serde::Deserialize;
use tracing::{debug, warn};

use super::nearest_neighbors;
use crate::embedding::embed_text;
use crate::error::Result;

/// Dedup thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupSettings {
    pub enabled: bool,
    /// At or above: duplicate.
    pub auto_threshold: f32,
    /// Below: distinct.
    pub judge_threshold: f32,
    pub neighbors: usize,
    pub use_llm_judge: bool,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self::from(&DedupConfig::default())
    }
}

impl From<&DedupConfig> for DedupSettings {
    fn from(config: &DedupConfig) -> Self {
        Self {
            enabled: config.enabled,
            auto_threshold: config.auto_threshold,
            judge_threshold: config.judge_threshold,
            neighbors: config.neighbors.max(1),
            use_llm_judge: config.use_llm_judge,
        }
    }
}

/// Where a similarity falls relative to the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityBand {
    Duplicate,
    Borderline,
    Distinct,
}

impl DedupSettings {
    pub fn band(&self, similarity: f32) -> SimilarityBand {
        if similarity >= self.auto_threshold {
            SimilarityBand::Duplicate
        } else if similarity < self.judge_threshold {
            SimilarityBand::Distinct
        } else {
            SimilarityBand::Borderline
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Judge Prompt
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the borderline-duplicate judge prompt.
pub struct DedupJudgePrompt;

impl DedupJudgePrompt {
    pub fn build(new: &KnowledgePiece, existing: &KnowledgePiece, similarity: f32) -> String {
        let mut prompt = String::with_capacity(2048);
        prompt.push_str(JUDGE_INSTRUCTION);
        prompt.push_str(&format!("\n\nSimilarity: {:.3}\n\n", similarity));
        push_piece(&mut prompt, "EXISTING", existing);
        push_piece(&mut prompt, "NEW", new);
        prompt.push_str("\nRespond with ONLY the JSON object. No markdown, no explanation.\n");
        prompt
    }
}

fn push_piece(prompt: &mut String, label: &str, piece: &KnowledgePiece) {
    prompt.push_str(&format!("[{}]\n", label));
    prompt.push_str(&format!("type: {}\n", piece.knowledge_type));
    if let Some(domain) = &piece.domain {
        prompt.push_str(&format!("domain: {}\n", domain));
    }
    if !piece.tags.is_empty() {
        prompt.push_str(&format!("tags: {}\n", piece.tags.join(", ")));
    }
    prompt.push_str(&format!("content: {}\n\n", piece.content));
}

const JUDGE_INSTRUCTION: &str = r#"You decide whether a NEW knowledge piece duplicates an EXISTING one.

Return a JSON object:
```json
{"decision": "ADD|UPDATE|MERGE|NO_OP", "reasoning": "...", "contradiction": false}
```

Decisions:
- ADD: the new piece carries distinct information
- UPDATE: the new piece supersedes the existing one
- MERGE: both carry complementary parts of the same knowledge
- NO_OP: the new piece adds nothing
Set `contradiction` to true when the two pieces state conflicting facts."#;

#[derive(Debug, Deserialize)]
struct JudgeResponse {
    decision: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    contradiction: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Deduplicator
// ─────────────────────────────────────────────────────────────────────────────

pub struct Deduplicator {
    store: SharedPieceStore,
    embedder: Option<SharedEmbedder>,
    judge: Option<SharedCompleter>,
    settings: DedupSettings,
}

impl Deduplicator {
    pub fn new(store: SharedPieceStore, settings: DedupSettings) -> Self {
        Self {
            store,
            embedder: None,
            judge: None,
            settings,
        }
    }

    pub fn with_embedder(mut self, embedder: SharedEmbedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_judge(mut self, judge: SharedCompleter) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn settings(&self) -> &DedupSettings {
        &self.settings
    }

    /// Decide what to do with an incoming piece.
    ///
    /// Only store errors propagate; embedding and judge failures resolve to
    /// ADD.
    pub async fn deduplicate(&self, piece: &KnowledgePiece) -> Result<DedupResult> {
        if !self.settings.enabled {
            return Ok(DedupResult::add("dedup disabled"));
        }

        let scope = EntityScope::from_entity(piece.entity_id.as_deref());

        // Tier 1
        if let Some(existing) = self.store.find_by_content_hash(&piece.content_hash, &scope)?
            && existing.piece_id != piece.piece_id
        {
            debug!(piece_id = %piece.piece_id, matched = %existing.piece_id, "Exact duplicate");
            return Ok(DedupResult::no_op(existing.piece_id, 1.0, "exact content match"));
        }

        // Tier 2
        let embedding = match &piece.embedding {
            Some(v) => Some(v.clone()),
            None => embed_text(self.embedder.as_ref(), piece.text_for_embedding()).await,
        };
        let Some(embedding) = embedding else {
            return Ok(DedupResult::add("no embedding for similarity check"));
        };

        let neighbors = nearest_neighbors(
            self.store.as_ref(),
            &embedding,
            PieceFilter::new().with_scope(scope),
            self.settings.neighbors,
            Some(&piece.piece_id),
        )?;
        let Some((closest, similarity)) = neighbors.into_iter().next() else {
            return Ok(DedupResult::add("no similar pieces"));
        };

        match self.settings.band(similarity) {
            SimilarityBand::Duplicate => Ok(DedupResult::no_op(
                closest.piece_id,
                similarity,
                format!("similarity {:.3} above auto threshold", similarity),
            )),
            SimilarityBand::Distinct => Ok(DedupResult::add(format!(
                "similarity {:.3} below judge threshold",
                similarity
            ))
            .with_match(closest.piece_id, similarity)),
            // Tier 3
            SimilarityBand::Borderline => Ok(self.judge(piece, &closest, similarity).await),
        }
    }

    async fn judge(
        &self,
        piece: &KnowledgePiece,
        existing: &KnowledgePiece,
        similarity: f32,
    ) -> DedupResult {
        let judge = match &self.judge {
            Some(judge) if self.settings.use_llm_judge => judge,
            _ => {
                return DedupResult::add("borderline similarity, no judge configured")
                    .with_match(existing.piece_id.clone(), similarity);
            }
        };

        let prompt = DedupJudgePrompt::build(piece, existing, similarity);
        let fallback = |reason: String| {
            warn!(piece_id = %piece.piece_id, reason = %reason, "Dedup judge unusable, adding piece");
            DedupResult::add(reason).with_match(existing.piece_id.clone(), similarity)
        };

        let raw = match judge.complete(&prompt).await {
            Ok(raw) => raw,
            Err(e) => return fallback(format!("judge failed: {}", e)),
        };
        let response: JudgeResponse = match parse_json_response(&raw) {
            Ok(r) => r,
            Err(e) => return fallback(format!("judge response malformed: {}", e)),
        };
        let action = match DedupAction::from_str(&response.decision) {
            Ok(a) => a,
            Err(e) => return fallback(format!("judge decision invalid: {}", e)),
        };

        debug!(piece_id = %piece.piece_id, decision = %action, similarity, "Dedup judge decided");
        DedupResult {
            action,
            reason: response.reasoning,
            matched_piece_id: Some(existing.piece_id.clone()),
            similarity: Some(similarity),
            contradiction: response.contradiction,
        }
    }
}
