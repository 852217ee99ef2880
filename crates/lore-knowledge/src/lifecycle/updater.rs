//! Versioned updates.
//!
//! An optional LLM classifies the update intent; the content itself is always
//! composed here, never by the model. With history preserved, the new version
//! is added before the old one is retired, and rolled back if retiring fails.

use std::collections::HashSet;
use std::str::FromStr;

use lore_config::UpdateConfig;
use lore_llm::{SharedCompleter, SharedEmbedder, parse_json_response};
use lore_memory::{PieceFilter, PieceQuery, SharedPieceStore};
use lore_types::{KnowledgePiece, MergeType, OperationResult, UpdateAction, normalize_content};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{add_then_retire, nearest_neighbors};
use crate::embedding::{embed_text, ensure_embedding};
use crate::error::{KnowledgeError, Result};
use crate::security::SensitiveContentFilter;

const OPERATION: &str = "update";

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSettings {
    pub preserve_history: bool,
    /// Most pieces touched by one semantic update.
    pub max_updates: usize,
    /// Minimum similarity for a semantic update target.
    pub similarity_threshold: f32,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self::from(&UpdateConfig::default())
    }
}

impl From<&UpdateConfig> for UpdateSettings {
    fn from(config: &UpdateConfig) -> Self {
        Self {
            preserve_history: config.preserve_history,
            max_updates: config.max_updates.max(1),
            similarity_threshold: config.similarity_threshold,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Content Composition
// ─────────────────────────────────────────────────────────────────────────────

/// Compose the updated content.
///
/// `Interleave` alternates blank-line separated paragraphs, existing first.
pub fn compose_content(
    existing: &str,
    update: &str,
    action: UpdateAction,
    merge_type: MergeType,
) -> String {
    let existing = existing.trim();
    let update = update.trim();
    match action {
        UpdateAction::Replace => update.to_string(),
        UpdateAction::NoChange => existing.to_string(),
        UpdateAction::Merge => match merge_type {
            MergeType::Append => format!("{}\n\n{}", existing, update),
            MergeType::Prepend => format!("{}\n\n{}", update, existing),
            MergeType::Interleave => {
                let old = paragraphs(existing);
                let new = paragraphs(update);
                let mut out = Vec::with_capacity(old.len() + new.len());
                for i in 0..old.len().max(new.len()) {
                    out.extend(old.get(i).copied());
                    out.extend(new.get(i).copied());
                }
                out.join("\n\n")
            }
        },
    }
}

fn paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Intent Prompt
// ─────────────────────────────────────────────────────────────────────────────

pub struct UpdateIntentPrompt;

impl UpdateIntentPrompt {
    pub fn build(existing: &KnowledgePiece, update: &str) -> String {
        let mut prompt = String::with_capacity(2048);
        prompt.push_str(INTENT_INSTRUCTION);
        prompt.push_str(&format!(
            "\n\nEXISTING ({}):\n{}\n\nUPDATE:\n{}\n",
            existing.knowledge_type, existing.content, update
        ));
        prompt.push_str("\nRespond with ONLY the JSON object. No markdown, no explanation.\n");
        prompt
    }
}

const INTENT_INSTRUCTION: &str = r#"You classify how an UPDATE should change an EXISTING knowledge piece.

Return a JSON object:
```json
{"action": "REPLACE|MERGE|NO_CHANGE", "merge_type": "append|prepend|interleave", "reasoning": "..."}
```

- REPLACE: the update corrects or supersedes the existing content
- MERGE: the update adds to the existing content; pick where it goes with `merge_type`
- NO_CHANGE: the update carries nothing new
Do not rewrite the content yourself."#;

#[derive(Debug, Deserialize)]
struct IntentResponse {
    action: String,
    #[serde(default)]
    merge_type: Option<String>,
    #[serde(default)]
    reasoning: String,
}

/// Classified update intent.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateIntent {
    pub action: UpdateAction,
    pub merge_type: MergeType,
    pub reason: String,
}

impl UpdateIntent {
    fn new(action: UpdateAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            merge_type: MergeType::Append,
            reason: reason.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Updater
// ─────────────────────────────────────────────────────────────────────────────

pub struct Updater {
    store: SharedPieceStore,
    embedder: Option<SharedEmbedder>,
    completer: Option<SharedCompleter>,
    security: SensitiveContentFilter,
    settings: UpdateSettings,
}

impl Updater {
    pub fn new(store: SharedPieceStore, settings: UpdateSettings) -> Self {
        Self {
            store,
            embedder: None,
            completer: None,
            security: SensitiveContentFilter::empty(),
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

    pub fn with_security(mut self, security: SensitiveContentFilter) -> Self {
        self.security = security;
        self
    }

    pub fn settings(&self) -> &UpdateSettings {
        &self.settings
    }

    /// Classify the update. No completer means REPLACE; a failed or
    /// malformed analysis means NO_CHANGE.
    pub async fn analyze_intent(&self, existing: &KnowledgePiece, update: &str) -> UpdateIntent {
        let Some(completer) = &self.completer else {
            return UpdateIntent::new(UpdateAction::Replace, "no intent analyzer configured");
        };

        let raw = match completer.complete(&UpdateIntentPrompt::build(existing, update)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(piece_id = %existing.piece_id, error = %e, "Update intent analysis failed, leaving piece unchanged");
                return UpdateIntent::new(UpdateAction::NoChange, format!("intent analysis failed: {}", e));
            }
        };
        let parsed = parse_json_response::<IntentResponse>(&raw)
            .map_err(KnowledgeError::from)
            .and_then(|r| {
                let action = UpdateAction::from_str(&r.action)?;
                let merge_type = match r.merge_type.as_deref() {
                    Some(m) if !m.trim().is_empty() => MergeType::from_str(m)?,
                    _ => MergeType::Append,
                };
                Ok(UpdateIntent {
                    action,
                    merge_type,
                    reason: r.reasoning,
                })
            });
        match parsed {
            Ok(intent) => intent,
            Err(e) => {
                warn!(piece_id = %existing.piece_id, error = %e, "Update intent malformed, leaving piece unchanged");
                UpdateIntent::new(UpdateAction::NoChange, format!("intent malformed: {}", e))
            }
        }
    }

    /// Update one piece by id.
    ///
    /// Invalid content is an error. A missing piece, an inactive piece and a
    /// failed write come back as a failed [`OperationResult`].
    pub async fn update_by_id(&self, piece_id: &str, content: &str) -> Result<OperationResult> {
        if content.trim().is_empty() {
            return Err(KnowledgeError::invalid("update content is empty"));
        }
        self.security.check(content)?;

        let Some(existing) = self.store.get(piece_id)? else {
            return Ok(OperationResult::failed(OPERATION, Some(piece_id.to_string()), "piece not found"));
        };
        if !existing.is_active {
            return Ok(OperationResult::failed(
                OPERATION,
                Some(piece_id.to_string()),
                "piece is inactive",
            ));
        }

        let intent = self.analyze_intent(&existing, content).await;
        let composed = compose_content(&existing.content, content, intent.action, intent.merge_type);
        if intent.action == UpdateAction::NoChange
            || normalize_content(&composed) == normalize_content(&existing.content)
        {
            debug!(piece_id, reason = %intent.reason, "Update is a no-op");
            return Ok(OperationResult::ok(OPERATION, piece_id).with_message("no change"));
        }

        if self.settings.preserve_history {
            let mut next = existing.superseding(composed);
            ensure_embedding(self.embedder.as_ref(), &mut next).await;
            if let Err(e) = add_then_retire(self.store.as_ref(), &next, piece_id) {
                return Ok(OperationResult::failed(OPERATION, Some(piece_id.to_string()), e.to_string()));
            }
            info!(piece_id, new_id = %next.piece_id, version = next.version, action = %intent.action, "Updated piece");
            Ok(OperationResult::ok(OPERATION, piece_id)
                .with_new_piece(next.piece_id.clone())
                .with_versions(existing.version, next.version)
                .with_message(intent.action.as_str()))
        } else {
            let mut piece = existing;
            piece.set_content(composed);
            ensure_embedding(self.embedder.as_ref(), &mut piece).await;
            if !self.store.update(&piece)? {
                return Ok(OperationResult::failed(OPERATION, Some(piece_id.to_string()), "piece not found"));
            }
            info!(piece_id, action = %intent.action, "Updated piece in place");
            Ok(OperationResult::ok(OPERATION, piece_id)
                .with_versions(piece.version, piece.version)
                .with_message(intent.action.as_str()))
        }
    }

    /// Apply `content` to every active piece similar enough to `query`, up
    /// to `max_updates`.
    pub async fn update_by_content(&self, query: &str, content: &str) -> Result<Vec<OperationResult>> {
        if query.trim().is_empty() {
            return Err(KnowledgeError::invalid("update query is empty"));
        }
        let targets = self.find_targets(query).await?;
        if targets.is_empty() {
            debug!(query, "No pieces similar enough to update");
        }

        let mut results = Vec::with_capacity(targets.len());
        for id in targets {
            results.push(self.update_by_id(&id, content).await?);
        }
        Ok(results)
    }

    async fn find_targets(&self, query: &str) -> Result<Vec<String>> {
        let limit = self.settings.max_updates;
        let threshold = self.settings.similarity_threshold;

        if let Some(embedding) = embed_text(self.embedder.as_ref(), query).await {
            return Ok(nearest_neighbors(self.store.as_ref(), &embedding, PieceFilter::new(), limit, None)?
                .into_iter()
                .filter(|(_, sim)| *sim >= threshold)
                .map(|(p, _)| p.piece_id)
                .collect());
        }

        Ok(self
            .store
            .search(&PieceQuery::new(query, limit))?
            .into_iter()
            .filter(|r| r.score >= threshold)
            .map(|r| r.piece.piece_id)
            .collect())
    }

    /// The version chain from `piece_id` back to the first version.
    pub fn history(&self, piece_id: &str) -> Result<Vec<KnowledgePiece>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(piece_id.to_string());

        while let Some(id) = next {
            if !seen.insert(id.clone()) {
                warn!(piece_id = %id, "Cycle in supersede chain");
                break;
            }
            let Some(piece) = self.store.get(&id)? else {
                if chain.is_empty() {
                    return Err(KnowledgeError::NotFound(id));
                }
                break;
            };
            next = piece.supersedes.clone();
            chain.push(piece);
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lore_llm::MockCompleter;
    use lore_memory::{InMemoryPieceStore, KnowledgePieceStore};
    use lore_types::KnowledgeType;

    use crate::lifecycle::testing::FailingRetireStore;

    fn seeded() -> Arc<InMemoryPieceStore> {
        let store = Arc::new(InMemoryPieceStore::new());
        store
            .add(&KnowledgePiece::new("builds run on linux", KnowledgeType::Fact).with_id("p1"))
            .unwrap();
        store
    }

    #[test]
    fn test_compose_content() {
        use MergeType::*;
        use UpdateAction::*;
        assert_eq!(compose_content("a", "b", Replace, Append), "b");
        assert_eq!(compose_content("a", "b", NoChange, Append), "a");
        assert_eq!(compose_content("a", "b", Merge, Append), "a\n\nb");
        assert_eq!(compose_content("a", "b", Merge, Prepend), "b\n\na");
        assert_eq!(
            compose_content("a1\n\na2\n\na3", "b1", Merge, Interleave),
            "a1\n\nb1\n\na2\n\na3"
        );
    }

    #[tokio::test]
    async fn test_update_preserves_history() {
        let store = seeded();
        let updater = Updater::new(store.clone(), UpdateSettings::default());

        let result = updater.update_by_id("p1", "builds run on linux and macos").await.unwrap();
        assert!(result.success, "{result}");
        assert_eq!(result.old_version, Some(1));
        assert_eq!(result.new_version, Some(2));

        let new_id = result.new_piece_id.unwrap();
        let new = store.get(&new_id).unwrap().unwrap();
        assert!(new.is_active);
        assert_eq!(new.supersedes.as_deref(), Some("p1"));
        assert!(!store.get("p1").unwrap().unwrap().is_active);

        let chain: Vec<String> = updater
            .history(&new_id)
            .unwrap()
            .into_iter()
            .map(|p| p.piece_id)
            .collect();
        assert_eq!(chain, vec![new_id, "p1".to_string()]);
    }

    #[tokio::test]
    async fn test_in_place_update() {
        let store = seeded();
        let settings = UpdateSettings {
            preserve_history: false,
            ..UpdateSettings::default()
        };
        let result = Updater::new(store.clone(), settings)
            .update_by_id("p1", "builds run on windows")
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.new_piece_id.is_none());
        assert_eq!(store.get("p1").unwrap().unwrap().content, "builds run on windows");
    }

    #[tokio::test]
    async fn test_merge_intent_appends() {
        let store = seeded();
        let completer = Arc::new(MockCompleter::with_text(
            r#"{"action": "MERGE", "merge_type": "append", "reasoning": "adds a platform"}"#,
        ));
        let updater = Updater::new(store.clone(), UpdateSettings::default()).with_completer(completer);

        let result = updater.update_by_id("p1", "also on macos").await.unwrap();
        let new = store.get(&result.new_piece_id.unwrap()).unwrap().unwrap();
        assert_eq!(new.content, "builds run on linux\n\nalso on macos");
    }

    #[tokio::test]
    async fn test_bad_intent_is_no_change() {
        let store = seeded();
        let updater = Updater::new(store.clone(), UpdateSettings::default())
            .with_completer(Arc::new(MockCompleter::with_text(r#"{"action": "REWRITE"}"#)));
        let result = updater.update_by_id("p1", "builds run on bsd").await.unwrap();
        assert!(result.success);
        assert_eq!(result.message.as_deref(), Some("no change"));
        assert!(store.get("p1").unwrap().unwrap().is_active);
        assert_eq!(store.list_all(&PieceFilter::new()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_and_empty() {
        let updater = Updater::new(seeded(), UpdateSettings::default());
        let result = updater.update_by_id("ghost", "x").await.unwrap();
        assert!(!result.success);
        assert!(matches!(
            updater.update_by_id("p1", "  ").await.unwrap_err(),
            KnowledgeError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn test_failed_retire_rolls_back() {
        let store = Arc::new(FailingRetireStore::default());
        store
            .add(&KnowledgePiece::new("v1", KnowledgeType::Fact).with_id("p1"))
            .unwrap();
        let updater = Updater::new(store.clone(), UpdateSettings::default());

        let result = updater.update_by_id("p1", "v2").await.unwrap();
        assert!(!result.success);
        let all = store.list_all(&PieceFilter::new().including_inactive()).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_active);
        assert_eq!(all[0].content, "v1");
    }

    #[tokio::test]
    async fn test_update_by_content_keyword() {
        let store = seeded();
        store
            .add(&KnowledgePiece::new("the office is in lisbon", KnowledgeType::Fact).with_id("p2"))
            .unwrap();
        let updater = Updater::new(store.clone(), UpdateSettings::default());

        let results = updater
            .update_by_content("builds run on linux", "builds run on linux and arm")
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].piece_id.as_deref(), Some("p1"));
        assert!(store.get("p2").unwrap().unwrap().is_active);
    }
}
