//! Background merge job for deferred merge strategies.
//!
//! Scans global, unprocessed pieces whose strategy is post-ingestion, per
//! space. Each piece ends the run with `merge_processed = true` (or retired),
//! so re-running after a partial failure never merges twice.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use lore_memory::{EntityScope, PieceFilter};
use lore_types::{KnowledgePiece, MergeAction, MergeJobResult, Space};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::merge::{MergeStrategyManager, attach_suggestion};
use super::{add_then_retire, retire, undo_supersede};
use crate::embedding::ensure_embedding;
use crate::error::Result;

pub struct MergeJob {
    manager: Arc<MergeStrategyManager>,
}

impl MergeJob {
    pub fn new(manager: Arc<MergeStrategyManager>) -> Self {
        Self { manager }
    }

    /// Run in the background until done or cancelled.
    pub fn spawn(self: Arc<Self>, spaces: Vec<Space>, cancel: CancellationToken) -> JoinHandle<MergeJobResult> {
        tokio::spawn(async move { self.run(&spaces, &cancel).await })
    }

    /// Process up to `batch_size` pending pieces per space. Empty `spaces`
    /// means every space.
    pub async fn run(&self, spaces: &[Space], cancel: &CancellationToken) -> MergeJobResult {
        let start = Instant::now();
        let mut result = MergeJobResult::default();
        let spaces: Vec<Space> = if spaces.is_empty() {
            Space::ALL.to_vec()
        } else {
            spaces.to_vec()
        };

        let mut seen: HashSet<String> = HashSet::new();
        'spaces: for space in spaces {
            let pending = match self.pending(space) {
                Ok(p) => p,
                Err(e) => {
                    warn!(space = %space, error = %e, "Failed to list pending pieces");
                    result.errors.push(format!("list {}: {}", space, e));
                    continue;
                }
            };
            debug!(space = %space, pending = pending.len(), "Merge job scanning space");

            for piece in pending {
                if cancel.is_cancelled() {
                    result.cancelled = true;
                    break 'spaces;
                }
                if !seen.insert(piece.piece_id.clone()) {
                    continue;
                }
                result.processed += 1;
                match self.process_one(&piece.piece_id).await {
                    Ok(Some(MergeAction::Merged)) => result.merged += 1,
                    Ok(Some(MergeAction::Suggested)) => result.suggestions += 1,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(piece_id = %piece.piece_id, error = %e, "Merge job failed on piece");
                        result.errors.push(format!("{}: {}", piece.piece_id, e));
                    }
                }
            }
        }

        result.duration = start.elapsed();
        info!(
            processed = result.processed,
            merged = result.merged,
            suggestions = result.suggestions,
            errors = result.errors.len(),
            cancelled = result.cancelled,
            "Merge job complete"
        );
        result
    }

    fn pending(&self, space: Space) -> Result<Vec<KnowledgePiece>> {
        let filter = PieceFilter::new()
            .with_scope(EntityScope::Global)
            .with_spaces(vec![space])
            .with_merge_processed(false);
        let mut pieces: Vec<KnowledgePiece> = self
            .manager
            .store()
            .list_all(&filter)?
            .into_iter()
            .filter(|p| p.in_any_space(&[space]))
            .filter(|p| self.manager.resolve_strategy(p).is_deferred())
            .collect();
        pieces.truncate(self.manager.settings().batch_size);
        Ok(pieces)
    }

    /// `None` when the piece was already handled by an earlier step of the run.
    async fn process_one(&self, piece_id: &str) -> Result<Option<MergeAction>> {
        let store = self.manager.store();
        // re-read: an earlier merge in this run may have retired it
        let Some(mut piece) = store.get(piece_id)? else {
            return Ok(None);
        };
        if !piece.is_active || piece.merge_processed {
            return Ok(None);
        }

        let strategy = self.manager.resolve_strategy(&piece);
        let Some(candidate) = self.manager.find_candidate(&piece).await? else {
            piece.merge_processed = true;
            store.update(&piece)?;
            return Ok(Some(MergeAction::Skipped));
        };
        let target_id = candidate.existing.piece_id.clone();

        if strategy.is_auto() && self.manager.has_completer() {
            match self.manager.merged_version(&candidate.existing, &piece).await {
                Ok(mut merged) => {
                    merged.merge_processed = true;
                    ensure_embedding(self.manager.embedder(), &mut merged).await;
                    add_then_retire(store.as_ref(), &merged, &target_id)?;
                    if let Err(e) = retire(store.as_ref(), &piece.piece_id) {
                        warn!(piece_id, target = %target_id, error = %e, "Retire failed, rolling back merge");
                        undo_supersede(store.as_ref(), &merged.piece_id, &target_id);
                        return Err(e);
                    }
                    debug!(piece_id, target = %target_id, new_id = %merged.piece_id, "Merged deferred piece");
                    return Ok(Some(MergeAction::Merged));
                }
                Err(e) => {
                    warn!(piece_id, target = %target_id, error = %e, "Deferred merge failed, suggesting instead");
                }
            }
        }

        let reason = format!("similar to {} ({:.3})", target_id, candidate.similarity);
        attach_suggestion(&mut piece, &target_id, &reason);
        piece.merge_processed = true;
        piece.touch();
        store.update(&piece)?;
        Ok(Some(MergeAction::Suggested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lore_llm::MockCompleter;
    use lore_memory::{InMemoryPieceStore, KnowledgePieceStore};
    use lore_types::{KnowledgeType, SuggestionStatus};

    use crate::lifecycle::MergeSettings;
    use crate::lifecycle::testing::FailingRetireStore;

    fn note(id: &str, v: Vec<f32>) -> KnowledgePiece {
        KnowledgePiece::new(format!("note {id}"), KnowledgeType::Note)
            .with_id(id)
            .with_embedding(v)
    }

    fn setup(completer: Option<MockCompleter>) -> (Arc<InMemoryPieceStore>, MergeJob) {
        let store = Arc::new(InMemoryPieceStore::new());
        // an already-processed target
        let mut target = note("target", vec![1.0, 0.0]);
        target.merge_processed = true;
        store.add(&target).unwrap();
        store.add(&note("pending", vec![0.99, 0.14])).unwrap();
        store.add(&note("lonely", vec![0.0, 1.0])).unwrap();
        // entity-owned pieces are out of scope
        store.add(&note("owned", vec![0.99, 0.14]).with_entity("user-1")).unwrap();

        let mut manager = MergeStrategyManager::new(store.clone(), MergeSettings::default());
        if let Some(c) = completer {
            manager = manager.with_completer(Arc::new(c));
        }
        (store, MergeJob::new(Arc::new(manager)))
    }

    #[tokio::test]
    async fn test_merges_deferred_pieces_once() {
        let (store, job) = setup(Some(MockCompleter::with_text(r#"{"merged_content": "merged note"}"#)));

        let result = job.run(&[Space::Main], &CancellationToken::new()).await;
        assert_eq!(result.processed, 2);
        assert_eq!(result.merged, 1);
        assert!(!result.has_errors());

        assert!(!store.get("target").unwrap().unwrap().is_active);
        assert!(!store.get("pending").unwrap().unwrap().is_active);
        assert!(store.get("lonely").unwrap().unwrap().merge_processed);
        assert!(!store.get("owned").unwrap().unwrap().merge_processed);
        let merged: Vec<_> = store
            .list_all(&PieceFilter::new())
            .unwrap()
            .into_iter()
            .filter(|p| p.content == "merged note")
            .collect();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].supersedes.as_deref(), Some("target"));

        // re-entrant: nothing left to do
        let again = job.run(&[Space::Main], &CancellationToken::new()).await;
        assert_eq!(again.processed, 0);
        assert_eq!(again.merged, 0);
    }

    #[tokio::test]
    async fn test_suggests_without_completer() {
        let (store, job) = setup(None);
        let result = job.run(&[], &CancellationToken::new()).await;
        assert_eq!(result.suggestions, 1);
        let pending = store.get("pending").unwrap().unwrap();
        assert!(pending.is_active);
        assert!(pending.merge_processed);
        assert_eq!(pending.pending_merge_suggestion.as_deref(), Some("target"));
        assert_eq!(pending.suggestion_status, Some(SuggestionStatus::Pending));
    }

    #[tokio::test]
    async fn test_merge_failure_falls_back_to_suggestion() {
        let (store, job) = setup(Some(MockCompleter::failing("overloaded")));
        let result = job.run(&[Space::Main], &CancellationToken::new()).await;
        assert_eq!(result.merged, 0);
        assert_eq!(result.suggestions, 1);
        assert!(store.get("target").unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_failed_retire_of_incoming_rolls_back_merge() {
        let store = Arc::new(FailingRetireStore::failing_on("pending"));
        let mut target = note("target", vec![1.0, 0.0]);
        target.merge_processed = true;
        store.add(&target).unwrap();
        store.add(&note("pending", vec![0.99, 0.14])).unwrap();
        let manager = MergeStrategyManager::new(store.clone(), MergeSettings::default())
            .with_completer(Arc::new(MockCompleter::with_text(r#"{"merged_content": "merged note"}"#)));
        let job = MergeJob::new(Arc::new(manager));

        let result = job.run(&[Space::Main], &CancellationToken::new()).await;
        assert_eq!(result.merged, 0);
        assert_eq!(result.errors.len(), 1);

        let mut active: Vec<_> = store
            .list_all(&PieceFilter::new())
            .unwrap()
            .into_iter()
            .map(|p| p.piece_id)
            .collect();
        active.sort();
        assert_eq!(active, vec!["pending".to_string(), "target".to_string()]);
        assert!(!store.get("pending").unwrap().unwrap().merge_processed);

        // still eligible, so a later run retries the merge instead of skipping it
        let again = job.run(&[Space::Main], &CancellationToken::new()).await;
        assert_eq!(again.processed, 1);
        assert_eq!(again.errors.len(), 1);
        let pending = store.get("pending").unwrap().unwrap();
        assert!(pending.is_active);
        assert!(!pending.merge_processed);
        assert!(store.get("target").unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (_, job) = setup(None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = job.run(&[], &cancel).await;
        assert!(result.cancelled);
        assert_eq!(result.processed, 0);
    }
}
